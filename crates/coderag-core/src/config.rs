//! Configuration loader and path helpers.
//!
//! Figment merges `config.toml` + `config.<env>.toml` (selected by
//! `RUST_ENV`) + `APP_*` environment variables. `RetrievalSettings` is the
//! typed view the indexing and search commands use.

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};

use crate::error::Error;

pub struct Config {
    figment: Figment,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());

        let mut figment = Figment::new().merge(Toml::file("config.toml"));
        match env_name.as_str() {
            "dev" | "development" => figment = figment.merge(Toml::file("config.dev.toml")),
            "prod" | "production" => figment = figment.merge(Toml::file("config.prod.toml")),
            "test" | "testing" => figment = figment.merge(Toml::file("config.test.toml")),
            _ => {}
        }
        figment = figment.merge(Env::prefixed("APP_"));

        Ok(Self { figment })
    }

    pub fn get<T>(&self, key: &str) -> anyhow::Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| anyhow::anyhow!("Failed to get '{}': {}", key, e))
    }

    /// Typed retrieval settings from the `[retrieval]` section; anything not
    /// present falls back to its default. Validated before use.
    pub fn retrieval(&self) -> anyhow::Result<RetrievalSettings> {
        let settings: RetrievalSettings = self.figment.extract_inner("retrieval").unwrap_or_default();
        settings.validate()?;
        Ok(settings)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    pub db_uri: String,
    pub collection: String,
    pub alpha: f32,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub usage_log: Option<String>,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            db_uri: "./data/lancedb".to_string(),
            collection: "code_chunks".to_string(),
            alpha: 0.3,
            chunk_size: 1000,
            chunk_overlap: 100,
            usage_log: None,
        }
    }
}

impl RetrievalSettings {
    pub fn validate(&self) -> crate::error::Result<()> {
        if !(0.0..=1.0).contains(&self.alpha) {
            return Err(Error::InvalidConfig(format!(
                "retrieval.alpha must lie in [0, 1], got {}",
                self.alpha
            )));
        }
        if self.chunk_size == 0 {
            return Err(Error::InvalidConfig("retrieval.chunk_size must be positive".to_string()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(Error::InvalidConfig(format!(
                "retrieval.chunk_overlap ({}) must be smaller than retrieval.chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        Ok(())
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    // Expand env vars first
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    // Expand ~ at start
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

/// Resolve a possibly relative path against a given base directory after expansion.
/// If `p` is absolute, it's returned as-is; otherwise `base.join(p)` is returned.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() {
        p
    } else {
        base.join(p)
    }
}
