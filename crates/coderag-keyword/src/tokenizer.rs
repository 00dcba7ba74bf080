//! Analyzer chain shared by corpus documents and queries: whitespace split,
//! lowercase, alphanumeric tokens only, minimum two characters. Applying the
//! same chain on both sides is what makes the relevance scores meaningful.

use tantivy::tokenizer::{
    AlphaNumOnlyFilter, LowerCaser, TextAnalyzer, Token, TokenFilter, TokenStream, Tokenizer,
    WhitespaceTokenizer,
};

pub const MIN_TOKEN_CHARS: usize = 2;

pub fn build_analyzer() -> TextAnalyzer {
    TextAnalyzer::builder(WhitespaceTokenizer::default())
        .filter(LowerCaser)
        .filter(AlphaNumOnlyFilter)
        .filter(RemoveShortFilter::limit(MIN_TOKEN_CHARS))
        .build()
}

/// Run the analyzer over `text` and collect the surviving token strings.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut analyzer = build_analyzer();
    let mut stream = analyzer.token_stream(text);
    let mut tokens = Vec::new();
    while stream.advance() {
        tokens.push(stream.token().text.clone());
    }
    tokens
}

/// Drops tokens shorter than a character threshold.
#[derive(Clone)]
pub struct RemoveShortFilter {
    min_chars: usize,
}

impl RemoveShortFilter {
    pub fn limit(min_chars: usize) -> Self {
        Self { min_chars }
    }
}

impl TokenFilter for RemoveShortFilter {
    type Tokenizer<T: Tokenizer> = RemoveShortFilterWrapper<T>;

    fn transform<T: Tokenizer>(self, tokenizer: T) -> RemoveShortFilterWrapper<T> {
        RemoveShortFilterWrapper { min_chars: self.min_chars, inner: tokenizer }
    }
}

#[derive(Clone)]
pub struct RemoveShortFilterWrapper<T> {
    min_chars: usize,
    inner: T,
}

impl<T: Tokenizer> Tokenizer for RemoveShortFilterWrapper<T> {
    type TokenStream<'a> = RemoveShortTokenStream<T::TokenStream<'a>>;

    fn token_stream<'a>(&'a mut self, text: &'a str) -> Self::TokenStream<'a> {
        RemoveShortTokenStream { min_chars: self.min_chars, tail: self.inner.token_stream(text) }
    }
}

pub struct RemoveShortTokenStream<S> {
    min_chars: usize,
    tail: S,
}

impl<S: TokenStream> TokenStream for RemoveShortTokenStream<S> {
    fn advance(&mut self) -> bool {
        while self.tail.advance() {
            if self.tail.token().text.chars().count() >= self.min_chars {
                return true;
            }
        }
        false
    }

    fn token(&self) -> &Token {
        self.tail.token()
    }

    fn token_mut(&mut self) -> &mut Token {
        self.tail.token_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::tokenize;

    #[test]
    fn lowercases_and_splits_on_whitespace() {
        assert_eq!(tokenize("Alpha BETA gamma"), vec!["alpha", "beta", "gamma"]);
    }

    #[test]
    fn drops_non_alphanumeric_and_short_tokens() {
        assert_eq!(tokenize("fn main() x y2 self.count a"), vec!["fn", "y2"]);
    }

    #[test]
    fn empty_and_symbol_only_input_yield_no_tokens() {
        assert!(tokenize("").is_empty());
        assert!(tokenize("() -> {} ::").is_empty());
    }
}
