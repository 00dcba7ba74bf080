/// Text-to-vector encoder. Implementations are loaded once per process and
/// shared behind `Box<dyn Embedder>`.
pub trait Embedder: Send + Sync {
    fn dim(&self) -> usize;
    fn max_len(&self) -> usize;
    fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;
}
