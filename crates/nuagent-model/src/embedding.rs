use async_trait::async_trait;

/// A provider capable of turning text into a fixed-dimension vector.
///
/// Kept separate from [`crate::ModelProvider`] because not every chat
/// provider exposes an embeddings endpoint, and embedding calls are batched
/// rather than streamed.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Dimension of the vectors this provider returns.
    fn dimension(&self) -> usize;

    /// Embed a batch of texts in one request; output order matches input order.
    async fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;

    /// USD cost of embedding `tokens` input tokens. Default: free (local/mock).
    fn calculate_cost(&self, _tokens: u32) -> f64 {
        0.0
    }
}

/// Deterministic embedding provider for tests: hashes each text into a
/// fixed-dimension vector so identical input always yields identical output.
pub struct MockEmbeddingProvider {
    dim: usize,
}

impl MockEmbeddingProvider {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }
}

impl Default for MockEmbeddingProvider {
    fn default() -> Self {
        Self::new(1536)
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn dimension(&self) -> usize {
        self.dim
    }

    async fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| hash_to_vector(t, self.dim)).collect())
    }
}

fn hash_to_vector(text: &str, dim: usize) -> Vec<f32> {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(text.as_bytes());
    (0..dim)
        .map(|i| {
            let byte = digest[i % digest.len()];
            (byte as f32 / 255.0) * 2.0 - 1.0
        })
        .collect()
}
