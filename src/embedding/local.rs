use super::{EmbeddingClient, EmbeddingClientError};
use async_trait::async_trait;

/// Deterministic embedding client that hashes bytes into a normalized vector.
///
/// Useful offline and in tests: identical text always yields the identical vector.
pub struct LocalEmbedder {
    dimension: usize,
}

impl LocalEmbedder {
    /// Construct a hashing embedder producing vectors of `dimension` components.
    pub fn new(dimension: usize) -> Result<Self, EmbeddingClientError> {
        if dimension == 0 {
            return Err(EmbeddingClientError::Misconfigured(
                "embedding dimension must be greater than zero".to_string(),
            ));
        }
        Ok(Self { dimension })
    }

    fn encode(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0_f32; self.dimension];

        if text.is_empty() {
            return embedding;
        }

        for (idx, byte) in text.bytes().enumerate() {
            let position = idx % self.dimension;
            embedding[position] += f32::from(byte) / 255.0;
        }

        let norm = embedding
            .iter()
            .map(|value| value * value)
            .sum::<f32>()
            .sqrt();

        if norm > 0.0 {
            for value in &mut embedding {
                *value /= norm;
            }
        }

        embedding
    }
}

#[async_trait]
impl EmbeddingClient for LocalEmbedder {
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbeddingClientError> {
        Ok(self.encode(text))
    }

    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        if texts.is_empty() {
            return Err(EmbeddingClientError::GenerationFailed(
                "no texts provided".to_string(),
            ));
        }
        Ok(texts.iter().map(|text| self.encode(text)).collect())
    }

    fn supports_batch(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_dimension_is_rejected() {
        assert!(LocalEmbedder::new(0).is_err());
    }

    #[tokio::test]
    async fn identical_text_yields_identical_unit_vectors() {
        let embedder = LocalEmbedder::new(16).expect("embedder");
        let first = embedder.embed_one("knowledge").await.expect("vector");
        let second = embedder.embed_one("knowledge").await.expect("vector");
        assert_eq!(first, second);
        let norm: f32 = first.iter().map(|value| value * value).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn empty_batch_is_an_error() {
        let embedder = LocalEmbedder::new(4).expect("embedder");
        assert!(embedder.embed_batch(Vec::new()).await.is_err());
    }
}
