//! Embedding stage.
//!
//! Successful chunks are embedded in groups when the provider supports grouped requests and
//! grouping is enabled, one by one otherwise. A group whose request fails is embedded again
//! chunk by chunk so one bad input only costs its own fragment.

use super::rate_limiter::RateLimiter;
use super::retry::with_rate_limit_retry;
use super::splitter::TokenEstimator;
use super::types::{ContextualizedChunk, EmbeddingFailure, EmbeddingResult};
use crate::embedding::EmbeddingClient;
use std::sync::Arc;

/// Maximum number of texts sent in one grouped embedding request.
pub const EMBEDDING_GROUP_SIZE: usize = 100;

/// Turns contextualized chunks into embedding results.
#[derive(Clone)]
pub struct EmbeddingGenerator {
    client: Arc<dyn EmbeddingClient>,
    batch_enabled: bool,
    estimator: TokenEstimator,
}

impl EmbeddingGenerator {
    /// Wrap an embedding client.
    pub fn new(
        client: Arc<dyn EmbeddingClient>,
        batch_enabled: bool,
        estimator: TokenEstimator,
    ) -> Self {
        Self {
            client,
            batch_enabled,
            estimator,
        }
    }

    /// Whether grouped requests will be used.
    pub fn uses_batches(&self) -> bool {
        self.batch_enabled && self.client.supports_batch()
    }

    /// Embed a batch of contextualized chunks.
    ///
    /// Returns one result per input, sorted by chunk index. Chunks that failed
    /// contextualization are reported as failures without reaching the provider.
    pub async fn embed_chunks(
        &self,
        chunks: Vec<ContextualizedChunk>,
        limiter: &RateLimiter,
    ) -> Vec<EmbeddingResult> {
        let (ready, skipped): (Vec<_>, Vec<_>) = chunks.into_iter().partition(|chunk| chunk.success);
        let mut results: Vec<EmbeddingResult> = skipped
            .into_iter()
            .map(|chunk| {
                EmbeddingResult::failed(
                    chunk.index,
                    chunk.text,
                    EmbeddingFailure::ContextualizationFailed,
                )
            })
            .collect();

        if self.uses_batches() {
            for group in ready.chunks(EMBEDDING_GROUP_SIZE) {
                results.extend(self.embed_group(group, limiter).await);
            }
        } else {
            results.extend(self.embed_individually(&ready, limiter).await);
        }

        results.sort_by_key(|result| result.index);
        results
    }

    async fn embed_group(
        &self,
        group: &[ContextualizedChunk],
        limiter: &RateLimiter,
    ) -> Vec<EmbeddingResult> {
        let texts: Vec<String> = group.iter().map(|chunk| chunk.text.clone()).collect();
        let estimated: u64 = texts.iter().map(|text| self.estimator.estimate(text)).sum();
        limiter.acquire(estimated).await;

        match with_rate_limit_retry("embed_batch", || self.client.embed_batch(texts.clone())).await {
            Ok(vectors) if vectors.len() == group.len() => group
                .iter()
                .zip(vectors)
                .map(|(chunk, vector)| validate(chunk, vector))
                .collect(),
            Ok(vectors) => {
                tracing::warn!(
                    expected = group.len(),
                    received = vectors.len(),
                    "Grouped embedding returned the wrong number of vectors; embedding individually"
                );
                self.embed_individually(group, limiter).await
            }
            Err(error) => {
                tracing::warn!(
                    size = group.len(),
                    error = %error,
                    "Grouped embedding failed; embedding individually"
                );
                self.embed_individually(group, limiter).await
            }
        }
    }

    async fn embed_individually(
        &self,
        chunks: &[ContextualizedChunk],
        limiter: &RateLimiter,
    ) -> Vec<EmbeddingResult> {
        let mut results = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            limiter.acquire(self.estimator.estimate(&chunk.text)).await;
            let outcome =
                with_rate_limit_retry("embed_one", || self.client.embed_one(&chunk.text)).await;
            let result = match outcome {
                Ok(vector) => validate(chunk, vector),
                Err(error) => {
                    tracing::warn!(chunk = chunk.index, error = %error, "Embedding failed");
                    EmbeddingResult::failed(
                        chunk.index,
                        chunk.text.clone(),
                        EmbeddingFailure::Transport(error.to_string()),
                    )
                }
            };
            results.push(result);
        }
        results
    }
}

fn validate(chunk: &ContextualizedChunk, vector: Vec<f32>) -> EmbeddingResult {
    if vector.first().is_none_or(|first| *first == 0.0) {
        tracing::warn!(chunk = chunk.index, "Provider returned an unusable vector");
        return EmbeddingResult::failed(
            chunk.index,
            chunk.text.clone(),
            EmbeddingFailure::InvalidVector,
        );
    }
    EmbeddingResult::succeeded(chunk.index, chunk.text.clone(), vector)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::EmbeddingClientError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Embeds text as `[len, 1.0]`; texts containing "bad" fail, texts containing "zero"
    /// produce a zero vector.
    struct FakeEmbedder {
        batch: bool,
        fail_batches: bool,
        batch_calls: AtomicUsize,
        single_calls: AtomicUsize,
    }

    impl FakeEmbedder {
        fn new(batch: bool, fail_batches: bool) -> Self {
            Self {
                batch,
                fail_batches,
                batch_calls: AtomicUsize::new(0),
                single_calls: AtomicUsize::new(0),
            }
        }
    }

    fn vector_for(text: &str) -> Result<Vec<f32>, EmbeddingClientError> {
        if text.contains("bad") {
            return Err(EmbeddingClientError::GenerationFailed("rejected".into()));
        }
        if text.contains("zero") {
            return Ok(vec![0.0, 1.0]);
        }
        Ok(vec![text.len() as f32, 1.0])
    }

    #[async_trait]
    impl EmbeddingClient for FakeEmbedder {
        async fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbeddingClientError> {
            self.single_calls.fetch_add(1, Ordering::SeqCst);
            vector_for(text)
        }

        async fn embed_batch(
            &self,
            texts: Vec<String>,
        ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
            self.batch_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_batches {
                return Err(EmbeddingClientError::InvalidResponse("batch down".into()));
            }
            texts.iter().map(|text| vector_for(text)).collect()
        }

        fn supports_batch(&self) -> bool {
            self.batch
        }
    }

    fn input(texts: &[&str]) -> Vec<ContextualizedChunk> {
        texts
            .iter()
            .enumerate()
            .map(|(index, text)| ContextualizedChunk {
                index,
                text: text.to_string(),
                success: true,
            })
            .collect()
    }

    fn limiter() -> RateLimiter {
        RateLimiter::new(10_000, None, false)
    }

    #[tokio::test]
    async fn batch_and_individual_paths_agree() {
        let texts = ["one", "three", "five!"];
        let batched = EmbeddingGenerator::new(
            Arc::new(FakeEmbedder::new(true, false)),
            true,
            TokenEstimator::heuristic(),
        );
        let single = EmbeddingGenerator::new(
            Arc::new(FakeEmbedder::new(true, false)),
            false,
            TokenEstimator::heuristic(),
        );
        assert!(batched.uses_batches());
        assert!(!single.uses_batches());

        let left = batched.embed_chunks(input(&texts), &limiter()).await;
        let right = single.embed_chunks(input(&texts), &limiter()).await;
        assert_eq!(left.len(), right.len());
        for (a, b) in left.iter().zip(&right) {
            assert_eq!(a.index, b.index);
            assert_eq!(a.embedding, b.embedding);
            assert!(a.success && b.success);
        }
    }

    #[tokio::test]
    async fn groups_are_capped_at_one_hundred() {
        let client = Arc::new(FakeEmbedder::new(true, false));
        let generator =
            EmbeddingGenerator::new(client.clone(), true, TokenEstimator::heuristic());
        let texts: Vec<String> = (0..250).map(|i| format!("chunk {i}")).collect();
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();

        let results = generator.embed_chunks(input(&refs), &limiter()).await;
        assert_eq!(results.len(), 250);
        assert_eq!(client.batch_calls.load(Ordering::SeqCst), 3);
        assert_eq!(client.single_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_group_falls_back_to_single_requests() {
        let client = Arc::new(FakeEmbedder::new(true, true));
        let generator =
            EmbeddingGenerator::new(client.clone(), true, TokenEstimator::heuristic());
        let results = generator
            .embed_chunks(input(&["good", "bad", "fine"]), &limiter())
            .await;

        assert_eq!(client.single_calls.load(Ordering::SeqCst), 3);
        assert!(results[0].success && results[2].success);
        assert!(matches!(
            results[1].error,
            Some(EmbeddingFailure::Transport(_))
        ));
    }

    #[tokio::test]
    async fn zero_vectors_and_skipped_chunks_are_failures() {
        let client = Arc::new(FakeEmbedder::new(false, false));
        let generator =
            EmbeddingGenerator::new(client.clone(), true, TokenEstimator::heuristic());
        let mut chunks = input(&["zero here", "ok", "skipped"]);
        chunks[2].success = false;

        let results = generator.embed_chunks(chunks, &limiter()).await;
        assert_eq!(results[0].error, Some(EmbeddingFailure::InvalidVector));
        assert!(results[1].success);
        assert_eq!(
            results[2].error,
            Some(EmbeddingFailure::ContextualizationFailed)
        );
        assert_eq!(client.single_calls.load(Ordering::SeqCst), 2);
    }
}
