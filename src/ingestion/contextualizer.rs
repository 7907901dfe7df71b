//! Contextual enrichment of chunks.
//!
//! Each chunk gets a short generated description of where it sits in the document, which is
//! prepended to the chunk before embedding. Providers that can cache a prompt prefix receive
//! the document once as a cacheable block; others get the document inlined in every prompt.

use super::prompts::{PromptStrategy, build_context_request, chunk_with_context};
use super::rate_limiter::RateLimiter;
use super::retry::with_rate_limit_retry;
use super::splitter::TokenEstimator;
use super::types::{Chunk, ContextualizedChunk, Document};
use crate::generation::{GenerationRequest, TextGenerationClient};
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, join_all};
use std::sync::Arc;

/// Enriches chunks with document context, or passes them through when disabled.
#[derive(Clone)]
pub struct Contextualizer {
    generator: Option<Arc<dyn TextGenerationClient>>,
    estimator: TokenEstimator,
}

impl Contextualizer {
    /// Contextualizer backed by a text-generation provider.
    pub fn new(generator: Arc<dyn TextGenerationClient>, estimator: TokenEstimator) -> Self {
        Self {
            generator: Some(generator),
            estimator,
        }
    }

    /// Contextualizer that returns chunks unchanged.
    pub fn disabled() -> Self {
        Self {
            generator: None,
            estimator: TokenEstimator::heuristic(),
        }
    }

    /// Whether chunks are sent to a text-generation provider.
    pub fn is_enabled(&self) -> bool {
        self.generator.is_some()
    }

    /// Prompt strategy used for the configured provider.
    pub fn strategy(&self) -> Option<PromptStrategy> {
        self.generator.as_ref().map(|generator| {
            if generator.supports_prompt_caching() {
                PromptStrategy::Cached
            } else {
                PromptStrategy::Standard
            }
        })
    }

    /// Contextualize one batch of chunks concurrently.
    ///
    /// The output holds one entry per input chunk in input order. A chunk whose prompt could
    /// not be built, or whose generation call failed, keeps its original text and is marked
    /// unsuccessful.
    pub async fn contextualize_batch(
        &self,
        document: &Document,
        chunks: &[Chunk],
        limiter: &RateLimiter,
    ) -> Vec<ContextualizedChunk> {
        let (Some(generator), Some(strategy)) = (self.generator.as_ref(), self.strategy()) else {
            return chunks
                .iter()
                .map(|chunk| ContextualizedChunk::passthrough(chunk, true))
                .collect();
        };

        let pending: Vec<BoxFuture<'_, ContextualizedChunk>> = chunks
            .iter()
            .map(|chunk| {
                self.contextualize_one(generator.as_ref(), strategy, document, chunk, limiter)
                    .boxed()
            })
            .collect();
        let mut results = join_all(pending).await;
        results.sort_by_key(|chunk| chunk.index);
        results
    }

    /// Tokens a request may consume: everything sent plus the generation budget.
    fn request_tokens(&self, request: &GenerationRequest) -> u64 {
        let cached = request
            .cached_document
            .as_deref()
            .map_or(0, |document| self.estimator.estimate(document));
        self.estimator.estimate(&request.prompt) + cached + u64::from(request.max_tokens)
    }

    async fn contextualize_one(
        &self,
        generator: &dyn TextGenerationClient,
        strategy: PromptStrategy,
        document: &Document,
        chunk: &Chunk,
        limiter: &RateLimiter,
    ) -> ContextualizedChunk {
        let request = match build_context_request(
            strategy,
            &document.content_type,
            &document.filename,
            &document.text,
            &chunk.text,
        ) {
            Ok(request) => request,
            Err(error) => {
                tracing::warn!(
                    document_id = %document.id,
                    chunk = chunk.index,
                    error = %error,
                    "Could not build context prompt"
                );
                return ContextualizedChunk::passthrough(chunk, false);
            }
        };

        limiter.acquire(self.request_tokens(&request)).await;

        match with_rate_limit_retry("contextualize", || generator.generate(request.clone())).await {
            Ok(response) => {
                tracing::trace!(
                    chunk = chunk.index,
                    input_tokens = response.usage.input_tokens,
                    cached_tokens = ?response.usage.cached_tokens,
                    "Chunk contextualized"
                );
                ContextualizedChunk {
                    index: chunk.index,
                    text: chunk_with_context(&chunk.text, &response.text),
                    success: true,
                }
            }
            Err(error) => {
                tracing::warn!(
                    document_id = %document.id,
                    chunk = chunk.index,
                    error = %error,
                    "Context generation failed"
                );
                ContextualizedChunk::passthrough(chunk, false)
            }
        }
    }
}
