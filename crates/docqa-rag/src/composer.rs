//! Answer composition: prompt, generate, attach sources.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, warn};

use docqa_core::error::{DocqaError, Result};
use docqa_core::types::{Answer, AnswerBody, RetrievalResult, ScoredChunk, SourceRef};

use crate::generation::{DynGenerationService, GenerationRequest, GenerationService};
use crate::prompt;
use crate::schema::{self, SchemaNode};

/// Default number of leading characters kept in a source excerpt.
pub const DEFAULT_EXCERPT_CHARS: usize = 200;

/// Turns a question and its retrieval result into an [`Answer`].
pub struct AnswerComposer {
    generator: Arc<dyn DynGenerationService>,
    excerpt_chars: usize,
}

impl AnswerComposer {
    pub fn new(generator: impl GenerationService + 'static) -> Self {
        Self::new_dyn(Arc::new(generator))
    }

    pub fn new_dyn(generator: Arc<dyn DynGenerationService>) -> Self {
        Self {
            generator,
            excerpt_chars: DEFAULT_EXCERPT_CHARS,
        }
    }

    pub fn with_excerpt_chars(mut self, excerpt_chars: usize) -> Self {
        self.excerpt_chars = excerpt_chars;
        self
    }

    pub fn generator(&self) -> &Arc<dyn DynGenerationService> {
        &self.generator
    }

    /// Answer in free text.
    pub async fn answer(&self, question: &str, retrieval: RetrievalResult) -> Result<Answer> {
        let request = prompt::simple_request(question, &retrieval);
        let raw = self.generate(&request).await?;
        Ok(self.finish(question, AnswerBody::Text(raw.trim().to_string()), retrieval))
    }

    /// Answer with a JSON value conforming to `schema`.
    ///
    /// The schema is parsed before anything is sent to the provider, so a
    /// malformed schema costs no generation call.
    pub async fn answer_structured(
        &self,
        question: &str,
        schema: &Value,
        retrieval: RetrievalResult,
    ) -> Result<Answer> {
        let node = SchemaNode::parse(schema)?;
        let request = prompt::structured_request(question, &retrieval, schema);
        let raw = self.generate(&request).await?;

        let value = schema::parse_structured(&node, &raw).inspect_err(|e| {
            warn!(error = %e, raw_chars = raw.len(), "Structured output did not match schema");
        })?;
        Ok(self.finish(question, AnswerBody::Structured(value), retrieval))
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let start = Instant::now();
        let raw = self.generator.generate_boxed(request).await?;
        debug!(
            model = self.generator.model(),
            json_mode = request.json_mode,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Generation complete"
        );
        if raw.trim().is_empty() {
            return Err(DocqaError::GenerationFailed(
                "provider returned an empty response".to_string(),
            ));
        }
        Ok(raw)
    }

    fn finish(&self, question: &str, answer: AnswerBody, retrieval: RetrievalResult) -> Answer {
        Answer {
            question: question.to_string(),
            answer,
            sources: retrieval
                .chunks
                .iter()
                .map(|scored| self.source_ref(scored))
                .collect(),
            top_k: retrieval.top_k,
            generated_at: Utc::now(),
            retrieval,
        }
    }

    fn source_ref(&self, scored: &ScoredChunk) -> SourceRef {
        SourceRef {
            document: scored.chunk.source_document.clone(),
            sequence_index: scored.chunk.sequence_index,
            score: scored.score,
            excerpt: excerpt(&scored.chunk.text, self.excerpt_chars),
        }
    }
}

/// The first `max_chars` characters of `text`, with `...` appended when cut.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}
