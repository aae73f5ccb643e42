//! Query-side retrieval: embed the question once, then rank indexed chunks.

use std::sync::Arc;

use tracing::debug;

use docqa_core::error::{DocqaError, Result};
use docqa_core::types::{RetrievalResult, ScoredChunk};

use crate::embedding::{DynEmbeddingService, EmbeddingService};
use crate::index::VectorIndex;

/// Finds the chunks most relevant to a question.
///
/// Uses dynamic dispatch so production code can supply a real provider while
/// tests use `MockEmbedding`. The embedder must be the one used at ingestion.
pub struct Retriever {
    index: Arc<VectorIndex>,
    embedder: Arc<dyn DynEmbeddingService>,
}

impl Retriever {
    pub fn new(index: Arc<VectorIndex>, embedder: impl EmbeddingService + 'static) -> Self {
        Self {
            index,
            embedder: Arc::new(embedder),
        }
    }

    pub fn new_dyn(index: Arc<VectorIndex>, embedder: Arc<dyn DynEmbeddingService>) -> Self {
        Self { index, embedder }
    }

    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }

    /// Return at most `top_k` chunks ranked by descending similarity.
    ///
    /// An empty index gives an empty result without calling the embedder.
    pub async fn retrieve(&self, question: &str, top_k: usize) -> Result<RetrievalResult> {
        if question.trim().is_empty() {
            return Err(DocqaError::InvalidInput(
                "question must not be empty".to_string(),
            ));
        }
        if top_k == 0 {
            return Err(DocqaError::InvalidInput(
                "top_k must be at least 1".to_string(),
            ));
        }

        if self.index.is_empty() {
            debug!(top_k, "Index is empty, nothing to retrieve");
            return Ok(RetrievalResult {
                top_k,
                chunks: Vec::new(),
            });
        }

        let query = self.embedder.embed_boxed(question).await?;
        let hits = self.index.search(&query, top_k)?;

        debug!(
            top_k,
            hits = hits.len(),
            best = hits.first().map(|h| h.score),
            "Retrieved chunks"
        );

        Ok(RetrievalResult {
            top_k,
            chunks: hits
                .into_iter()
                .map(|hit| ScoredChunk {
                    entry_id: hit.entry_id,
                    chunk: hit.chunk,
                    score: hit.score,
                })
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::MockEmbedding;
    use docqa_core::types::Chunk;

    fn chunk(doc: &str, seq: usize, text: &str) -> Chunk {
        Chunk {
            text: text.to_string(),
            source_document: doc.to_string(),
            sequence_index: seq,
            char_span: (0, text.chars().count()),
        }
    }

    async fn populated() -> Retriever {
        let index = Arc::new(VectorIndex::new());
        let embedder = MockEmbedding::new();
        let texts = [
            "Remote work is allowed 3 days per week.",
            "Expense reports over $500 need manager approval.",
            "The office closes at 6pm on Fridays.",
        ];
        let mut entries = Vec::new();
        for (i, text) in texts.iter().enumerate() {
            let vector = embedder.embed(text).await.unwrap();
            entries.push((vector, chunk("handbook.txt", i, text)));
        }
        index.add(entries).unwrap();
        Retriever::new(index, embedder)
    }

    #[tokio::test]
    async fn test_relevant_chunk_ranks_first() {
        let retriever = populated().await;
        let result = retriever
            .retrieve("How many remote days are allowed?", 1)
            .await
            .unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result.top_k, 1);
        assert_eq!(
            result.chunks[0].chunk.text,
            "Remote work is allowed 3 days per week."
        );
    }

    #[tokio::test]
    async fn test_results_sorted_and_bounded() {
        let retriever = populated().await;
        let result = retriever.retrieve("office hours", 10).await.unwrap();
        assert_eq!(result.len(), 3);
        for pair in result.chunks.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[tokio::test]
    async fn test_empty_index_returns_empty() {
        let retriever = Retriever::new(Arc::new(VectorIndex::new()), MockEmbedding::new());
        let result = retriever.retrieve("anything", 3).await.unwrap();
        assert!(result.is_empty());
        assert_eq!(result.top_k, 3);
    }

    #[tokio::test]
    async fn test_rejects_invalid_queries() {
        let retriever = populated().await;
        assert!(matches!(
            retriever.retrieve("  ", 3).await,
            Err(DocqaError::InvalidInput(_))
        ));
        assert!(matches!(
            retriever.retrieve("remote", 0).await,
            Err(DocqaError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_embedder_dimension_mismatch_surfaces() {
        let retriever = populated().await;
        let other = Retriever::new(
            Arc::clone(retriever.index()),
            MockEmbedding::with_dimensions(64),
        );
        assert!(matches!(
            other.retrieve("remote", 1).await,
            Err(DocqaError::DimensionMismatch { .. })
        ));
    }
}
