//! Ingestion pipeline.
//!
//! Each document is processed through:
//! 1. Chunking
//! 2. Batched embedding
//! 3. A single bulk insertion into the vector index
//!
//! A document that fails at any stage is recorded in the report and skipped;
//! the remaining documents are still processed.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use docqa_core::chunker::Chunker;
use docqa_core::error::{DocqaError, Result};
use docqa_core::types::{Chunk, Document, IngestReport, IngestStage};

use crate::embedding::{DynEmbeddingService, EmbeddingService};
use crate::index::VectorIndex;

/// Default number of chunks sent per embedding request.
pub const DEFAULT_BATCH_SIZE: usize = 32;

/// Turns documents into indexed chunk vectors.
pub struct IngestionPipeline {
    index: Arc<VectorIndex>,
    embedder: Arc<dyn DynEmbeddingService>,
    chunker: Chunker,
    batch_size: usize,
}

impl IngestionPipeline {
    pub fn new(
        index: Arc<VectorIndex>,
        embedder: impl EmbeddingService + 'static,
        chunker: Chunker,
    ) -> Self {
        Self::new_dyn(index, Arc::new(embedder), chunker)
    }

    pub fn new_dyn(
        index: Arc<VectorIndex>,
        embedder: Arc<dyn DynEmbeddingService>,
        chunker: Chunker,
    ) -> Self {
        Self {
            index,
            embedder,
            chunker,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Set how many chunks go into one embedding request. Zero is treated as one.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }

    pub fn chunker(&self) -> &Chunker {
        &self.chunker
    }

    /// Ingest `documents` and report what happened.
    pub async fn ingest(&self, documents: &[Document]) -> IngestReport {
        let mut report = IngestReport::default();
        self.ingest_into(documents, &mut report).await;
        report
    }

    /// Ingest `documents`, adding counts and failures to an existing report.
    ///
    /// Callers that extract documents themselves record extraction failures
    /// in `report` first so one report covers the whole run.
    pub async fn ingest_into(&self, documents: &[Document], report: &mut IngestReport) {
        let started = Instant::now();

        for document in documents {
            match self.ingest_document(document).await {
                Ok(chunks) => {
                    report.documents_ingested += 1;
                    report.chunks_processed += chunks;
                    info!(document = %document.name, chunks, "Document ingested");
                }
                Err((stage, message)) => {
                    warn!(
                        document = %document.name,
                        stage = %stage,
                        error = %message,
                        "Document skipped"
                    );
                    report.record_failure(&document.name, stage, message);
                }
            }
        }

        report.total_vectors = self.index.len();
        info!(
            documents = report.documents_ingested,
            chunks = report.chunks_processed,
            total_vectors = report.total_vectors,
            failures = report.failures.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Ingestion finished"
        );
    }

    /// Process one document; on failure return the stage and a message.
    async fn ingest_document(
        &self,
        document: &Document,
    ) -> std::result::Result<usize, (IngestStage, String)> {
        let chunks = self.chunker.chunk(&document.name, &document.text);
        if chunks.is_empty() {
            return Err((IngestStage::Chunking, "document has no text".to_string()));
        }

        let vectors = self
            .embed_chunks(&chunks)
            .await
            .map_err(|e| (IngestStage::Embedding, e.to_string()))?;

        let entries: Vec<(Vec<f32>, Chunk)> = vectors.into_iter().zip(chunks).collect();
        self.index
            .add(entries)
            .map_err(|e| (IngestStage::Indexing, e.to_string()))
    }

    async fn embed_chunks(&self, chunks: &[Chunk]) -> Result<Vec<Vec<f32>>> {
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let mut vectors = Vec::with_capacity(texts.len());

        for batch in texts.chunks(self.batch_size) {
            let embedded = self.embedder.embed_batch_boxed(batch).await?;
            if embedded.len() != batch.len() {
                return Err(DocqaError::unavailable(
                    "embedding",
                    format!(
                        "provider returned {} vectors for {} chunks",
                        embedded.len(),
                        batch.len()
                    ),
                ));
            }
            debug!(batch = batch.len(), "Embedded chunk batch");
            vectors.extend(embedded);
        }

        Ok(vectors)
    }
}
