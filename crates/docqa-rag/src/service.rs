//! The public operation surface: upload, ingest, query, clear.
//!
//! `DocqaService` owns the document store and the shared vector index and
//! wires the ingestion pipeline, retriever and answer composer around them.
//! Transports (HTTP, CLI) hold it behind an `Arc`.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use docqa_core::config::DocqaConfig;
use docqa_core::documents::DocumentStore;
use docqa_core::error::{DocqaError, Result};
use docqa_core::types::{Answer, Document, DocumentInfo, IngestReport, IngestStage};
use docqa_vector::embedding::{build_embedder, DynEmbeddingService};
use docqa_vector::index::{IndexCheckpoint, IndexStats, VectorIndex};
use docqa_vector::pipeline::IngestionPipeline;
use docqa_vector::retriever::Retriever;

use crate::composer::AnswerComposer;
use crate::generation::{build_generator, DynGenerationService};
use crate::schema::SchemaNode;

/// Document question-answering over a local corpus.
pub struct DocqaService {
    config: DocqaConfig,
    store: DocumentStore,
    index: Arc<VectorIndex>,
    index_path: PathBuf,
    pipeline: IngestionPipeline,
    retriever: Retriever,
    composer: AnswerComposer,
    embedder: Arc<dyn DynEmbeddingService>,
    /// Serializes ingest and clear so a clear never lands mid-ingest.
    write_lock: Mutex<()>,
}

impl DocqaService {
    /// Build the service with the providers named in `config`.
    pub fn from_config(config: DocqaConfig) -> Result<Self> {
        config.validate()?;
        let embedder = build_embedder(&config.embedding)?;
        let generator = build_generator(&config.generation)?;
        Self::with_components(config, embedder, generator)
    }

    /// Build the service around caller-supplied providers.
    ///
    /// Loads the persisted index when one exists at the configured path.
    pub fn with_components(
        config: DocqaConfig,
        embedder: Arc<dyn DynEmbeddingService>,
        generator: Arc<dyn DynGenerationService>,
    ) -> Result<Self> {
        let store = DocumentStore::new(config.documents_dir())?;
        let index_path = config.index_path();
        let index = Arc::new(VectorIndex::load_or_empty(&index_path)?);

        if let Some(dims) = index.dimensions() {
            if dims != embedder.dimensions() {
                warn!(
                    index_dimensions = dims,
                    embedder_dimensions = embedder.dimensions(),
                    "Persisted index does not match the embedding model; clear and re-ingest"
                );
            }
        }

        let pipeline = IngestionPipeline::new_dyn(
            Arc::clone(&index),
            Arc::clone(&embedder),
            config.chunking.chunker()?,
        )
        .with_batch_size(config.embedding.batch_size);
        let retriever = Retriever::new_dyn(Arc::clone(&index), Arc::clone(&embedder));
        let composer =
            AnswerComposer::new_dyn(generator).with_excerpt_chars(config.retrieval.excerpt_chars);

        info!(
            documents_dir = %store.dir().display(),
            index_path = %index_path.display(),
            vectors = index.len(),
            embedding = %config.embedding.provider,
            generation = %config.generation.provider,
            "docqa service ready"
        );

        Ok(Self {
            config,
            store,
            index,
            index_path,
            pipeline,
            retriever,
            composer,
            embedder,
            write_lock: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &DocqaConfig {
        &self.config
    }

    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }

    pub fn documents(&self) -> &DocumentStore {
        &self.store
    }

    /// Model name of the generation provider.
    pub fn generation_model(&self) -> &str {
        self.composer.generator().model()
    }

    pub fn embedding_dimensions(&self) -> usize {
        self.embedder.dimensions()
    }

    /// Store a document. It is not searchable until the next [`ingest`](Self::ingest).
    pub fn upload(&self, name: &str, bytes: &[u8]) -> Result<DocumentInfo> {
        let limit = self.config.api.max_upload_bytes;
        if bytes.len() > limit {
            return Err(DocqaError::InvalidInput(format!(
                "document is {} bytes, limit is {}",
                bytes.len(),
                limit
            )));
        }
        self.store.save(name, bytes)
    }

    pub fn list_documents(&self) -> Result<Vec<DocumentInfo>> {
        self.store.list()
    }

    /// Extract, chunk, embed and index every stored document.
    ///
    /// Documents that cannot be read are recorded as extraction failures and
    /// skipped. Running this twice without [`clear_index`](Self::clear_index)
    /// indexes the corpus twice. If the index cannot be persisted, the
    /// in-memory index is rolled back and the call can be retried.
    pub async fn ingest(&self) -> Result<IngestReport> {
        let _guard = self.write_lock.lock().await;
        let checkpoint = self.checkpoint_if_persisting()?;
        let mut report = IngestReport::default();
        let mut documents = Vec::new();

        for name in self.store.names()? {
            match self.store.load(&name) {
                Ok(document) => documents.push(document),
                Err(e) => {
                    warn!(document = %name, error = %e, "Extraction failed");
                    report.record_failure(&name, IngestStage::Extraction, e.to_string());
                }
            }
        }

        self.pipeline.ingest_into(&documents, &mut report).await;
        self.persist_or_rollback(checkpoint)?;
        Ok(report)
    }

    /// Ingest documents supplied directly rather than from the store.
    pub async fn ingest_documents(&self, documents: &[Document]) -> Result<IngestReport> {
        let _guard = self.write_lock.lock().await;
        let checkpoint = self.checkpoint_if_persisting()?;
        let report = self.pipeline.ingest(documents).await;
        self.persist_or_rollback(checkpoint)?;
        Ok(report)
    }

    /// Answer `question` in free text from the `top_k` most relevant chunks.
    pub async fn query(&self, question: &str, top_k: Option<usize>) -> Result<Answer> {
        let top_k = self.resolve_top_k(top_k)?;
        let retrieval = self.retriever.retrieve(question, top_k).await?;
        self.composer.answer(question, retrieval).await
    }

    /// Answer `question` with JSON conforming to `schema`.
    pub async fn query_structured(
        &self,
        question: &str,
        schema: &Value,
        top_k: Option<usize>,
    ) -> Result<Answer> {
        let top_k = self.resolve_top_k(top_k)?;
        // Reject a bad schema before paying for embedding.
        SchemaNode::parse(schema)?;
        let retrieval = self.retriever.retrieve(question, top_k).await?;
        self.composer
            .answer_structured(question, schema, retrieval)
            .await
    }

    /// Remove every indexed vector. Stored documents are kept.
    ///
    /// A failed persist restores the vectors, so memory and disk agree.
    pub async fn clear_index(&self) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        let checkpoint = self.checkpoint_if_persisting()?;
        let removed = self.index.clear()?;
        self.persist_or_rollback(checkpoint)?;
        Ok(removed)
    }

    pub fn stats(&self) -> Result<IndexStats> {
        self.index.stats()
    }

    fn resolve_top_k(&self, top_k: Option<usize>) -> Result<usize> {
        let max = self.config.retrieval.max_top_k;
        match top_k {
            None => Ok(self.config.retrieval.default_top_k),
            Some(0) => Err(DocqaError::InvalidInput(
                "top_k must be at least 1".to_string(),
            )),
            Some(k) if k > max => Err(DocqaError::InvalidInput(format!(
                "top_k {} exceeds the maximum of {}",
                k, max
            ))),
            Some(k) => Ok(k),
        }
    }

    fn checkpoint_if_persisting(&self) -> Result<Option<IndexCheckpoint>> {
        if self.config.index.persist_on_change {
            self.index.checkpoint().map(Some)
        } else {
            Ok(None)
        }
    }

    /// Persist after a write. On failure the index goes back to `checkpoint`
    /// so the in-memory state matches what is on disk.
    fn persist_or_rollback(&self, checkpoint: Option<IndexCheckpoint>) -> Result<()> {
        let Some(checkpoint) = checkpoint else {
            debug!("Index persistence disabled, skipping");
            return Ok(());
        };
        if let Err(e) = self.index.persist(&self.index_path) {
            warn!(
                path = %self.index_path.display(),
                error = %e,
                restored_vectors = checkpoint.len(),
                "Persisting the index failed, rolling back"
            );
            self.index.restore(checkpoint)?;
            return Err(e);
        }
        Ok(())
    }
}
