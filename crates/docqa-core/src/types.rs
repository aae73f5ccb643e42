//! Shared data types for the docqa system.
//!
//! These types flow between the chunker, the vector index, the retriever,
//! the answer composer, and the transport layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Documents and chunks
// =============================================================================

/// A source document with its extracted text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// Stable document name (file name within the document store).
    pub name: String,
    /// Raw extracted text.
    pub text: String,
}

impl Document {
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
        }
    }
}

/// A contiguous window of a document's text; the unit of retrieval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// The window's text.
    pub text: String,
    /// Name of the document the chunk was cut from.
    pub source_document: String,
    /// Position of the chunk within its document, starting at 0.
    pub sequence_index: usize,
    /// Character offsets `(start, end)` of the window, end exclusive.
    pub char_span: (usize, usize),
}

impl Chunk {
    /// Number of characters in the chunk.
    pub fn char_len(&self) -> usize {
        self.char_span.1 - self.char_span.0
    }
}

/// Metadata describing a stored document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentInfo {
    pub name: String,
    pub size_bytes: u64,
    pub modified: Option<DateTime<Utc>>,
}

// =============================================================================
// Retrieval
// =============================================================================

/// A chunk paired with its similarity to the query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub entry_id: u64,
    pub chunk: Chunk,
    /// Cosine similarity normalized to [0, 1]; higher is more similar.
    pub score: f64,
}

/// Ranked chunks returned for one query, best first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub top_k: usize,
    pub chunks: Vec<ScoredChunk>,
}

impl RetrievalResult {
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }
}

// =============================================================================
// Answers
// =============================================================================

/// A source reference attached to an answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    pub document: String,
    pub sequence_index: usize,
    pub score: f64,
    /// Leading characters of the chunk, suffixed with "..." when truncated.
    pub excerpt: String,
}

/// The generated answer body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerBody {
    /// Free-form text from a simple query.
    Text(String),
    /// A JSON value that passed validation against the caller's schema.
    Structured(serde_json::Value),
}

impl AnswerBody {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            AnswerBody::Text(text) => Some(text),
            AnswerBody::Structured(_) => None,
        }
    }

    pub fn as_structured(&self) -> Option<&serde_json::Value> {
        match self {
            AnswerBody::Structured(value) => Some(value),
            AnswerBody::Text(_) => None,
        }
    }
}

/// A complete answer with provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub question: String,
    pub answer: AnswerBody,
    pub sources: Vec<SourceRef>,
    /// The retrieval depth actually used.
    pub top_k: usize,
    pub generated_at: DateTime<Utc>,
    /// The full retrieval result the answer was grounded on.
    #[serde(skip)]
    pub retrieval: RetrievalResult,
}

// =============================================================================
// Ingestion
// =============================================================================

/// The pipeline stage at which a document failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStage {
    Extraction,
    Chunking,
    Embedding,
    Indexing,
}

impl std::fmt::Display for IngestStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            IngestStage::Extraction => "extraction",
            IngestStage::Chunking => "chunking",
            IngestStage::Embedding => "embedding",
            IngestStage::Indexing => "indexing",
        };
        f.write_str(name)
    }
}

/// A single document that could not be ingested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestFailure {
    pub document: String,
    pub stage: IngestStage,
    pub message: String,
}

/// Aggregate outcome of an ingestion run.
///
/// A non-empty `failures` list is a partial ingestion failure: the listed
/// documents were skipped while the rest of the corpus was indexed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReport {
    /// Documents whose chunks were all inserted.
    pub documents_ingested: usize,
    /// Chunks inserted during this run.
    pub chunks_processed: usize,
    /// Vectors held by the index after the run.
    pub total_vectors: usize,
    pub failures: Vec<IngestFailure>,
}

impl IngestReport {
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }

    pub fn record_failure(&mut self, document: &str, stage: IngestStage, message: String) {
        self.failures.push(IngestFailure {
            document: document.to_string(),
            stage,
            message,
        });
    }

    /// Names of the documents that failed, in the order they failed.
    pub fn failed_documents(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.document.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_char_len() {
        let chunk = Chunk {
            text: "hello".to_string(),
            source_document: "a.txt".to_string(),
            sequence_index: 0,
            char_span: (10, 15),
        };
        assert_eq!(chunk.char_len(), 5);
    }

    #[test]
    fn test_answer_body_untagged_serialization() {
        let text = AnswerBody::Text("three days".to_string());
        assert_eq!(serde_json::to_string(&text).unwrap(), "\"three days\"");

        let structured = AnswerBody::Structured(serde_json::json!({"answer": "three"}));
        assert_eq!(
            serde_json::to_string(&structured).unwrap(),
            "{\"answer\":\"three\"}"
        );
        assert!(structured.as_text().is_none());
        assert!(structured.as_structured().is_some());
    }

    #[test]
    fn test_answer_skips_retrieval_in_json() {
        let answer = Answer {
            question: "q".to_string(),
            answer: AnswerBody::Text("a".to_string()),
            sources: vec![],
            top_k: 3,
            generated_at: Utc::now(),
            retrieval: RetrievalResult::default(),
        };
        let value = serde_json::to_value(&answer).unwrap();
        assert!(value.get("retrieval").is_none());
        assert_eq!(value["top_k"], 3);
    }

    #[test]
    fn test_ingest_report_failures() {
        let mut report = IngestReport::default();
        assert!(!report.is_partial());

        report.record_failure("bad.pdf", IngestStage::Extraction, "unsupported".to_string());
        assert!(report.is_partial());
        assert_eq!(report.failed_documents(), vec!["bad.pdf"]);
    }

    #[test]
    fn test_ingest_stage_serialization() {
        let json = serde_json::to_string(&IngestStage::Embedding).unwrap();
        assert_eq!(json, "\"embedding\"");
        assert_eq!(IngestStage::Indexing.to_string(), "indexing");
    }
}
