//! In-memory vector index with brute-force cosine similarity search.
//!
//! State lives behind `RwLock<Arc<IndexState>>`. Readers hold the lock only
//! long enough to clone the `Arc`, then score against that snapshot without
//! blocking writers. Writers copy-on-write through `Arc::make_mut`, so a
//! search that started before a `clear` or `add` finishes against the state
//! it started with.

use std::path::Path;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use docqa_core::error::{DocqaError, Result};
use docqa_core::types::Chunk;

/// On-disk format version written by [`VectorIndex::persist`].
const FORMAT_VERSION: u32 = 1;

/// A single hit returned from a vector search.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub entry_id: u64,
    /// Cosine similarity normalized to [0, 1].
    pub score: f64,
    pub chunk: Chunk,
}

/// An entry stored in the vector index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub entry_id: u64,
    pub vector: Vec<f32>,
    pub chunk: Chunk,
}

/// Summary of the index contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    pub vectors: usize,
    pub dimensions: Option<usize>,
    pub documents: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexState {
    version: u32,
    /// Fixed by the first insertion; `None` while the index is empty.
    dimensions: Option<usize>,
    /// Next id to hand out. Never rewinds, including across `clear`.
    next_id: u64,
    entries: Vec<IndexEntry>,
}

impl IndexState {
    fn empty(next_id: u64) -> Self {
        Self {
            version: FORMAT_VERSION,
            dimensions: None,
            next_id,
            entries: Vec::new(),
        }
    }
}

/// Contents of a [`VectorIndex`] at one point in time.
#[derive(Debug, Clone)]
pub struct IndexCheckpoint(Arc<IndexState>);

impl IndexCheckpoint {
    /// Number of vectors held by the checkpoint.
    pub fn len(&self) -> usize {
        self.0.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.entries.is_empty()
    }
}

/// Vector index shared by ingestion and retrieval, usually as `Arc<VectorIndex>`.
#[derive(Debug)]
pub struct VectorIndex {
    state: RwLock<Arc<IndexState>>,
}

impl Default for VectorIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl VectorIndex {
    /// Create a new empty vector index.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(Arc::new(IndexState::empty(0))),
        }
    }

    fn snapshot(&self) -> Result<Arc<IndexState>> {
        let guard = self
            .state
            .read()
            .map_err(|e| DocqaError::Storage(format!("Lock poisoned: {}", e)))?;
        Ok(Arc::clone(&guard))
    }

    /// Insert a batch of vectors with their chunks and return how many were added.
    ///
    /// Every vector is checked against the index dimensionality before any is
    /// inserted, so a `DimensionMismatch` leaves the index untouched. The
    /// first insertion into an empty index fixes the dimensionality. Vectors
    /// with NaN or infinite components are rejected as `InvalidInput`.
    pub fn add(&self, entries: Vec<(Vec<f32>, Chunk)>) -> Result<usize> {
        if entries.is_empty() {
            return Ok(0);
        }

        let mut guard = self
            .state
            .write()
            .map_err(|e| DocqaError::Storage(format!("Lock poisoned: {}", e)))?;

        let expected = match guard.dimensions {
            Some(d) => d,
            None => entries[0].0.len(),
        };
        if expected == 0 {
            return Err(DocqaError::InvalidInput(
                "cannot index zero-length vectors".to_string(),
            ));
        }
        if let Some((vector, _)) = entries.iter().find(|(v, _)| v.len() != expected) {
            return Err(DocqaError::DimensionMismatch {
                expected,
                actual: vector.len(),
            });
        }
        if let Some((_, chunk)) = entries.iter().find(|(v, _)| !is_finite(v)) {
            return Err(DocqaError::InvalidInput(format!(
                "embedding for '{}' chunk {} has non-finite components",
                chunk.source_document, chunk.sequence_index
            )));
        }

        let count = entries.len();
        let state = Arc::make_mut(&mut guard);
        state.dimensions = Some(expected);
        state.entries.reserve(count);
        for (vector, chunk) in entries {
            let entry_id = state.next_id;
            state.next_id += 1;
            state.entries.push(IndexEntry {
                entry_id,
                vector,
                chunk,
            });
        }

        debug!(added = count, total = state.entries.len(), "Vectors indexed");
        Ok(count)
    }

    /// Return the `k` entries most similar to `query`, best first.
    ///
    /// Ties are broken by ascending entry id so results are deterministic.
    /// An empty index yields no hits regardless of the query's length.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        let snapshot = self.snapshot()?;
        search_state(&snapshot, query, k)
    }

    /// Look up a single entry by id.
    pub fn get(&self, entry_id: u64) -> Result<Option<IndexEntry>> {
        let snapshot = self.snapshot()?;
        Ok(snapshot
            .entries
            .iter()
            .find(|e| e.entry_id == entry_id)
            .cloned())
    }

    /// Return the number of vectors currently stored in the index.
    pub fn len(&self) -> usize {
        self.snapshot().map(|s| s.entries.len()).unwrap_or(0)
    }

    /// Return true if the index contains no vectors.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dimensionality fixed by the first insertion, if any.
    pub fn dimensions(&self) -> Option<usize> {
        self.snapshot().ok().and_then(|s| s.dimensions)
    }

    pub fn stats(&self) -> Result<IndexStats> {
        let snapshot = self.snapshot()?;
        let mut documents: Vec<&str> = snapshot
            .entries
            .iter()
            .map(|e| e.chunk.source_document.as_str())
            .collect();
        documents.sort_unstable();
        documents.dedup();
        Ok(IndexStats {
            vectors: snapshot.entries.len(),
            dimensions: snapshot.dimensions,
            documents: documents.len(),
        })
    }

    /// Discard every entry and the dimensionality in one step.
    ///
    /// Returns the number of entries removed.
    pub fn clear(&self) -> Result<usize> {
        let mut guard = self
            .state
            .write()
            .map_err(|e| DocqaError::Storage(format!("Lock poisoned: {}", e)))?;
        let removed = guard.entries.len();
        let next_id = guard.next_id;
        *guard = Arc::new(IndexState::empty(next_id));
        info!(removed, "Vector index cleared");
        Ok(removed)
    }

    /// Capture the current contents so a later write can be undone with
    /// [`restore`](Self::restore).
    ///
    /// The checkpoint shares the state with the index, so the next `add`
    /// copies the entries once instead of mutating them in place.
    pub fn checkpoint(&self) -> Result<IndexCheckpoint> {
        Ok(IndexCheckpoint(self.snapshot()?))
    }

    /// Roll the entries and dimensionality back to `checkpoint`.
    ///
    /// The id counter keeps its current value, so ids handed out since the
    /// checkpoint are never reused.
    pub fn restore(&self, checkpoint: IndexCheckpoint) -> Result<()> {
        let mut guard = self
            .state
            .write()
            .map_err(|e| DocqaError::Storage(format!("Lock poisoned: {}", e)))?;
        let next_id = guard.next_id;
        let mut restored = checkpoint.0;
        if restored.next_id != next_id {
            Arc::make_mut(&mut restored).next_id = next_id.max(restored.next_id);
        }
        info!(
            vectors = restored.entries.len(),
            "Vector index restored from checkpoint"
        );
        *guard = restored;
        Ok(())
    }

    /// Write the index to `path` as JSON.
    ///
    /// Writes to a sibling temp file and renames it into place, so a crash
    /// mid-write never leaves a truncated index behind.
    pub fn persist(&self, path: &Path) -> Result<()> {
        let snapshot = self.snapshot()?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec(snapshot.as_ref())?;
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, path)?;

        info!(
            path = %path.display(),
            vectors = snapshot.entries.len(),
            "Vector index persisted"
        );
        Ok(())
    }

    /// Load an index previously written by [`persist`](Self::persist).
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(DocqaError::NotFound(format!(
                "vector index at {}",
                path.display()
            )));
        }
        let bytes = std::fs::read(path)?;
        let state: IndexState = serde_json::from_slice(&bytes)?;
        validate_state(&state)?;

        info!(
            path = %path.display(),
            vectors = state.entries.len(),
            dimensions = ?state.dimensions,
            "Vector index loaded"
        );
        Ok(Self {
            state: RwLock::new(Arc::new(state)),
        })
    }

    /// Load from `path` if it exists, otherwise start empty.
    pub fn load_or_empty(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Ok(index) => Ok(index),
            Err(DocqaError::NotFound(_)) => {
                debug!(path = %path.display(), "No persisted index, starting empty");
                Ok(Self::new())
            }
            Err(e) => Err(e),
        }
    }
}

fn validate_state(state: &IndexState) -> Result<()> {
    if state.version != FORMAT_VERSION {
        return Err(DocqaError::Storage(format!(
            "unsupported index format version {}",
            state.version
        )));
    }
    match state.dimensions {
        None if !state.entries.is_empty() => {
            return Err(DocqaError::Storage(
                "index has entries but no dimensionality".to_string(),
            ));
        }
        Some(dims) => {
            if let Some(entry) = state.entries.iter().find(|e| e.vector.len() != dims) {
                return Err(DocqaError::Storage(format!(
                    "entry {} has {} dimensions, index expects {}",
                    entry.entry_id,
                    entry.vector.len(),
                    dims
                )));
            }
        }
        None => {}
    }
    if let Some(max_id) = state.entries.iter().map(|e| e.entry_id).max() {
        if max_id >= state.next_id {
            return Err(DocqaError::Storage(format!(
                "entry id {} is not below the id counter {}",
                max_id, state.next_id
            )));
        }
    }
    Ok(())
}

fn search_state(state: &IndexState, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
    if !is_finite(query) {
        return Err(DocqaError::InvalidInput(
            "query vector has non-finite components".to_string(),
        ));
    }
    if k == 0 || state.entries.is_empty() {
        return Ok(Vec::new());
    }
    if let Some(dims) = state.dimensions {
        if query.len() != dims {
            return Err(DocqaError::DimensionMismatch {
                expected: dims,
                actual: query.len(),
            });
        }
    }

    let query_norm = magnitude(query);
    let mut scored: Vec<(u64, f64, usize)> = state
        .entries
        .iter()
        .enumerate()
        .map(|(pos, entry)| {
            let cos = cosine_similarity(query, query_norm, &entry.vector);
            (entry.entry_id, (cos + 1.0) / 2.0, pos)
        })
        .collect();

    scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    scored.truncate(k);

    Ok(scored
        .into_iter()
        .map(|(entry_id, score, pos)| SearchHit {
            entry_id,
            score,
            chunk: state.entries[pos].chunk.clone(),
        })
        .collect())
}

fn is_finite(v: &[f32]) -> bool {
    v.iter().all(|x| x.is_finite())
}

fn magnitude(v: &[f32]) -> f64 {
    v.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt()
}

/// Cosine similarity in [-1, 1]; 0.0 when either vector has zero magnitude.
fn cosine_similarity(a: &[f32], a_norm: f64, b: &[f32]) -> f64 {
    let b_norm = magnitude(b);
    if a_norm == 0.0 || b_norm == 0.0 {
        return 0.0;
    }
    let dot: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| (*x as f64) * (*y as f64))
        .sum();
    (dot / (a_norm * b_norm)).clamp(-1.0, 1.0)
}
