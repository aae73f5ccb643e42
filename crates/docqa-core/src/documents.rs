//! On-disk store for uploaded source documents.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::error::{DocqaError, Result};
use crate::types::{Document, DocumentInfo};

/// File extensions whose contents are read as plain UTF-8 text.
pub const TEXT_EXTENSIONS: &[&str] = &["txt", "md", "markdown"];

/// Flat directory of documents, keyed by file name.
#[derive(Debug, Clone)]
pub struct DocumentStore {
    dir: PathBuf,
}

impl DocumentStore {
    /// Open a store rooted at `dir`, creating the directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `bytes` under `name`, replacing any existing document with that name.
    pub fn save(&self, name: &str, bytes: &[u8]) -> Result<DocumentInfo> {
        let name = validate_name(name)?;
        let path = self.dir.join(name);
        std::fs::write(&path, bytes)?;
        info!(document = name, bytes = bytes.len(), "Document stored");
        self.info(name)
    }

    /// Metadata for every stored document, sorted by name.
    pub fn list(&self) -> Result<Vec<DocumentInfo>> {
        let mut docs = Vec::new();
        for name in self.names()? {
            docs.push(self.info(&name)?);
        }
        Ok(docs)
    }

    /// Names of every stored document, sorted.
    pub fn names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if !name.starts_with('.') {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Read a document and extract its text.
    ///
    /// Only plain-text formats are supported; anything else is reported as
    /// `InvalidInput` so ingestion can record it as an extraction failure.
    pub fn load(&self, name: &str) -> Result<Document> {
        let name = validate_name(name)?;
        let path = self.dir.join(name);
        if !path.is_file() {
            return Err(DocqaError::NotFound(format!("document '{}'", name)));
        }

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        if !TEXT_EXTENSIONS.contains(&extension.as_str()) {
            return Err(DocqaError::InvalidInput(format!(
                "unsupported document type '.{}' for '{}'",
                extension, name
            )));
        }

        let bytes = std::fs::read(&path)?;
        let text = String::from_utf8(bytes).map_err(|e| {
            DocqaError::InvalidInput(format!("'{}' is not valid UTF-8: {}", name, e))
        })?;
        debug!(document = name, chars = text.chars().count(), "Document loaded");
        Ok(Document::new(name, text))
    }

    fn info(&self, name: &str) -> Result<DocumentInfo> {
        let meta = std::fs::metadata(self.dir.join(name))?;
        let modified = meta.modified().ok().map(DateTime::<Utc>::from);
        Ok(DocumentInfo {
            name: name.to_string(),
            size_bytes: meta.len(),
            modified,
        })
    }
}

/// Reject names that could escape the store directory.
fn validate_name(name: &str) -> Result<&str> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(DocqaError::InvalidInput(
            "document name must not be empty".to_string(),
        ));
    }
    if trimmed.contains('/')
        || trimmed.contains('\\')
        || trimmed.contains("..")
        || trimmed.starts_with('.')
        || trimmed.contains('\0')
    {
        return Err(DocqaError::InvalidInput(format!(
            "invalid document name '{}'",
            trimmed
        )));
    }
    Ok(trimmed)
}
