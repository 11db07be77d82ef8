//! Document management.
//!
//! Documents are the resources a background worker must be synchronized
//! with before it analyzes anything. The editing surface owns a
//! [`DocumentStore`]; hosts read [`DocumentSnapshot`]s out of it.
//!
//! ## Learning: Type Aliases and Newtypes
//!
//! `DocumentId` is a newtype wrapper around `Uuid`. This provides:
//! - Type safety: Can't accidentally use a string as a document ID
//! - Encapsulation: Can change the underlying type without breaking APIs
//! - Documentation: The type name explains its purpose

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use uuid::Uuid;

use crate::{CoreError, CoreResult};

/// Unique identifier for a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentId(Uuid);

impl DocumentId {
    /// Creates a new unique document ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A document as seen by the editing surface.
#[derive(Debug, Clone)]
pub struct Document {
    /// Unique identifier
    id: DocumentId,

    /// File path (None for untitled documents)
    path: Option<PathBuf>,

    /// Display name
    name: String,

    /// Document language
    language: Option<String>,

    /// Bumped on every content change
    version: u64,

    /// Full text, shared with snapshots
    text: Arc<str>,
}

impl Document {
    /// Creates a new untitled document with the given text.
    pub fn new(text: impl Into<Arc<str>>) -> Self {
        Self {
            id: DocumentId::new(),
            path: None,
            name: "Untitled".to_string(),
            language: None,
            version: 1,
            text: text.into(),
        }
    }

    /// Opens a document from a file.
    pub fn from_file(path: impl AsRef<Path>) -> CoreResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;

        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("Unknown")
            .to_string();

        let language = path
            .extension()
            .and_then(|e| e.to_str())
            .map(Self::language_from_extension);

        Ok(Self {
            id: DocumentId::new(),
            path: Some(path.to_path_buf()),
            name,
            language,
            version: 1,
            text: text.into(),
        })
    }

    /// Detects language from file extension.
    fn language_from_extension(ext: &str) -> String {
        match ext.to_lowercase().as_str() {
            "rs" => "rust",
            "py" => "python",
            "js" | "jsx" | "mjs" => "javascript",
            "ts" | "tsx" => "typescript",
            "json" => "json",
            "yaml" | "yml" => "yaml",
            "toml" => "toml",
            "md" | "markdown" => "markdown",
            _ => ext,
        }
        .to_string()
    }

    /// Returns the document ID.
    pub fn id(&self) -> DocumentId {
        self.id
    }

    /// Returns the file path.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Returns the display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the detected language.
    pub fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }

    fn snapshot(&self) -> DocumentSnapshot {
        DocumentSnapshot {
            id: self.id,
            name: self.name.clone(),
            language: self.language.clone(),
            version: self.version,
            text: Arc::clone(&self.text),
        }
    }
}

/// Immutable view of a document at a given version.
///
/// Cloning a snapshot shares the underlying text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentSnapshot {
    pub id: DocumentId,
    pub name: String,
    pub language: Option<String>,
    pub version: u64,
    pub text: Arc<str>,
}

/// Thread-safe store of the open documents.
///
/// ## Learning: Shared Ownership
///
/// `Arc<RwLock<..>>` lets the editor and every worker host hold a
/// handle to the same map. Readers (hosts taking snapshots) never block
/// each other; only edits take the write lock.
#[derive(Debug, Clone, Default)]
pub struct DocumentStore {
    documents: Arc<RwLock<HashMap<DocumentId, Document>>>,
}

impl DocumentStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a document and returns its id.
    pub fn open(&self, doc: Document) -> DocumentId {
        let id = doc.id();
        tracing::debug!(%id, name = doc.name(), "document opened");
        self.write().insert(id, doc);
        id
    }

    /// Replaces a document's text and returns the new version.
    pub fn update(&self, id: DocumentId, text: impl Into<Arc<str>>) -> CoreResult<u64> {
        let mut documents = self.write();
        let doc = documents
            .get_mut(&id)
            .ok_or(CoreError::DocumentNotFound(id))?;
        doc.text = text.into();
        doc.version += 1;
        Ok(doc.version)
    }

    /// Removes a document.
    pub fn close(&self, id: DocumentId) -> CoreResult<()> {
        if self.write().remove(&id).is_none() {
            return Err(CoreError::DocumentNotFound(id));
        }
        tracing::debug!(%id, "document closed");
        Ok(())
    }

    /// Returns the current snapshot of a document.
    pub fn snapshot(&self, id: DocumentId) -> Option<DocumentSnapshot> {
        self.read().get(&id).map(Document::snapshot)
    }

    /// Returns the number of open documents.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Returns true if no documents are open.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<DocumentId, Document>> {
        self.documents.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<DocumentId, Document>> {
        self.documents.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_from_file_detects_language() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("main.rs");
        std::fs::write(&path, "fn main() {}").unwrap();

        let doc = Document::from_file(&path).unwrap();
        assert_eq!(doc.name(), "main.rs");
        assert_eq!(doc.language(), Some("rust"));
        assert_eq!(doc.path(), Some(path.as_path()));

        let id = doc.id();
        let store = DocumentStore::new();
        store.open(doc);
        let snapshot = store.snapshot(id).unwrap();
        assert_eq!(snapshot.version, 1);
        assert_eq!(&*snapshot.text, "fn main() {}");
    }

    #[test]
    fn test_from_missing_file() {
        let dir = tempdir().unwrap();
        let result = Document::from_file(dir.path().join("missing.txt"));
        assert!(matches!(result, Err(CoreError::Io(_))));
    }

    #[test]
    fn test_update_bumps_version() {
        let store = DocumentStore::new();
        let id = store.open(Document::new("one"));

        assert_eq!(store.update(id, "two").unwrap(), 2);

        let snapshot = store.snapshot(id).unwrap();
        assert_eq!(snapshot.version, 2);
        assert_eq!(&*snapshot.text, "two");
    }

    #[test]
    fn test_snapshot_is_stable_across_edits() {
        let store = DocumentStore::new();
        let id = store.open(Document::new("before"));
        let snapshot = store.snapshot(id).unwrap();

        store.update(id, "after").unwrap();
        assert_eq!(&*snapshot.text, "before");
    }

    #[test]
    fn test_unknown_document() {
        let store = DocumentStore::new();
        let id = DocumentId::new();

        assert!(matches!(
            store.update(id, "x"),
            Err(CoreError::DocumentNotFound(missing)) if missing == id
        ));
        assert!(matches!(store.close(id), Err(CoreError::DocumentNotFound(_))));
        assert!(store.snapshot(id).is_none());
    }

    #[test]
    fn test_close() {
        let store = DocumentStore::new();
        let id = store.open(Document::new(""));
        assert_eq!(store.len(), 1);

        store.close(id).unwrap();
        assert!(store.is_empty());
        assert!(store.snapshot(id).is_none());
    }
}
