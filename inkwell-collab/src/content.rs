//! Initial document content.
//!
//! A session asks its store exactly once, when the session is created.
//! Nothing is ever written back.

use std::collections::HashMap;
use std::io;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("invalid document key: {0:?}")]
    InvalidKey(String),

    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Source of the text a new session is seeded with.
pub trait ContentStore: Send + Sync {
    /// Text for `key`. An unknown key is an empty document, not an error.
    fn initial_content(&self, key: &str) -> Result<String, ContentError>;
}

/// Fixed in-memory contents.
#[derive(Debug, Clone, Default)]
pub struct MemoryContentStore {
    documents: HashMap<String, String>,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(mut self, key: impl Into<String>, text: impl Into<String>) -> Self {
        self.insert(key, text);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, text: impl Into<String>) {
        self.documents.insert(key.into(), text.into());
    }
}

impl ContentStore for MemoryContentStore {
    fn initial_content(&self, key: &str) -> Result<String, ContentError> {
        Ok(self.documents.get(key).cloned().unwrap_or_default())
    }
}

/// Reads `<root>/<key>` as UTF-8.
#[derive(Debug, Clone)]
pub struct DirectoryContentStore {
    root: PathBuf,
}

impl DirectoryContentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve `key` below the root. Keys with `..`, a leading `/` or empty
    /// segments are refused.
    fn resolve(&self, key: &str) -> Result<PathBuf, ContentError> {
        let relative = Path::new(key);
        let plain = !key.is_empty()
            && !key.split('/').any(str::is_empty)
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !plain {
            return Err(ContentError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

impl ContentStore for DirectoryContentStore {
    fn initial_content(&self, key: &str) -> Result<String, ContentError> {
        let path = self.resolve(key)?;
        match std::fs::read_to_string(&path) {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(String::new()),
            Err(source) => Err(ContentError::Io { path, source }),
        }
    }
}
