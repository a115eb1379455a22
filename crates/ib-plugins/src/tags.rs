//! Tag storage seam.
//!
//! Tags live in the host platform. Plugins only check for, create, and
//! detach them through [`TagStore`]; [`InMemoryTagStore`] backs the CLI and
//! the tests.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

/// Maximum tag name length accepted by the host.
pub const MAX_TAG_LENGTH: usize = 50;

/// Default colour for tags created by plugins.
pub const DEFAULT_TAG_COLOUR: &str = "#ED3347";

/// Errors returned by a tag store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TagError {
    #[error("tag '{0}' exceeds the maximum tag length of {MAX_TAG_LENGTH} characters")]
    TooLong(String),

    #[error("tag name cannot be empty")]
    Empty,

    #[error("tag store error: {0}")]
    Store(String),
}

/// Host-side tag storage.
#[async_trait]
pub trait TagStore: Send + Sync {
    /// Returns true if the tag exists.
    async fn exists(&self, name: &str) -> Result<bool, TagError>;

    /// Creates a tag.
    async fn create_tag(&self, name: &str, colour: &str) -> Result<(), TagError>;

    /// Detaches `tag` from every indicator pulled by `source`.
    async fn remove_from_source(&self, source: &str, tag: &str) -> Result<(), TagError>;
}

/// In-memory tag store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTagStore {
    tags: Arc<RwLock<HashMap<String, String>>>,
    removals: Arc<RwLock<HashSet<(String, String)>>>,
}

impl InMemoryTagStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the colour of a tag, if it exists.
    pub async fn colour_of(&self, name: &str) -> Option<String> {
        self.tags.read().await.get(name).cloned()
    }

    /// Returns all tag names, sorted.
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tags.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Returns true if `tag` was detached from `source`.
    pub async fn was_removed(&self, source: &str, tag: &str) -> bool {
        self.removals
            .read()
            .await
            .contains(&(source.to_string(), tag.to_string()))
    }
}

#[async_trait]
impl TagStore for InMemoryTagStore {
    async fn exists(&self, name: &str) -> Result<bool, TagError> {
        Ok(self.tags.read().await.contains_key(name))
    }

    async fn create_tag(&self, name: &str, colour: &str) -> Result<(), TagError> {
        if name.is_empty() {
            return Err(TagError::Empty);
        }
        if name.chars().count() > MAX_TAG_LENGTH {
            return Err(TagError::TooLong(name.to_string()));
        }
        self.tags
            .write()
            .await
            .entry(name.to_string())
            .or_insert_with(|| colour.to_string());
        Ok(())
    }

    async fn remove_from_source(&self, source: &str, tag: &str) -> Result<(), TagError> {
        self.removals
            .write()
            .await
            .insert((source.to_string(), tag.to_string()));
        Ok(())
    }
}
