// # Memory State Store
//
// In-memory implementations of StateStore and ArtifactStore.
//
// ## Purpose
//
// Used by tests and dry runs. Nothing survives the process, so every pass
// run against a fresh memory store generates a new identity and treats the
// provider version as changed.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use async_trait::async_trait;

use crate::traits::{ArtifactStore, StateKey, StateStore};
use crate::Error;

/// In-memory state store implementation
///
/// Clones share the same underlying map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStateStore {
    inner: Arc<RwLock<HashMap<StateKey, String>>>,
}

impl MemoryStateStore {
    /// Create a new empty memory state store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding a previous version stamp
    pub fn with_version(version: &str) -> Self {
        let mut map = HashMap::new();
        map.insert(StateKey::LastVersion, version.to_string());
        Self {
            inner: Arc::new(RwLock::new(map)),
        }
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self, key: StateKey) -> Result<Option<String>, Error> {
        Ok(self.inner.read().await.get(&key).cloned())
    }

    async fn store(&self, key: StateKey, value: &str) -> Result<(), Error> {
        self.inner.write().await.insert(key, value.to_string());
        Ok(())
    }
}

/// In-memory artifact store implementation
///
/// Reports artifacts under a virtual `/memory` directory and counts writes.
#[derive(Debug, Clone, Default)]
pub struct MemoryArtifactStore {
    inner: Arc<RwLock<HashMap<String, String>>>,
    writes: Arc<std::sync::atomic::AtomicUsize>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of writes performed
    pub fn write_count(&self) -> usize {
        self.writes.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Names of all stored artifacts
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn write(&self, name: &str, content: &str) -> Result<PathBuf, Error> {
        self.inner
            .write()
            .await
            .insert(name.to_string(), content.to_string());
        self.writes.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(PathBuf::from("/memory").join(name))
    }

    async fn read(&self, name: &str) -> Result<Option<String>, Error> {
        Ok(self.inner.read().await.get(name).cloned())
    }
}
