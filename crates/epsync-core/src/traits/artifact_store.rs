// # Artifact Store Trait
//
// Materializes the list files that device data-group objects read from.
// Artifacts are always regenerated in full; there is no patching.

use std::path::PathBuf;

use async_trait::async_trait;

/// Trait for artifact store implementations
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Overwrite the named artifact with `content`
    ///
    /// # Returns
    ///
    /// The location the device should read the artifact from.
    async fn write(&self, name: &str, content: &str) -> Result<PathBuf, crate::Error>;

    /// Read the named artifact back, if present
    async fn read(&self, name: &str) -> Result<Option<String>, crate::Error>;
}
