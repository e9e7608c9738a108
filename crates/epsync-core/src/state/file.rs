// # File State Store
//
// File-based implementation of StateStore and ArtifactStore.
//
// ## Purpose
//
// Keeps the client identity and last observed version across passes, and
// materializes the data-group list files the device reads.
//
// ## Crash Recovery
//
// - Atomic writes: content goes to a temporary file which is then renamed
//   over the target, so a killed pass never leaves a half-written file
// - Garbage in a state file is not an error here; the identity store and
//   version tracker replace malformed values on the next pass
//
// ## File Format
//
// State files hold a single line:
//
// ```text
// guid.txt           0a1b2c3d-4e5f-4a6b-8c7d-9e0f1a2b3c4d
// o365_version.txt   2024010100
// ```

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::Error;
use crate::config::StorageConfig;
use crate::traits::{ArtifactStore, StateKey, StateStore};

/// File-based state store
///
/// One file per [`StateKey`] inside a work directory, created on first use.
///
/// # Example
///
/// ```rust,no_run
/// use epsync_core::state::FileStateStore;
/// use epsync_core::traits::{StateKey, StateStore};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = FileStateStore::new("/var/tmp/o365", "guid.txt", "o365_version.txt").await?;
///
///     store.store(StateKey::LastVersion, "2024010100").await?;
///     assert_eq!(store.load(StateKey::LastVersion).await?.as_deref(), Some("2024010100"));
///
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct FileStateStore {
    identity_path: PathBuf,
    version_path: PathBuf,
}

impl FileStateStore {
    /// Create a file state store, creating the work directory if needed
    pub async fn new<P: AsRef<Path>>(
        work_dir: P,
        identity_file: &str,
        version_file: &str,
    ) -> Result<Self, Error> {
        let work_dir = work_dir.as_ref();
        ensure_dir(work_dir).await?;

        Ok(Self {
            identity_path: work_dir.join(identity_file),
            version_path: work_dir.join(version_file),
        })
    }

    pub async fn from_config(storage: &StorageConfig) -> Result<Self, Error> {
        Self::new(&storage.work_dir, &storage.identity_file, &storage.version_file).await
    }

    /// Path of the file backing a key
    pub fn path_for(&self, key: StateKey) -> &Path {
        match key {
            StateKey::ClientIdentity => &self.identity_path,
            StateKey::LastVersion => &self.version_path,
        }
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn load(&self, key: StateKey) -> Result<Option<String>, Error> {
        let path = self.path_for(key);
        let content = match fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!("State file does not exist: {}", path.display());
                return Ok(None);
            }
            Err(e) if e.kind() == ErrorKind::InvalidData => {
                tracing::warn!("State file {} is not valid UTF-8, ignoring", path.display());
                return Ok(None);
            }
            Err(e) => {
                return Err(Error::persistence(format!(
                    "Failed to read {} file {}: {}",
                    key,
                    path.display(),
                    e
                )));
            }
        };

        let line = content.lines().next().unwrap_or("").trim();
        if line.is_empty() {
            return Ok(None);
        }
        Ok(Some(line.to_string()))
    }

    async fn store(&self, key: StateKey, value: &str) -> Result<(), Error> {
        let path = self.path_for(key);
        write_atomic(path, &format!("{value}\n")).await?;
        tracing::trace!("Stored {} in {}", key, path.display());
        Ok(())
    }
}

/// File-based artifact store
///
/// Artifacts live in the work directory. The returned path is absolute, as
/// the device resolves it independently of our working directory.
#[derive(Debug, Clone)]
pub struct FileArtifactStore {
    dir: PathBuf,
}

impl FileArtifactStore {
    pub async fn new<P: AsRef<Path>>(dir: P) -> Result<Self, Error> {
        let dir = dir.as_ref();
        ensure_dir(dir).await?;
        let dir = fs::canonicalize(dir).await.map_err(|e| {
            Error::persistence(format!(
                "Failed to resolve artifact directory {}: {}",
                dir.display(),
                e
            ))
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl ArtifactStore for FileArtifactStore {
    async fn write(&self, name: &str, content: &str) -> Result<PathBuf, Error> {
        let path = self.dir.join(name);
        write_atomic(&path, content).await?;
        Ok(path)
    }

    async fn read(&self, name: &str) -> Result<Option<String>, Error> {
        let path = self.dir.join(name);
        match fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::persistence(format!(
                "Failed to read artifact {}: {}",
                path.display(),
                e
            ))),
        }
    }
}

async fn ensure_dir(dir: &Path) -> Result<(), Error> {
    if dir.as_os_str().is_empty() || fs::try_exists(dir).await.unwrap_or(false) {
        return Ok(());
    }

    fs::create_dir_all(dir).await.map_err(|e| {
        Error::persistence(format!(
            "Failed to create work directory {}: {}",
            dir.display(),
            e
        ))
    })?;
    tracing::info!("Created work directory {}", dir.display());
    Ok(())
}

/// Write-then-rename so readers never observe a partial file
///
/// The temp file is removed again if any step fails.
pub(crate) async fn write_atomic(path: &Path, content: &str) -> Result<(), Error> {
    let mut temp_path = path.as_os_str().to_owned();
    temp_path.push(".tmp");
    let temp_path = PathBuf::from(temp_path);

    let result = write_then_rename(&temp_path, path, content).await;
    if result.is_err() {
        match fs::remove_file(&temp_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Failed to remove temp file {}: {}", temp_path.display(), e),
        }
    }
    result
}

async fn write_then_rename(temp_path: &Path, path: &Path, content: &str) -> Result<(), Error> {
    let mut file = fs::File::create(temp_path).await.map_err(|e| {
        Error::persistence(format!(
            "Failed to create temp file {}: {}",
            temp_path.display(),
            e
        ))
    })?;

    file.write_all(content.as_bytes()).await.map_err(|e| {
        Error::persistence(format!(
            "Failed to write to temp file {}: {}",
            temp_path.display(),
            e
        ))
    })?;

    file.sync_all().await.map_err(|e| {
        Error::persistence(format!(
            "Failed to flush temp file {}: {}",
            temp_path.display(),
            e
        ))
    })?;
    drop(file);

    fs::rename(temp_path, path).await.map_err(|e| {
        Error::persistence(format!(
            "Failed to rename {} to {}: {}",
            temp_path.display(),
            path.display(),
            e
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_file_store_basic() {
        let dir = tempdir().unwrap();
        let work_dir = dir.path().join("o365");

        let store = FileStateStore::new(&work_dir, "guid.txt", "version.txt")
            .await
            .unwrap();
        assert!(work_dir.is_dir(), "work directory should be created");

        assert_eq!(store.load(StateKey::LastVersion).await.unwrap(), None);

        store.store(StateKey::LastVersion, "2024010100").await.unwrap();
        assert_eq!(
            store.load(StateKey::LastVersion).await.unwrap().as_deref(),
            Some("2024010100")
        );
        assert_eq!(
            std::fs::read_to_string(work_dir.join("version.txt")).unwrap(),
            "2024010100\n"
        );

        // Load new instance and verify persistence
        let store2 = FileStateStore::new(&work_dir, "guid.txt", "version.txt")
            .await
            .unwrap();
        assert_eq!(
            store2.load(StateKey::LastVersion).await.unwrap().as_deref(),
            Some("2024010100")
        );
        assert_eq!(store2.load(StateKey::ClientIdentity).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_file_store_reads_first_line_only() {
        let dir = tempdir().unwrap();
        let store = FileStateStore::new(dir.path(), "guid.txt", "version.txt")
            .await
            .unwrap();

        std::fs::write(dir.path().join("guid.txt"), "  abc \nsecond line\n").unwrap();
        assert_eq!(
            store.load(StateKey::ClientIdentity).await.unwrap().as_deref(),
            Some("abc")
        );

        std::fs::write(dir.path().join("version.txt"), "\n").unwrap();
        assert_eq!(store.load(StateKey::LastVersion).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_file_store_atomic_write() {
        let dir = tempdir().unwrap();
        let store = FileStateStore::new(dir.path(), "guid.txt", "version.txt")
            .await
            .unwrap();

        for i in 0..10 {
            store
                .store(StateKey::LastVersion, &format!("202401010{i}"))
                .await
                .unwrap();
        }

        assert_eq!(
            store.load(StateKey::LastVersion).await.unwrap().as_deref(),
            Some("2024010109")
        );
        assert!(!dir.path().join("version.txt.tmp").exists());
    }

    #[tokio::test]
    async fn test_failed_write_leaves_no_temp_file() {
        let dir = tempdir().unwrap();
        // A non-empty directory in place of the target makes the rename fail
        let target = dir.path().join("o365_urls.txt");
        std::fs::create_dir(&target).unwrap();
        std::fs::write(target.join("keep"), "x").unwrap();

        let err = write_atomic(&target, "outlook.com := 1,\n").await.unwrap_err();

        assert!(matches!(err, Error::Persistence(_)), "got {err:?}");
        assert!(!dir.path().join("o365_urls.txt.tmp").exists());
        assert!(target.join("keep").exists());
    }

    #[tokio::test]
    async fn test_artifact_store_overwrites_in_full() {
        let dir = tempdir().unwrap();
        let artifacts = FileArtifactStore::new(dir.path().join("lists")).await.unwrap();

        let path = artifacts
            .write("ip4.txt", "network 10.0.0.0/8,\nnetwork 10.1.0.0/16,\n")
            .await
            .unwrap();
        assert!(path.is_absolute());

        let again = artifacts.write("ip4.txt", "network 10.0.0.0/8,\n").await.unwrap();
        assert_eq!(path, again);
        assert_eq!(
            artifacts.read("ip4.txt").await.unwrap().as_deref(),
            Some("network 10.0.0.0/8,\n")
        );
        assert_eq!(artifacts.read("missing.txt").await.unwrap(), None);
    }
}
