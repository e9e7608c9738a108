//! Advisory pass lock
//!
//! Passes read and write shared files and device objects without any other
//! coordination, so two overlapping runs (a slow pass and the next scheduled
//! one) must not both proceed. The lock is a file created exclusively in the
//! work directory and removed when the guard drops.
//!
//! A lock older than the stale threshold is assumed to belong to a process
//! that died without cleaning up and is replaced.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::Error;

/// Held for the duration of a pass
#[derive(Debug)]
pub struct PassLock {
    path: PathBuf,
}

impl PassLock {
    /// Acquire the lock at `path`
    ///
    /// # Errors
    ///
    /// - [`Error::Locked`] if a fresh lock is held by someone else
    /// - [`Error::Persistence`] if the lock file cannot be created
    pub async fn acquire(path: impl AsRef<Path>, stale_after: Duration) -> Result<Self, Error> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await.map_err(|e| {
                    Error::persistence(format!(
                        "Failed to create lock directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        match Self::try_create(path).await {
            Ok(lock) => return Ok(lock),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
            Err(e) => {
                return Err(Error::persistence(format!(
                    "Failed to create lock file {}: {}",
                    path.display(),
                    e
                )));
            }
        }

        let acquired_at = lock_time(path).await?;
        let age = Utc::now().signed_duration_since(acquired_at);
        let stale = age.to_std().unwrap_or(Duration::ZERO) >= stale_after;

        if !stale {
            let holder = fs::read_to_string(path).await.unwrap_or_default();
            return Err(Error::locked(format!(
                "{} held since {} ({})",
                path.display(),
                acquired_at.to_rfc3339(),
                holder.trim()
            )));
        }

        warn!(
            "Replacing stale lock {} from {} ({}s old)",
            path.display(),
            acquired_at.to_rfc3339(),
            age.num_seconds()
        );
        retire_stale(path, acquired_at).await?;

        // Another process may have replaced it first
        Self::try_create(path).await.map_err(|e| {
            if e.kind() == ErrorKind::AlreadyExists {
                Error::locked(format!("{} was taken over by another pass", path.display()))
            } else {
                Error::persistence(format!(
                    "Failed to create lock file {}: {}",
                    path.display(),
                    e
                ))
            }
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn try_create(path: &Path) -> std::io::Result<Self> {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await?;

        // The guard owns the file from here on, so a failed write still
        // removes it on drop.
        let lock = Self {
            path: path.to_path_buf(),
        };
        let stamp = format!("pid {} at {}\n", std::process::id(), Utc::now().to_rfc3339());
        file.write_all(stamp.as_bytes()).await?;
        file.flush().await?;

        debug!("Acquired pass lock {}", path.display());
        Ok(lock)
    }
}

impl Drop for PassLock {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Released pass lock {}", self.path.display()),
            Err(e) => warn!("Failed to remove pass lock {}: {}", self.path.display(), e),
        }
    }
}

/// Move the stale lock at `path` out of the way
///
/// The lock is renamed aside rather than removed, so that only the file
/// judged stale is retired. If the file moved aside is not that lock
/// (another pass replaced it in the meantime), it is linked back and
/// [`Error::Locked`] is returned.
async fn retire_stale(path: &Path, judged_at: DateTime<Utc>) -> Result<(), Error> {
    let mut aside = path.as_os_str().to_owned();
    aside.push(format!(".stale.{}", std::process::id()));
    let aside = PathBuf::from(aside);

    match fs::rename(path, &aside).await {
        Ok(()) => {}
        // Already retired by another pass
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => {
            return Err(Error::persistence(format!(
                "Failed to retire stale lock {}: {}",
                path.display(),
                e
            )));
        }
    }

    let moved_at = lock_time(&aside).await;
    if moved_at.as_ref().is_ok_and(|t| *t == judged_at) {
        if let Err(e) = fs::remove_file(&aside).await {
            warn!("Failed to remove retired lock {}: {}", aside.display(), e);
        }
        return Ok(());
    }

    match fs::hard_link(&aside, path).await {
        Ok(()) => {
            if let Err(e) = fs::remove_file(&aside).await {
                warn!("Failed to remove {}: {}", aside.display(), e);
            }
        }
        Err(e) => warn!(
            "Failed to restore lock {} from {}: {}",
            path.display(),
            aside.display(),
            e
        ),
    }
    Err(Error::locked(format!(
        "{} was taken over by another pass",
        path.display()
    )))
}

/// When the lock at `path` was taken, judged by its modification time
async fn lock_time(path: &Path) -> Result<DateTime<Utc>, Error> {
    let modified = fs::metadata(path)
        .await
        .and_then(|meta| meta.modified())
        .map_err(|e| {
            Error::persistence(format!("Failed to inspect lock {}: {}", path.display(), e))
        })?;
    Ok(DateTime::<Utc>::from(modified))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const STALE: Duration = Duration::from_secs(1800);

    #[tokio::test]
    async fn lock_is_exclusive_and_released_on_drop() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("epsync.lock");

        let lock = PassLock::acquire(&path, STALE).await.unwrap();
        assert!(path.exists());
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with(&format!("pid {} at ", std::process::id())));

        let second = PassLock::acquire(&path, STALE).await;
        assert!(matches!(second, Err(Error::Locked(_))));

        drop(lock);
        assert!(!path.exists());

        let _again = PassLock::acquire(&path, STALE).await.unwrap();
    }

    #[tokio::test]
    async fn stale_lock_is_replaced() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("epsync.lock");
        std::fs::write(&path, "pid 1 at 1970-01-01T00:00:00Z\n").unwrap();

        // Any existing lock is stale with a zero threshold
        let lock = PassLock::acquire(&path, Duration::ZERO).await.unwrap();
        let content = std::fs::read_to_string(lock.path()).unwrap();
        assert!(content.starts_with(&format!("pid {} ", std::process::id())));
    }

    #[tokio::test]
    async fn replaced_lock_is_not_retired() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("epsync.lock");
        std::fs::write(&path, "pid 42 at now\n").unwrap();

        // Judged stale from an older file that has since been replaced
        let judged_at = DateTime::<Utc>::from(std::time::UNIX_EPOCH);
        let err = retire_stale(&path, judged_at).await.unwrap_err();

        assert!(matches!(err, Error::Locked(_)), "got {err:?}");
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "pid 42 at now\n");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn judged_lock_is_retired() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("epsync.lock");
        std::fs::write(&path, "pid 1 at then\n").unwrap();

        let judged_at = lock_time(&path).await.unwrap();
        retire_stale(&path, judged_at).await.unwrap();

        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn lock_directory_is_created() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("epsync.lock");

        let lock = PassLock::acquire(&path, STALE).await.unwrap();
        assert_eq!(lock.path(), path.as_path());
    }
}
