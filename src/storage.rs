//! Temporary artifact storage
//!
//! Artifacts live under a single temp root and are named
//! `{client}_{timestamp_millis}.{ext}`. The store hands out paths, deletes
//! them when a job is done with them, and sweeps entries that outlived the
//! age threshold (orphans of crashed or abandoned jobs).

use crate::error::{Error, Result};
use crate::types::ClientId;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, SystemTime};
use tokio_util::sync::CancellationToken;

/// Allocates, deletes and reaps artifact paths under one root directory
#[derive(Debug)]
pub struct TempArtifactStore {
    root: PathBuf,
    last_stamp: AtomicI64,
}

impl TempArtifactStore {
    /// Create a store rooted at `root` (the directory is not created yet)
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            last_stamp: AtomicI64::new(0),
        }
    }

    /// The temp root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the temp root if it does not exist
    pub async fn ensure_root(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| Error::Config {
                message: format!("cannot create temp dir {}: {}", self.root.display(), e),
                key: Some("temp_dir".to_string()),
            })
    }

    /// Allocate a fresh artifact path for `client_id`
    ///
    /// The timestamp component is strictly increasing across allocations of
    /// this store, and is bumped further if a file with that name already
    /// exists, so two jobs never share a path. Nothing is created on disk.
    pub fn allocate(&self, client_id: &ClientId, extension: &str) -> PathBuf {
        let client = client_id.file_component();
        let mut stamp = self.next_stamp();
        loop {
            let path = self.root.join(format!("{client}_{stamp}.{extension}"));
            if !path.exists() {
                return path;
            }
            stamp = self.next_stamp();
        }
    }

    fn next_stamp(&self) -> i64 {
        let now = chrono::Utc::now().timestamp_millis();
        let previous = self
            .last_stamp
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or_else(|last| last);
        now.max(previous + 1)
    }

    /// Delete `path`; a missing file is not an error
    pub async fn delete(&self, path: &Path) -> Result<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "artifact deleted");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Delete `path` together with the tool's working files for it
    ///
    /// The fetch+mux tool writes intermediates next to the target
    /// (`{stem}.part`, `{stem}.f137.mp4`, ...). Everything in the same
    /// directory whose name starts with `{stem}.` is removed. Returns the
    /// number of files deleted.
    pub async fn purge(&self, path: &Path) -> Result<usize> {
        let (Some(dir), Some(stem)) = (path.parent(), path.file_stem().and_then(|s| s.to_str()))
        else {
            self.delete(path).await?;
            return Ok(0);
        };
        let prefix = format!("{stem}.");

        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(Error::Io(e)),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if !name.to_string_lossy().starts_with(&prefix) {
                continue;
            }
            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %entry.path().display(), error = %e, "failed to delete working file")
                }
            }
        }

        if removed > 0 {
            tracing::debug!(path = %path.display(), removed, "artifact and working files deleted");
        }
        Ok(removed)
    }

    /// Delete every entry under the root whose last modification is older than `max_age`
    ///
    /// Returns how many entries were removed. Entries that vanish mid-sweep
    /// (deleted by their job) are skipped silently.
    pub async fn sweep(&self, max_age: Duration) -> Result<usize> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(Error::Io(e)),
        };

        let now = SystemTime::now();
        let mut removed = 0;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let metadata = match entry.metadata().await {
                Ok(m) => m,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "cannot stat temp entry");
                    continue;
                }
            };

            let Ok(modified) = metadata.modified() else {
                continue;
            };
            // Future mtimes (clock skew) count as fresh
            let age = now.duration_since(modified).unwrap_or_default();
            if age <= max_age {
                continue;
            }

            let result = if metadata.is_dir() {
                tokio::fs::remove_dir_all(&path).await
            } else {
                tokio::fs::remove_file(&path).await
            };
            match result {
                Ok(()) => {
                    removed += 1;
                    tracing::info!(path = %path.display(), age_secs = age.as_secs(), "reaped stale artifact");
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to reap stale artifact");
                }
            }
        }

        Ok(removed)
    }
}

/// Period used when the reaper is handed a zero interval
pub const MIN_REAP_INTERVAL: Duration = Duration::from_secs(1);

/// Spawn the periodic reaper
///
/// Sweeps once per `interval` until `cancel_token` fires. The first sweep
/// happens one full interval after startup. A zero interval is replaced by
/// [`MIN_REAP_INTERVAL`].
pub fn spawn_reaper(
    store: Arc<TempArtifactStore>,
    interval: Duration,
    max_age: Duration,
    cancel_token: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    let interval = if interval.is_zero() {
        tracing::warn!(
            fallback_secs = MIN_REAP_INTERVAL.as_secs(),
            "reap interval must be non-zero, using fallback"
        );
        MIN_REAP_INTERVAL
    } else {
        interval
    };

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match store.sweep(max_age).await {
                        Ok(0) => tracing::trace!("reaper found nothing stale"),
                        Ok(n) => tracing::info!(removed = n, "reaper sweep complete"),
                        Err(e) => tracing::error!(error = %e, "reaper sweep failed"),
                    }
                }
                _ = cancel_token.cancelled() => {
                    tracing::debug!("reaper stopped");
                    break;
                }
            }
        }
    })
}

/// Owns an artifact path and deletes the file when dropped
///
/// Held by whatever currently owns the artifact: the job while stage 2 runs,
/// then the response body while the file streams out. Dropping it on any
/// path (success, failure, cancellation, client abort) removes the file.
#[derive(Debug)]
pub struct ArtifactGuard {
    path: PathBuf,
    armed: bool,
}

impl ArtifactGuard {
    /// Take ownership of `path`
    pub fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    /// The guarded path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the path without deleting it
    pub fn disarm(mut self) -> PathBuf {
        self.armed = false;
        std::mem::take(&mut self.path)
    }
}

impl Drop for ArtifactGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "artifact deleted"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to delete artifact")
            }
        }
    }
}
