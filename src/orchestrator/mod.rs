//! Job orchestration
//!
//! [`JobOrchestrator`] drives one job per conversion request through its
//! lifecycle:
//!
//! ```text
//! Created -> FetchingMetadata -> Downloading -> Merging -> Completed
//!                   |                 |            |
//!                   +--> Failed <-----+------------+
//!        (any non-terminal state) --> Cancelled
//! ```
//!
//! Lifecycle events go out through the [`ClientChannelRegistry`]; the
//! artifact path comes from the [`TempArtifactStore`]. The job split:
//! - [`job`] - the per-job state machine and stage drivers
//! - this module - shared services, active job tracking and shutdown
//!
//! Cancellation is cooperative: the caller hands in a [`CancellationToken`]
//! and cancels it when the requester goes away. The job notices at its next
//! suspension point, terminates the running stage, deletes the artifact and
//! publishes nothing further.

mod job;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(all(test, unix))]
pub(crate) mod test_helpers;

use crate::config::Config;
use crate::registry::ClientChannelRegistry;
use crate::storage::{ArtifactGuard, TempArtifactStore};
use crate::tool::MediaTool;
use crate::types::ClientId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// A conversion request accepted for processing
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobRequest {
    /// Source reference handed to the external tool (non-empty)
    pub source: String,
    /// Routing key for events and artifact naming
    pub client_id: ClientId,
}

impl JobRequest {
    /// Create a request
    pub fn new(source: impl Into<String>, client_id: ClientId) -> Self {
        Self {
            source: source.into(),
            client_id,
        }
    }
}

/// How a job ended, when it did not fail
#[derive(Debug)]
pub enum JobOutcome {
    /// Both stages succeeded; the artifact is ready to stream
    Delivered(Delivery),
    /// The requester went away before completion
    Cancelled,
}

/// A finished artifact handed to the delivery path
///
/// The artifact file is deleted when `artifact` is dropped, so whoever
/// streams it must keep the guard alive until the transfer ends.
#[derive(Debug)]
pub struct Delivery {
    /// Owns the file on disk
    pub artifact: ArtifactGuard,
    /// Sanitized title from the metadata stage
    pub title: String,
    /// Download filename, `{title}.{ext}`
    pub filename: String,
    /// MIME type for the response
    pub content_type: &'static str,
}

/// Orchestrates conversion jobs
///
/// Cheap to share behind an [`Arc`]; every job runs on the caller's task.
pub struct JobOrchestrator {
    registry: Arc<ClientChannelRegistry>,
    store: Arc<TempArtifactStore>,
    tool: Arc<dyn MediaTool>,
    artifact_extension: String,
    stage_timeout: Option<Duration>,
    active_jobs: Mutex<HashMap<u64, CancellationToken>>,
    next_job_id: AtomicU64,
}

impl JobOrchestrator {
    /// Create an orchestrator over the given services
    pub fn new(
        config: &Config,
        registry: Arc<ClientChannelRegistry>,
        store: Arc<TempArtifactStore>,
        tool: Arc<dyn MediaTool>,
    ) -> Self {
        Self {
            registry,
            store,
            tool,
            artifact_extension: config.artifact_extension().to_string(),
            stage_timeout: config.tools.stage_timeout,
            active_jobs: Mutex::new(HashMap::new()),
            next_job_id: AtomicU64::new(1),
        }
    }

    /// The push channel registry events are published to
    pub fn registry(&self) -> &Arc<ClientChannelRegistry> {
        &self.registry
    }

    /// The artifact store
    pub fn store(&self) -> &Arc<TempArtifactStore> {
        &self.store
    }

    /// Number of jobs currently running
    pub fn active_job_count(&self) -> usize {
        self.active_jobs().len()
    }

    /// Cancel every running job
    ///
    /// Jobs observe the cancellation at their next suspension point and wind
    /// down as if their requester had disconnected.
    pub fn shutdown(&self) {
        let jobs = self.active_jobs();
        if !jobs.is_empty() {
            tracing::info!(count = jobs.len(), "cancelling active jobs");
        }
        for token in jobs.values() {
            token.cancel();
        }
    }

    fn track(&self, cancel: &CancellationToken) -> ActiveJob<'_> {
        let id = self.next_job_id.fetch_add(1, Ordering::Relaxed);
        self.active_jobs().insert(id, cancel.clone());
        ActiveJob {
            orchestrator: self,
            id,
        }
    }

    fn active_jobs(&self) -> MutexGuard<'_, HashMap<u64, CancellationToken>> {
        self.active_jobs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Removes a job from the active set when it ends, however it ends
struct ActiveJob<'a> {
    orchestrator: &'a JobOrchestrator,
    id: u64,
}

impl Drop for ActiveJob<'_> {
    fn drop(&mut self) {
        self.orchestrator.active_jobs().remove(&self.id);
    }
}

/// MIME type for an artifact extension
pub fn content_type_for(extension: &str) -> &'static str {
    match extension.to_ascii_lowercase().as_str() {
        "mp4" | "m4v" => "video/mp4",
        "mkv" => "video/x-matroska",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        "m4a" => "audio/mp4",
        "mp3" => "audio/mpeg",
        "opus" | "ogg" => "audio/ogg",
        _ => "application/octet-stream",
    }
}
