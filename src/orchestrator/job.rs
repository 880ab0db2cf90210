//! Per-job state machine and stage drivers.

use super::{Delivery, JobOrchestrator, JobOutcome, JobRequest, content_type_for};
use crate::error::{Error, Result};
use crate::progress::{Observation, ProgressParser};
use crate::storage::ArtifactGuard;
use crate::tool::{OutputStream, StageProcess};
use crate::types::{ClientId, Event, JobState, MediaMetadata, StageKind, sanitize_title};
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Mutable state of one job
#[derive(Debug)]
pub(super) struct Job {
    pub(super) client_id: ClientId,
    pub(super) source: String,
    pub(super) state: JobState,
    pub(super) progress: f32,
    pub(super) title: Option<String>,
    pub(super) artifact: Option<ArtifactGuard>,
}

impl Job {
    pub(super) fn new(request: JobRequest) -> Self {
        Self {
            client_id: request.client_id,
            source: request.source,
            state: JobState::Created,
            progress: 0.0,
            title: None,
            artifact: None,
        }
    }

    /// Move to `next`, rejecting transitions the lifecycle does not allow
    pub(super) fn transition(&mut self, next: JobState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(Error::Internal(format!(
                "illegal job transition {:?} -> {:?}",
                self.state, next
            )));
        }
        if self.state != next {
            tracing::debug!(client_id = %self.client_id, from = ?self.state, to = ?next, "job state changed");
        }
        self.state = next;
        Ok(())
    }

    /// Enter a terminal failure or cancellation state
    fn finish(&mut self, terminal: JobState) {
        if self.state.can_transition_to(terminal) {
            self.state = terminal;
        }
    }

    fn artifact_path(&self) -> Option<PathBuf> {
        self.artifact.as_ref().map(|a| a.path().to_path_buf())
    }
}

/// One progress parser per output stream
#[derive(Default)]
struct StreamParsers {
    stdout: ProgressParser,
    stderr: ProgressParser,
}

impl StreamParsers {
    fn feed(&mut self, stream: OutputStream, bytes: &[u8]) -> Vec<Observation> {
        match stream {
            OutputStream::Stdout => self.stdout.feed(bytes),
            OutputStream::Stderr => self.stderr.feed(bytes),
        }
    }

    fn finish(&mut self) -> Vec<Observation> {
        let mut observations = self.stdout.finish();
        observations.extend(self.stderr.finish());
        observations
    }
}

impl JobOrchestrator {
    /// Run one job to its end
    ///
    /// Returns [`JobOutcome::Delivered`] when both stages succeed and
    /// [`JobOutcome::Cancelled`] when `cancel` fires first. On failure exactly
    /// one `error` event has been published and the error is returned so the
    /// caller can answer the request. Every path terminates the running
    /// stage and deletes the artifact unless it was handed to the delivery.
    pub async fn run_job(
        &self,
        request: JobRequest,
        cancel: CancellationToken,
    ) -> Result<JobOutcome> {
        let _active = self.track(&cancel);
        let mut job = Job::new(request);

        tracing::info!(client_id = %job.client_id, source = %job.source, tool = self.tool.name(), "job started");

        let result = self.drive(&mut job, &cancel).await;

        match result {
            Ok(Some(delivery)) => {
                tracing::info!(client_id = %job.client_id, title = ?job.title, filename = %delivery.filename, "job completed");
                Ok(JobOutcome::Delivered(delivery))
            }
            Ok(None) => {
                job.finish(JobState::Cancelled);
                self.discard_artifact(&mut job).await;
                tracing::info!(client_id = %job.client_id, "job cancelled, requester disconnected");
                Ok(JobOutcome::Cancelled)
            }
            Err(e) => {
                job.finish(JobState::Failed);
                self.discard_artifact(&mut job).await;

                if e.is_upstream() {
                    tracing::warn!(client_id = %job.client_id, error = %e, "job failed");
                } else {
                    tracing::error!(client_id = %job.client_id, error = %e, "job failed");
                }

                // A requester that already left gets no events
                if !cancel.is_cancelled() {
                    self.registry.publish(
                        &job.client_id,
                        Event::Error {
                            message: e.event_message().to_string(),
                        },
                    );
                }
                Err(e)
            }
        }
    }

    /// Walk the job through both stages; `Ok(None)` means cancelled
    async fn drive(&self, job: &mut Job, cancel: &CancellationToken) -> Result<Option<Delivery>> {
        job.transition(JobState::FetchingMetadata)?;
        self.publish(job, cancel, Event::FetchingInfo { progress: 0.0 });

        let Some(metadata) = self.fetch_metadata(job, cancel).await? else {
            return Ok(None);
        };

        let title = sanitize_title(&metadata.title);
        let path = self.store.allocate(&job.client_id, &self.artifact_extension);
        job.artifact = Some(ArtifactGuard::new(path.clone()));
        job.title = Some(title.clone());
        job.progress = 0.0;
        job.transition(JobState::Downloading)?;

        tracing::debug!(client_id = %job.client_id, title = %title, path = %path.display(), "metadata received");
        self.publish(
            job,
            cancel,
            Event::Downloading {
                progress: 0.0,
                title: Some(title.clone()),
            },
        );

        if cancel.is_cancelled() {
            return Ok(None);
        }
        let process = self.tool.start_fetch(&job.source, &path).await?;
        if !self.run_fetch(job, process, cancel).await? {
            return Ok(None);
        }

        match tokio::fs::metadata(&path).await {
            Ok(m) if m.is_file() => {}
            _ => {
                return Err(Error::Internal(format!(
                    "fetch+mux stage exited successfully but {} was not produced",
                    path.display()
                )));
            }
        }

        job.transition(JobState::Completed)?;
        job.progress = 100.0;
        self.publish(job, cancel, Event::Completed { progress: 100.0 });

        let artifact = job
            .artifact
            .take()
            .ok_or_else(|| Error::Internal("artifact ownership lost before delivery".to_string()))?;

        Ok(Some(Delivery {
            artifact,
            filename: format!("{}.{}", title, self.artifact_extension),
            title,
            content_type: content_type_for(&self.artifact_extension),
        }))
    }

    /// Stage 1; `Ok(None)` means cancelled
    ///
    /// Dropping the metadata future on cancellation or timeout kills the
    /// process.
    async fn fetch_metadata(
        &self,
        job: &Job,
        cancel: &CancellationToken,
    ) -> Result<Option<MediaMetadata>> {
        let fetch = self.tool.fetch_metadata(&job.source);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Ok(None),
            result = with_stage_timeout(self.stage_timeout, StageKind::Metadata, fetch) => result.map(Some),
        }
    }

    /// Stage 2; `Ok(false)` means cancelled
    async fn run_fetch(
        &self,
        job: &mut Job,
        mut process: StageProcess,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let limit = self.stage_timeout;
        let timer = async move {
            match limit {
                Some(after) => tokio::time::sleep(after).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(timer);

        let mut parsers = StreamParsers::default();

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    process.terminate();
                    return Ok(false);
                }
                _ = &mut timer => {
                    process.terminate();
                    return Err(timed_out(StageKind::FetchMux, limit));
                }
                chunk = process.next_output() => match chunk {
                    Some(chunk) => {
                        let observations = parsers.feed(chunk.stream, &chunk.bytes);
                        self.apply_observations(job, observations, cancel)?;
                    }
                    None => break,
                },
            }
        }

        let observations = parsers.finish();
        self.apply_observations(job, observations, cancel)?;

        let status = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                process.terminate();
                return Ok(false);
            }
            _ = &mut timer => {
                process.terminate();
                return Err(timed_out(StageKind::FetchMux, limit));
            }
            status = process.wait() => status?,
        };

        if !status.success() {
            return Err(Error::UpstreamTool {
                stage: StageKind::FetchMux,
                exit_code: status.code(),
                message: process.stderr_tail(),
            });
        }

        Ok(true)
    }

    fn apply_observations(
        &self,
        job: &mut Job,
        observations: Vec<Observation>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        for observation in observations {
            match (observation, job.state) {
                (Observation::Percent(percent), JobState::Downloading) => {
                    job.transition(JobState::Downloading)?;
                    job.progress = percent.clamp(0.0, 100.0);
                    self.publish(
                        job,
                        cancel,
                        Event::Downloading {
                            progress: job.progress,
                            title: None,
                        },
                    );
                }
                (Observation::MergeStarted, JobState::Downloading) => {
                    job.transition(JobState::Merging)?;
                    job.progress = 100.0;
                    self.publish(job, cancel, Event::Merging { progress: 100.0 });
                }
                // Once merging, further download lines belong to the same mux step
                _ => {}
            }
        }
        Ok(())
    }

    fn publish(&self, job: &Job, cancel: &CancellationToken, event: Event) {
        if cancel.is_cancelled() {
            return;
        }
        tracing::trace!(client_id = %job.client_id, status = event.status(), "publishing event");
        self.registry.publish(&job.client_id, event);
    }

    async fn discard_artifact(&self, job: &mut Job) {
        let Some(path) = job.artifact_path() else {
            return;
        };
        if let Err(e) = self.store.purge(&path).await {
            tracing::warn!(client_id = %job.client_id, path = %path.display(), error = %e, "failed to delete artifact");
        }
        // The guard removes the main file even if the purge failed
        job.artifact = None;
    }
}

async fn with_stage_timeout<T, F>(limit: Option<Duration>, stage: StageKind, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match limit {
        Some(after) => tokio::time::timeout(after, future)
            .await
            .map_err(|_| Error::StageTimeout { stage, after })?,
        None => future.await,
    }
}

fn timed_out(stage: StageKind, limit: Option<Duration>) -> Error {
    Error::StageTimeout {
        stage,
        after: limit.unwrap_or_default(),
    }
}
