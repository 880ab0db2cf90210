//! # convert-relay
//!
//! Media conversion relay: accepts a source reference over HTTP, drives an
//! external yt-dlp compatible tool through a metadata stage and a fetch+mux
//! stage, pushes live progress to the requester over server-sent events and
//! finally streams the produced file back before deleting it.
//!
//! ## Components
//!
//! - [`registry::ClientChannelRegistry`] - at most one push channel per client id
//! - [`progress::ProgressParser`] - line-buffered progress extraction from tool output
//! - [`storage::TempArtifactStore`] - artifact paths, deletion and periodic reaping
//! - [`orchestrator::JobOrchestrator`] - the per-job state machine
//! - [`api`] - the HTTP surface
//!
//! ## Quick Start
//!
//! ```no_run
//! use convert_relay::{Config, serve_with_shutdown};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!
//!     // Serves until SIGTERM/SIGINT, then cancels running jobs
//!     serve_with_shutdown(config).await?;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// HTTP API module
pub mod api;
/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Job orchestration
pub mod orchestrator;
/// Progress parsing
pub mod progress;
/// Push channel registry
pub mod registry;
/// Temporary artifact storage
pub mod storage;
/// External tool integration
pub mod tool;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use api::AppState;
pub use config::Config;
pub use error::{ApiError, Error, Result, ToHttpStatus};
pub use orchestrator::{Delivery, JobOrchestrator, JobOutcome, JobRequest};
pub use progress::{Observation, ProgressParser};
pub use registry::{ChannelHandle, ClientChannelRegistry};
pub use storage::{ArtifactGuard, TempArtifactStore};
pub use tool::{CliMediaTool, MediaTool};
pub use types::{ClientId, Event, JobState, MediaMetadata, StageKind};

use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// The long-lived services a relay instance is made of
///
/// The orchestrator shares the registry and store held here.
#[derive(Clone)]
pub struct RelayServices {
    /// Push channels keyed by client id
    pub registry: Arc<ClientChannelRegistry>,
    /// Artifact storage under the configured temp root
    pub store: Arc<TempArtifactStore>,
    /// Job orchestrator
    pub orchestrator: Arc<JobOrchestrator>,
}

impl RelayServices {
    /// Build the services from configuration
    ///
    /// Locates the external tool and creates the temp root.
    ///
    /// # Errors
    ///
    /// Fails if the tool cannot be found or the temp root cannot be created.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let tool = CliMediaTool::from_config(&config.tools)?;
        tracing::info!(binary = %tool.binary_path().display(), "using external media tool");

        let services = Self::with_tool(config, Arc::new(tool));
        services.store.ensure_root().await?;
        Ok(services)
    }

    /// Build the services around an explicit tool
    pub fn with_tool(config: &Config, tool: Arc<dyn MediaTool>) -> Self {
        let registry = Arc::new(ClientChannelRegistry::new());
        let store = Arc::new(TempArtifactStore::new(config.storage.temp_dir.clone()));
        let orchestrator = Arc::new(JobOrchestrator::new(
            config,
            registry.clone(),
            store.clone(),
            tool,
        ));
        Self {
            registry,
            store,
            orchestrator,
        }
    }
}

/// Run the relay until `shutdown` resolves
///
/// Starts the reaper and the API server. On shutdown, running jobs are
/// cancelled, push channels are closed so the server can drain, and the
/// reaper is stopped.
pub async fn serve<F>(config: Arc<Config>, services: RelayServices, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    config.validate()?;

    // Leftovers from a previous run
    match services.store.sweep(config.storage.max_artifact_age).await {
        Ok(0) => {}
        Ok(n) => tracing::info!(removed = n, "removed stale artifacts at startup"),
        Err(e) => tracing::warn!(error = %e, "startup sweep failed"),
    }

    let reaper_cancel = CancellationToken::new();
    let reaper = storage::spawn_reaper(
        services.store.clone(),
        config.storage.reap_interval,
        config.storage.max_artifact_age,
        reaper_cancel.clone(),
    );

    let state = AppState::new(services.orchestrator.clone(), config.clone());
    let stop = {
        let orchestrator = services.orchestrator.clone();
        let registry = services.registry.clone();
        async move {
            shutdown.await;
            tracing::info!("Initiating graceful shutdown");
            orchestrator.shutdown();
            registry.close_all();
        }
    };

    let result = api::start_api_server(state, stop).await;

    reaper_cancel.cancel();
    if let Err(e) = reaper.await {
        tracing::warn!(error = %e, "reaper task ended abnormally");
    }

    result
}

/// Helper function to run the relay with graceful signal handling.
///
/// Builds the services from `config` and serves until a termination signal.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
pub async fn serve_with_shutdown(config: Config) -> Result<()> {
    let services = RelayServices::from_config(&config).await?;
    serve(Arc::new(config), services, wait_for_signal()).await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
