//! Application state for the API server

use crate::orchestrator::JobOrchestrator;
use crate::registry::ClientChannelRegistry;
use crate::Config;
use std::sync::Arc;

/// Shared application state accessible to all route handlers
///
/// This struct is cloned for each request (cheap Arc clone) and provides
/// access to the orchestrator, the push channel registry and configuration.
#[derive(Clone)]
pub struct AppState {
    /// Runs conversion jobs
    pub orchestrator: Arc<JobOrchestrator>,

    /// Push channels keyed by client id
    pub registry: Arc<ClientChannelRegistry>,

    /// Configuration (read-only)
    pub config: Arc<Config>,
}

impl AppState {
    /// Create a new AppState
    ///
    /// The registry is taken from the orchestrator so that subscribers and
    /// jobs always meet in the same map.
    pub fn new(orchestrator: Arc<JobOrchestrator>, config: Arc<Config>) -> Self {
        let registry = orchestrator.registry().clone();
        Self {
            orchestrator,
            registry,
            config,
        }
    }
}
