//! Trait for the external media tool

use super::process::StageProcess;
use crate::error::Result;
use crate::types::MediaMetadata;
use async_trait::async_trait;
use std::path::Path;

/// Interface to the external fetch+mux tool
///
/// Stage 1 ([`fetch_metadata`](Self::fetch_metadata)) runs to completion and
/// returns the decoded metadata. Dropping its future before it resolves must
/// terminate the underlying process.
///
/// Stage 2 ([`start_fetch`](Self::start_fetch)) returns the running process
/// so the caller can stream its output, wait for it, or terminate it.
#[async_trait]
pub trait MediaTool: Send + Sync {
    /// Retrieve metadata for `source`
    ///
    /// # Errors
    ///
    /// - [`Error::UpstreamTool`](crate::Error::UpstreamTool) when the process exits non-zero
    /// - [`Error::MetadataParse`](crate::Error::MetadataParse) when the output is not valid metadata
    /// - [`Error::ExternalTool`](crate::Error::ExternalTool) when the process cannot be launched
    async fn fetch_metadata(&self, source: &str) -> Result<MediaMetadata>;

    /// Launch the fetch+mux stage writing the final artifact to `output`
    async fn start_fetch(&self, source: &str, output: &Path) -> Result<StageProcess>;

    /// Human-readable name for logs
    fn name(&self) -> &str;
}
