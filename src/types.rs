//! Core types for convert-relay

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Opaque client identifier
///
/// Used as the routing key for push events and as a component of the
/// artifact filename. Supplied by the caller or generated on request.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct ClientId(pub String);

impl ClientId {
    /// Create a new ClientId
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate an id from the current time in milliseconds
    pub fn generate() -> Self {
        Self(chrono::Utc::now().timestamp_millis().to_string())
    }

    /// Get the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Filesystem-safe rendition for use inside artifact names
    ///
    /// Characters outside `[A-Za-z0-9_-]` become `_`.
    pub fn file_component(&self) -> String {
        let safe: String = self
            .0
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        if safe.is_empty() {
            "client".to_string()
        } else {
            safe
        }
    }
}

impl From<&str> for ClientId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ClientId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The two external-process stages of a job
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Metadata retrieval (stage 1)
    Metadata,
    /// Fetch and mux into the artifact (stage 2)
    FetchMux,
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageKind::Metadata => f.write_str("metadata"),
            StageKind::FetchMux => f.write_str("fetch+mux"),
        }
    }
}

/// Lifecycle state of a job
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Accepted, nothing launched yet
    Created,
    /// Stage 1 running
    FetchingMetadata,
    /// Stage 2 running, before the merge marker
    Downloading,
    /// Stage 2 running, merge marker seen
    Merging,
    /// Stage 2 exited zero; artifact handed to delivery
    Completed,
    /// A stage failed
    Failed,
    /// The requester went away
    Cancelled,
}

impl JobState {
    /// Whether no further transitions are possible
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled
        )
    }

    /// Whether `self → next` is a legal transition
    pub fn can_transition_to(self, next: JobState) -> bool {
        use JobState::*;
        match (self, next) {
            (Created, FetchingMetadata) => true,
            (FetchingMetadata, Downloading) | (FetchingMetadata, Failed) => true,
            (Downloading, Downloading) | (Downloading, Merging) => true,
            (Merging, Merging) => true,
            (Downloading | Merging, Completed | Failed) => true,
            (Created | FetchingMetadata | Downloading | Merging, Cancelled) => true,
            // Internal failures may strike before any stage ran
            (Created, Failed) => true,
            _ => false,
        }
    }
}

/// Event published on a client's push channel
///
/// Serialized with a `status` discriminator, e.g.
/// `{"status":"downloading","progress":42.5}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Event {
    /// Stage 1 started
    FetchingInfo {
        /// Always 0
        progress: f32,
    },
    /// Stage 2 progress
    Downloading {
        /// Percentage (0.0 to 100.0) as reported by the tool
        progress: f32,
        /// Sanitized title, present on the first downloading event only
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    },
    /// Merge phase entered
    Merging {
        /// Always 100
        progress: f32,
    },
    /// Stage 2 succeeded; delivery begins
    Completed {
        /// Always 100
        progress: f32,
    },
    /// The job failed
    Error {
        /// Human-readable message
        message: String,
    },
}

impl Event {
    /// Event name used in logs
    pub fn status(&self) -> &'static str {
        match self {
            Event::FetchingInfo { .. } => "fetching_info",
            Event::Downloading { .. } => "downloading",
            Event::Merging { .. } => "merging",
            Event::Completed { .. } => "completed",
            Event::Error { .. } => "error",
        }
    }

    /// Whether this is the last event a job publishes
    pub fn is_terminal(&self) -> bool {
        matches!(self, Event::Completed { .. } | Event::Error { .. })
    }
}

/// Structured output of the metadata stage
///
/// Only `title` is required; the rest is informational.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct MediaMetadata {
    /// Display title of the media
    pub title: String,
    /// Upstream media id
    #[serde(default)]
    pub id: Option<String>,
    /// Duration in seconds
    #[serde(default)]
    pub duration: Option<f64>,
    /// Uploader name
    #[serde(default)]
    pub uploader: Option<String>,
}

/// Strip everything but ASCII word characters and whitespace from a title
///
/// Whitespace other than a plain space is folded to a space and the result is
/// trimmed. Returns `"video"` when nothing usable remains.
pub fn sanitize_title(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .filter_map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                Some(c)
            } else if c.is_whitespace() {
                Some(' ')
            } else {
                None
            }
        })
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        "video".to_string()
    } else {
        cleaned.to_string()
    }
}
