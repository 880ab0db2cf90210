//! Conversion handler and artifact delivery.

use super::{ConvertQuery, non_empty};
use crate::api::AppState;
use crate::error::{ApiError, Error};
use crate::orchestrator::{Delivery, JobOutcome, JobRequest};
use crate::storage::ArtifactGuard;
use crate::types::{ClientId, Event};
use axum::{
    Json,
    body::{Body, Bytes},
    extract::{Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio_stream::Stream;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;

/// GET /convert - Convert a source and download the result
///
/// Runs the metadata and fetch+mux stages, publishing progress to the push
/// channel registered for `id`, then streams the produced file as an
/// attachment named after the media title. The temporary file is deleted
/// once the transfer ends, whether it completed or not.
///
/// If the requester disconnects before the file is ready, the job is
/// cancelled and its running stage terminated.
#[utoipa::path(
    get,
    path = "/convert",
    tag = "conversion",
    params(ConvertQuery),
    responses(
        (status = 200, description = "Converted media file", content_type = "application/octet-stream"),
        (status = 400, description = "No URL provided", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError),
        (status = 502, description = "The external tool failed", body = ApiError),
        (status = 503, description = "Server shutting down", body = ApiError),
        (status = 504, description = "A stage exceeded the configured timeout", body = ApiError)
    )
)]
pub async fn convert(State(state): State<AppState>, Query(query): Query<ConvertQuery>) -> Response {
    let Some(source) = non_empty(query.url) else {
        return Error::InvalidInput("No URL provided".to_string()).into_response();
    };
    let client_id = non_empty(query.id)
        .map(ClientId::from)
        .unwrap_or_else(ClientId::generate);

    tracing::info!(client_id = %client_id, source = %source, "conversion requested");

    // The handler future is dropped when the requester disconnects; the guard
    // then cancels the job, which keeps running on its own task to clean up.
    let cancel = CancellationToken::new();
    let disconnect_guard = cancel.clone().drop_guard();

    let job = {
        let orchestrator = state.orchestrator.clone();
        let request = JobRequest::new(source, client_id.clone());
        tokio::spawn(async move { orchestrator.run_job(request, cancel).await })
    };

    let outcome = match job.await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!(client_id = %client_id, error = %e, "job task failed");
            state.registry.publish(
                &client_id,
                Event::Error {
                    message: "Internal server error".to_string(),
                },
            );
            Err(Error::Internal(format!("job task failed: {}", e)))
        }
    };
    disconnect_guard.disarm();

    match outcome {
        Ok(JobOutcome::Delivered(delivery)) => deliver(&client_id, delivery).await,
        Ok(JobOutcome::Cancelled) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ApiError::cancelled()),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

/// Stream the artifact as an attachment; the file is deleted when the body is dropped
async fn deliver(client_id: &ClientId, delivery: Delivery) -> Response {
    let Delivery {
        artifact,
        filename,
        content_type,
        ..
    } = delivery;

    let file = match tokio::fs::File::open(artifact.path()).await {
        Ok(file) => file,
        Err(e) => {
            tracing::error!(client_id = %client_id, path = %artifact.path().display(), error = %e, "cannot open artifact");
            return Error::Io(e).into_response();
        }
    };
    let length = file.metadata().await.ok().map(|m| m.len());

    tracing::info!(client_id = %client_id, filename = %filename, bytes = ?length, "sending file");

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    match HeaderValue::from_str(&content_disposition(&filename)) {
        Ok(value) => {
            headers.insert(header::CONTENT_DISPOSITION, value);
        }
        Err(e) => tracing::warn!(filename = %filename, error = %e, "unusable download filename"),
    }
    if let Some(length) = length {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    }

    let body = Body::from_stream(ArtifactStream {
        inner: ReaderStream::new(file),
        _artifact: artifact,
    });

    (headers, body).into_response()
}

/// `attachment` disposition for a sanitized filename
fn content_disposition(filename: &str) -> String {
    let quoted = filename.replace(['"', '\\'], "_");
    format!("attachment; filename=\"{}\"", quoted)
}

/// File body that owns its artifact
///
/// The guard lives exactly as long as the response body, so the file is
/// removed after the last byte is sent or when the transfer is aborted.
struct ArtifactStream {
    inner: ReaderStream<tokio::fs::File>,
    _artifact: ArtifactGuard,
}

impl Stream for ArtifactStream {
    type Item = std::io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disposition_quotes_filename() {
        assert_eq!(
            content_disposition("My Clip.mp4"),
            "attachment; filename=\"My Clip.mp4\""
        );
        assert_eq!(
            content_disposition("a\"b.mp4"),
            "attachment; filename=\"a_b.mp4\""
        );
    }

    #[tokio::test]
    async fn artifact_stream_deletes_file_when_dropped() {
        use tokio_stream::StreamExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c_1.mp4");
        std::fs::write(&path, b"payload").unwrap();

        let file = tokio::fs::File::open(&path).await.unwrap();
        let mut stream = ArtifactStream {
            inner: ReaderStream::new(file),
            _artifact: ArtifactGuard::new(path.clone()),
        };

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(&first[..], b"payload");
        assert!(path.exists());

        drop(stream);
        assert!(!path.exists());
    }
}
