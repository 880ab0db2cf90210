//! HTTP error response handling for the API
//!
//! This module provides conversions from domain errors to HTTP responses
//! with appropriate status codes and JSON error bodies.

use crate::error::{ApiError, Error, ToHttpStatus};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

/// Implement IntoResponse for Error to automatically convert errors to HTTP responses
impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status_code =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let api_error: ApiError = self.into();

        (status_code, Json(api_error)).into_response()
    }
}

/// Implement IntoResponse for ApiError for explicit error responses
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // Errors with a known status go through Error::into_response instead
        (StatusCode::INTERNAL_SERVER_ERROR, Json(self)).into_response()
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StageKind;

    async fn body_of(response: Response) -> ApiError {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn invalid_input_is_400_with_message() {
        let response = Error::InvalidInput("No URL provided".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let api_error = body_of(response).await;
        assert_eq!(api_error.error, "No URL provided");
        assert_eq!(api_error.code, "invalid_input");
    }

    #[tokio::test]
    async fn upstream_failure_is_502() {
        let response = Error::UpstreamTool {
            stage: StageKind::Metadata,
            exit_code: Some(1),
            message: "ERROR: private video".to_string(),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let api_error = body_of(response).await;
        assert_eq!(api_error.error, "Failed to fetch video info");
        assert!(!api_error.error.contains("private video"));
    }

    #[tokio::test]
    async fn internal_error_is_generic_500() {
        let response = Error::Internal("job task panicked".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_of(response).await.error, "Internal server error");
    }

    #[tokio::test]
    async fn api_error_defaults_to_500() {
        let response = ApiError::new("internal_error", "boom").into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn cancelled_body_names_the_cancellation() {
        let response = (StatusCode::SERVICE_UNAVAILABLE, Json(ApiError::cancelled())).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let api_error = body_of(response).await;
        assert_eq!(api_error.error, "Conversion cancelled");
        assert_eq!(api_error.code, "cancelled");
    }
}
