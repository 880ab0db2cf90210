//! OpenAPI documentation and schema generation
//!
//! This module defines the OpenAPI specification for the convert-relay HTTP
//! API using utoipa for compile-time spec generation.

use utoipa::OpenApi;

/// OpenAPI documentation for the convert-relay HTTP API
///
/// The spec can be accessed via:
/// - `/openapi.json` - JSON format OpenAPI specification
/// - `/swagger-ui` - Interactive Swagger UI documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "convert-relay HTTP API",
        version = "0.1.0",
        description = "Converts a media source reference into a downloadable file, streaming live progress over server-sent events",
        license(
            name = "MIT OR Apache-2.0"
        )
    ),
    servers(
        (url = "http://localhost:5000", description = "Local development server")
    ),
    paths(
        // Conversion
        crate::api::routes::convert,
        crate::api::routes::event_stream,

        // System
        crate::api::routes::banner,
        crate::api::routes::health_check,
        crate::api::routes::openapi_spec,
    ),
    components(schemas(
        // Core types from types.rs
        crate::types::ClientId,
        crate::types::Event,
        crate::types::JobState,
        crate::types::StageKind,
        crate::types::MediaMetadata,

        // API response types from routes
        crate::api::routes::HealthResponse,

        // Error types from error.rs
        crate::error::ApiError,
    )),
    tags(
        (name = "conversion", description = "Media conversion and progress events"),
        (name = "system", description = "Health and API documentation")
    )
)]
pub struct ApiDoc;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_spec_generates() {
        let spec = ApiDoc::openapi();
        assert_eq!(spec.info.title, "convert-relay HTTP API");

        let paths: Vec<_> = spec.paths.paths.keys().cloned().collect();
        for expected in ["/convert", "/events", "/health", "/openapi.json", "/"] {
            assert!(
                paths.iter().any(|p| p == expected),
                "missing path {expected} in {paths:?}"
            );
        }
    }

    #[test]
    fn openapi_spec_serializes_to_json() {
        let json = serde_json::to_value(ApiDoc::openapi()).unwrap();
        assert!(json["components"]["schemas"]["Event"].is_object());
        assert!(json["components"]["schemas"]["ApiError"].is_object());
    }
}
