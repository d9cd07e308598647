//! Axum extractor for inbound trace context.
//!
//! Reads the W3C `traceparent` header, plus `baggage` when present, so a
//! pipeline run started from an HTTP handler joins the caller's trace.
//! Rejects with 400 if `traceparent` is missing or malformed.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};

use crate::context::TraceContext;

/// Axum extractor yielding the caller's [`TraceContext`].
#[derive(Debug)]
pub struct TraceContextExtractor(pub TraceContext);

/// Rejection type for missing or invalid trace headers.
#[derive(Debug)]
pub struct TraceContextRejection {
    message: String,
}

impl IntoResponse for TraceContextRejection {
    fn into_response(self) -> Response {
        (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "error": "INVALID_TRACEPARENT",
                "message": self.message
            })),
        )
            .into_response()
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for TraceContextExtractor {
    type Rejection = TraceContextRejection;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let headers = &parts.headers;

        let traceparent = headers
            .get("traceparent")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| TraceContextRejection {
                message: "traceparent header is required".to_string(),
            })?;

        let mut context =
            TraceContext::from_traceparent(traceparent).map_err(|e| TraceContextRejection {
                message: e.to_string(),
            })?;

        if let Some(baggage) = headers.get("baggage").and_then(|v| v.to_str().ok()) {
            context = context.with_baggage_header(baggage);
        }

        Ok(Self(context))
    }
}
