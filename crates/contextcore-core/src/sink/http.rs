//! Collector HTTP sink
//!
//! Spans go to `{endpoint}/v1/contextcore/spans`, events to
//! `{endpoint}/v1/contextcore/events`, one JSON document per request.
//! Server errors, 429 and transport failures are retryable; any other
//! non-success status is permanent.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;

use super::{ExportError, ExportItem, TelemetrySink};
use crate::config::CoreConfig;

/// Sink posting JSON to a collector
pub struct HttpSink {
    client: Client,
    endpoint: String,
    service_name: String,
}

impl HttpSink {
    pub fn new(
        endpoint: impl Into<String>,
        service_name: impl Into<String>,
        timeout_ms: u64,
    ) -> Result<Self, ExportError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ExportError::Permanent(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            service_name: service_name.into(),
        })
    }

    pub fn from_config(config: &CoreConfig) -> Result<Self, ExportError> {
        Self::new(
            config.export_endpoint.clone(),
            config.service_name.clone(),
            config.export_timeout_ms,
        )
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn url_for(&self, item: &ExportItem) -> String {
        let path = match item {
            ExportItem::Span(_) => "spans",
            ExportItem::Event { .. } => "events",
        };
        format!("{}/v1/contextcore/{}", self.endpoint, path)
    }
}

#[async_trait]
impl TelemetrySink for HttpSink {
    async fn export(&self, item: &ExportItem) -> Result<(), ExportError> {
        let body = serde_json::to_vec(item)?;

        let response = self
            .client
            .post(self.url_for(item))
            .header("Content-Type", "application/json")
            .header("X-Service-Name", &self.service_name)
            .header("X-Trace-Id", item.trace_id().to_string())
            .body(body)
            .send()
            .await
            .map_err(|e| ExportError::Retryable(format!("Transport error: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            Err(ExportError::Retryable(format!("Collector returned {}", status)))
        } else {
            let error_text = response.text().await.unwrap_or_default();
            Err(ExportError::Permanent(format!(
                "Collector rejected {} ({}): {}",
                item.kind(),
                status,
                error_text
            )))
        }
    }

    fn name(&self) -> &str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contextcore_span::{Attributes, Span, TraceId};

    #[test]
    fn test_url_routing_and_trailing_slash() {
        let sink = HttpSink::new("http://collector:4318/", "svc", 1000).unwrap();
        assert_eq!(sink.endpoint(), "http://collector:4318");

        let span = Span::new(TraceId::generate(), None, "run", Attributes::new(), Default::default());
        assert_eq!(
            sink.url_for(&ExportItem::span(span)),
            "http://collector:4318/v1/contextcore/spans"
        );
    }
}
