//! Process configuration for contextcore
//!
//! Read once at startup (usually through [`CoreConfig::from_env`]) and
//! passed explicitly to the components that need it. Nothing here is a
//! mutable global: changing the emission mode means building a new
//! translator, which only affects emissions created afterwards.

use crate::translate::EmitMode;

/// Core configuration
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Attribute namespace emission mode
    pub emit_mode: EmitMode,

    /// Project identifier stamped on every emission envelope
    pub project_id: String,

    /// Service name reported to the telemetry backend
    pub service_name: String,

    /// Collector endpoint for the HTTP sink
    pub export_endpoint: String,

    /// Maximum number of queued export items
    pub export_queue_size: usize,

    /// Export request timeout in milliseconds
    pub export_timeout_ms: u64,

    /// Maximum retry attempts for retryable export failures
    pub export_max_retries: u32,

    /// Initial backoff delay in milliseconds
    pub export_initial_backoff_ms: u64,

    /// Maximum backoff delay in milliseconds
    pub export_max_backoff_ms: u64,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            emit_mode: EmitMode::Dual,
            project_id: "default".to_string(),
            service_name: "contextcore".to_string(),
            export_endpoint: "http://localhost:4318".to_string(),
            export_queue_size: 1000,
            export_timeout_ms: 5000,
            export_max_retries: 3,
            export_initial_backoff_ms: 100,
            export_max_backoff_ms: 5000,
        }
    }
}

impl CoreConfig {
    /// Create a new config builder
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::new()
    }

    /// Create config from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create config from an arbitrary key lookup (tests inject a map here)
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let emit_mode = match lookup("CONTEXTCORE_EMIT_MODE") {
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                tracing::warn!(value = %raw, "Unrecognized CONTEXTCORE_EMIT_MODE, using dual");
                EmitMode::Dual
            }),
            None => defaults.emit_mode,
        };

        Self {
            emit_mode,
            project_id: lookup("CONTEXTCORE_PROJECT_ID").unwrap_or(defaults.project_id),
            service_name: lookup("CONTEXTCORE_SERVICE_NAME").unwrap_or(defaults.service_name),
            export_endpoint: lookup("CONTEXTCORE_EXPORT_ENDPOINT")
                .unwrap_or(defaults.export_endpoint),
            export_queue_size: lookup("CONTEXTCORE_EXPORT_QUEUE_SIZE")
                .map(|v| v.parse().unwrap_or(defaults.export_queue_size))
                .unwrap_or(defaults.export_queue_size),
            export_timeout_ms: lookup("CONTEXTCORE_EXPORT_TIMEOUT_MS")
                .map(|v| v.parse().unwrap_or(defaults.export_timeout_ms))
                .unwrap_or(defaults.export_timeout_ms),
            export_max_retries: lookup("CONTEXTCORE_EXPORT_MAX_RETRIES")
                .map(|v| v.parse().unwrap_or(defaults.export_max_retries))
                .unwrap_or(defaults.export_max_retries),
            export_initial_backoff_ms: lookup("CONTEXTCORE_EXPORT_INITIAL_BACKOFF_MS")
                .map(|v| v.parse().unwrap_or(defaults.export_initial_backoff_ms))
                .unwrap_or(defaults.export_initial_backoff_ms),
            export_max_backoff_ms: lookup("CONTEXTCORE_EXPORT_MAX_BACKOFF_MS")
                .map(|v| v.parse().unwrap_or(defaults.export_max_backoff_ms))
                .unwrap_or(defaults.export_max_backoff_ms),
        }
    }
}

/// Builder for CoreConfig
pub struct CoreConfigBuilder {
    config: CoreConfig,
}

impl CoreConfigBuilder {
    /// Create a new builder with defaults
    pub fn new() -> Self {
        Self {
            config: CoreConfig::default(),
        }
    }

    /// Set the emission mode
    pub fn emit_mode(mut self, mode: EmitMode) -> Self {
        self.config.emit_mode = mode;
        self
    }

    /// Set the project identifier
    pub fn project_id(mut self, project_id: impl Into<String>) -> Self {
        self.config.project_id = project_id.into();
        self
    }

    /// Set the service name
    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.config.service_name = name.into();
        self
    }

    /// Set the collector endpoint
    pub fn export_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.export_endpoint = endpoint.into();
        self
    }

    /// Set the export queue size
    pub fn export_queue_size(mut self, size: usize) -> Self {
        self.config.export_queue_size = size;
        self
    }

    /// Set retry policy for the export queue
    pub fn export_retries(mut self, max_retries: u32, initial_backoff_ms: u64) -> Self {
        self.config.export_max_retries = max_retries;
        self.config.export_initial_backoff_ms = initial_backoff_ms;
        self
    }

    /// Build the configuration
    pub fn build(self) -> CoreConfig {
        self.config
    }
}

impl Default for CoreConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = CoreConfig::default();
        assert_eq!(config.emit_mode, EmitMode::Dual);
        assert_eq!(config.project_id, "default");
        assert_eq!(config.export_queue_size, 1000);
        assert_eq!(config.export_max_retries, 3);
    }

    #[test]
    fn test_config_builder() {
        let config = CoreConfig::builder()
            .emit_mode(EmitMode::Otel)
            .project_id("checkout")
            .service_name("pipeline")
            .export_endpoint("http://collector:4318")
            .export_queue_size(10)
            .export_retries(5, 20)
            .build();

        assert_eq!(config.emit_mode, EmitMode::Otel);
        assert_eq!(config.project_id, "checkout");
        assert_eq!(config.service_name, "pipeline");
        assert_eq!(config.export_endpoint, "http://collector:4318");
        assert_eq!(config.export_queue_size, 10);
        assert_eq!(config.export_max_retries, 5);
        assert_eq!(config.export_initial_backoff_ms, 20);
    }

    #[test]
    fn test_from_lookup() {
        let env: HashMap<&str, &str> = [
            ("CONTEXTCORE_EMIT_MODE", "legacy"),
            ("CONTEXTCORE_PROJECT_ID", "billing"),
            ("CONTEXTCORE_EXPORT_QUEUE_SIZE", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let config = CoreConfig::from_lookup(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.emit_mode, EmitMode::Legacy);
        assert_eq!(config.project_id, "billing");
        assert_eq!(config.export_queue_size, 1000);
    }

    #[test]
    fn test_unknown_mode_falls_back_to_dual() {
        let config = CoreConfig::from_lookup(|k| {
            (k == "CONTEXTCORE_EMIT_MODE").then(|| "both".to_string())
        });
        assert_eq!(config.emit_mode, EmitMode::Dual);
    }
}
