//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

use crate::registry::Pattern;

/// Root configuration for the gateway.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address, limits).
    pub listener: ListenerConfig,

    /// Backend model definitions.
    pub backends: Vec<BackendConfig>,

    /// Circuit breaker thresholds, shared by every backend.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Retry configuration.
    pub retries: RetryConfig,

    /// Result tracker buffering.
    pub tracker: TrackerConfig,

    /// Retention of deferred results for polling.
    pub results: ResultsConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Upper bound on a single inbound HTTP exchange, in seconds.
    /// Must cover `wait: true` requests that sit out a full batch window.
    pub request_timeout_secs: u64,

    /// Maximum inbound body size in bytes.
    pub max_body_bytes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            request_timeout_secs: 120,
            max_body_bytes: 8 * 1024 * 1024, // 8MB
        }
    }
}

/// Backend model configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BackendConfig {
    /// Unique model name (e.g., "phi3").
    pub id: String,

    /// Model endpoint URL (e.g., "http://10.0.0.12:8001/v1/embed").
    pub endpoint: String,

    /// Processing discipline.
    pub pattern: Pattern,

    /// Per-call timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Maximum number of requests in one batch call.
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// Maximum time a batch accumulates after its first member arrived.
    #[serde(default = "default_max_batch_wait_ms")]
    pub max_batch_wait_ms: u64,

    /// Opaque bearer token forwarded to the backend as-is.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_max_batch_size() -> usize {
    32
}

fn default_max_batch_wait_ms() -> u64 {
    500
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,

    /// Time an open circuit rejects traffic before probing, in milliseconds.
    pub cooldown_ms: u64,

    /// Failures further apart than this restart the consecutive count.
    pub failure_window_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown_ms: 30_000,
            failure_window_ms: 60_000,
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first real-time attempt.
    pub max_retries: u32,

    /// Delay before the first retry in milliseconds.
    pub base_delay_ms: u64,

    /// Growth factor between consecutive retry delays.
    pub multiplier: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,

    /// Retry real-time calls that got a 5xx from the backend.
    pub retry_on_server_error: bool,

    /// Resubmit a whole batch once after a transient failure.
    pub resubmit_batches: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 100,
            multiplier: 3,
            max_delay_ms: 2000,
            retry_on_server_error: true,
            resubmit_batches: true,
        }
    }
}

/// Result tracker configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Records buffered before new ones are dropped.
    pub capacity: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self { capacity: 1024 }
    }
}

/// Deferred result retention.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ResultsConfig {
    /// How long a finished result stays pollable, in seconds.
    pub ttl_secs: u64,

    /// Interval between eviction sweeps, in seconds.
    pub sweep_interval_secs: u64,
}

impl Default for ResultsConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 300,
            sweep_interval_secs: 30,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log line format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: GatewayConfig = toml::from_str(
            r#"
            [[backends]]
            id = "phi3"
            endpoint = "http://127.0.0.1:9001/infer"
            pattern = "real_time"
            "#,
        )
        .unwrap();

        assert_eq!(config.listener.bind_address, "0.0.0.0:8080");
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.circuit_breaker.cooldown_ms, 30_000);
        assert_eq!(config.retries.max_retries, 2);

        let backend = &config.backends[0];
        assert_eq!(backend.pattern, Pattern::RealTime);
        assert_eq!(backend.timeout_ms, 30_000);
        assert_eq!(backend.max_batch_size, 32);
        assert!(backend.auth_token.is_none());
    }

    #[test]
    fn test_pattern_names() {
        let config: GatewayConfig = toml::from_str(
            r#"
            [[backends]]
            id = "hermes"
            endpoint = "http://gpu-02:8000"
            pattern = "hybrid"

            [[backends]]
            id = "mixtral"
            endpoint = "http://gpu-03:8000"
            pattern = "bulk_only"
            max_batch_size = 2
            "#,
        )
        .unwrap();

        assert_eq!(config.backends[0].pattern, Pattern::Hybrid);
        assert_eq!(config.backends[1].pattern, Pattern::BulkOnly);
        assert_eq!(config.backends[1].max_batch_size, 2);
    }

    #[test]
    fn test_unknown_pattern_is_rejected() {
        let result: Result<GatewayConfig, _> = toml::from_str(
            r#"
            [[backends]]
            id = "x"
            endpoint = "http://x"
            pattern = "sometimes"
            "#,
        );
        assert!(result.is_err());
    }
}
