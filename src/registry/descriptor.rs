//! Backend descriptors.
//!
//! A descriptor is the immutable, validated form of a [`BackendConfig`]. It is
//! shared as `Arc<BackendDescriptor>`; changing anything about a backend means
//! building a new descriptor and swapping it into the registry.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::validation::validate_backend;
use crate::config::BackendConfig;
use crate::registry::RegistryError;

/// Processing discipline assigned to a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pattern {
    /// Every request is sent immediately.
    RealTime,
    /// Urgent requests are sent immediately, the rest are batched.
    Hybrid,
    /// Every request is batched.
    BulkOnly,
}

impl Pattern {
    pub fn as_str(&self) -> &'static str {
        match self {
            Pattern::RealTime => "real_time",
            Pattern::Hybrid => "hybrid",
            Pattern::BulkOnly => "bulk_only",
        }
    }

    /// Whether a request with this urgency is sent now rather than batched.
    pub fn dispatches_immediately(&self, urgent: bool) -> bool {
        match self {
            Pattern::RealTime => true,
            Pattern::Hybrid => urgent,
            Pattern::BulkOnly => false,
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered backend model.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendDescriptor {
    pub id: String,
    pub endpoint: Url,
    pub pattern: Pattern,
    pub timeout: Duration,
    pub max_batch_size: usize,
    pub max_batch_wait: Duration,
    pub auth_token: Option<String>,
}

impl TryFrom<&BackendConfig> for BackendDescriptor {
    type Error = RegistryError;

    fn try_from(config: &BackendConfig) -> Result<Self, Self::Error> {
        let errors = validate_backend(config);
        if !errors.is_empty() {
            return Err(RegistryError::InvalidDescriptor {
                id: config.id.clone(),
                reason: errors
                    .iter()
                    .map(|e| e.to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
            });
        }

        let endpoint = Url::parse(&config.endpoint).map_err(|e| RegistryError::InvalidDescriptor {
            id: config.id.clone(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            id: config.id.clone(),
            endpoint,
            pattern: config.pattern,
            timeout: Duration::from_millis(config.timeout_ms),
            max_batch_size: config.max_batch_size,
            max_batch_wait: Duration::from_millis(config.max_batch_wait_ms),
            auth_token: config.auth_token.clone(),
        })
    }
}

impl From<&BackendDescriptor> for BackendConfig {
    fn from(descriptor: &BackendDescriptor) -> Self {
        Self {
            id: descriptor.id.clone(),
            endpoint: descriptor.endpoint.to_string(),
            pattern: descriptor.pattern,
            timeout_ms: descriptor.timeout.as_millis() as u64,
            max_batch_size: descriptor.max_batch_size,
            max_batch_wait_ms: descriptor.max_batch_wait.as_millis() as u64,
            // never echo credentials back out
            auth_token: None,
        }
    }
}
