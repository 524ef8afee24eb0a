//! Error types for the registry and the configuration dispatcher

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while ingesting observations
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// Records without an identity cannot be keyed
    #[error("Device record has an empty uuid")]
    EmptyUuid,
}

/// Caller-facing outcomes of a rejected or failed configuration request.
///
/// Only `TransportSendFailure` implies network activity took place.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "details")]
pub enum DispatchError {
    /// A previous request was issued within the cooldown window
    #[error("Configuration rate limited, retry in {retry_after_ms} ms")]
    RateLimited { retry_after_ms: u64 },

    /// Empty uuid, or a uuid the registry has never seen
    #[error("Unknown device '{0}'")]
    UnknownDevice(String),

    /// Address field failed dotted-quad validation
    #[error("Invalid {field}: '{value}'")]
    InvalidAddress { field: String, value: String },

    /// The transport could not send the request; message passed through unchanged
    #[error("{0}")]
    TransportSendFailure(String),
}

impl DispatchError {
    pub fn invalid_address(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::InvalidAddress {
            field: field.into(),
            value: value.into(),
        }
    }
}
