//! Error types shared across devscan crates.
//!
//! Parse and configuration failures are recovered locally by the components
//! that produce them; these types exist so the failure can be logged or
//! surfaced as an event with a precise reason. All variants are serializable
//! so they can be forwarded to a presentation layer unchanged.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using DevscanError as the error type.
pub type Result<T> = std::result::Result<T, DevscanError>;

/// Top-level error type for core operations.
#[derive(Debug, Error, Serialize, Deserialize)]
#[serde(tag = "type", content = "details")]
pub enum DevscanError {
    /// Malformed inbound payload
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Errors raised while decoding inbound wire payloads.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParseError {
    /// Payload is not valid JSON or does not match the envelope shape
    #[error("invalid json: {raw}")]
    InvalidJson { raw: String },

    /// Missing required field
    #[error("Missing required field: {field}")]
    MissingField { field: String },
}

impl ParseError {
    /// Creates an invalid JSON error carrying the (already clipped) raw text.
    pub fn invalid_json(raw: impl Into<String>) -> Self {
        Self::InvalidJson { raw: raw.into() }
    }

    /// Creates a missing field error.
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }
}

/// Errors related to configuration.
#[derive(Debug, Error, Serialize, Deserialize)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {reason}")]
    LoadFailed { path: String, reason: String },

    /// Invalid configuration format
    #[error("Invalid configuration format: {reason}")]
    InvalidFormat { reason: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

impl ConfigError {
    /// Creates an invalid value error.
    pub fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_json_display() {
        let err = ParseError::invalid_json("not-json");
        assert_eq!(err.to_string(), "invalid json: not-json");
    }

    #[test]
    fn test_error_serialization() {
        let err = DevscanError::Parse(ParseError::missing_field("params.device.uuid"));
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("Parse"));
        assert!(json.contains("params.device.uuid"));
    }
}
