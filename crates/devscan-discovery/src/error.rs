//! Error types for the discovery transports

use devscan_core::types::TransportKind;
use thiserror::Error;

/// Result type alias for discovery operations
pub type Result<T> = std::result::Result<T, DiscoveryError>;

/// Errors that can occur while discovering or configuring devices
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Socket creation, bind, or multicast join failed
    #[error("Failed to bind {address}: {reason}")]
    BindFailed { address: String, reason: String },

    /// Datagram could not be handed to the network
    #[error("Failed to send to {address}: {reason}")]
    SendFailed { address: String, reason: String },

    /// A transport was requested that the scanner never constructed
    #[error("Transport '{0}' is not configured in this scanner")]
    TransportNotConfigured(TransportKind),

    /// mDNS service daemon failed to initialize
    #[error("Failed to initialize mDNS daemon: {0}")]
    MdnsInitFailed(String),

    /// Failed to browse for services
    #[error("Failed to browse for service type '{service_type}': {reason}")]
    BrowseFailed { service_type: String, reason: String },

    /// Description document could not be retrieved
    #[error("Failed to fetch {url}: {reason}")]
    FetchFailed { url: String, reason: String },

    /// Internal error
    #[error("Internal discovery error: {0}")]
    Internal(String),
}

impl DiscoveryError {
    pub fn bind_failed(address: impl ToString, reason: impl ToString) -> Self {
        Self::BindFailed {
            address: address.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn send_failed(address: impl ToString, reason: impl ToString) -> Self {
        Self::SendFailed {
            address: address.to_string(),
            reason: reason.to_string(),
        }
    }
}
