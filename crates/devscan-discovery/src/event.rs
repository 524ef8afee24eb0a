//! Events published by discovery transports and the scanner.

use devscan_core::types::{DeviceRecord, TransportKind};
use serde::{Deserialize, Serialize};

/// Buffered events per subscriber before the slowest one starts lagging
pub const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Notification emitted by a discovery transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ScanEvent {
    /// A device announced or resolved itself
    DeviceObserved {
        origin: TransportKind,
        device: DeviceRecord,
    },

    /// Non-fatal transport problem (malformed payload, degraded socket)
    Error {
        origin: TransportKind,
        message: String,
    },
}

impl ScanEvent {
    pub fn observed(origin: TransportKind, device: DeviceRecord) -> Self {
        Self::DeviceObserved { origin, device }
    }

    pub fn error(origin: TransportKind, message: impl Into<String>) -> Self {
        Self::Error {
            origin,
            message: message.into(),
        }
    }

    /// Transport that produced the event.
    pub fn origin(&self) -> TransportKind {
        match self {
            ScanEvent::DeviceObserved { origin, .. } | ScanEvent::Error { origin, .. } => *origin,
        }
    }

    /// The observed device, if this is an observation.
    pub fn device(&self) -> Option<&DeviceRecord> {
        match self {
            ScanEvent::DeviceObserved { device, .. } => Some(device),
            ScanEvent::Error { .. } => None,
        }
    }
}
