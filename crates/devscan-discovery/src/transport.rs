//! Seams between the scanner, the transports, and the configuration dispatcher.

use crate::error::Result;
use crate::event::ScanEvent;
use async_trait::async_trait;
use devscan_core::types::{ConfigureParams, TransportKind};
use tokio::sync::broadcast;

/// A discovery transport with a start/stop lifecycle and an event stream.
///
/// `stop` must be safe to call repeatedly and on a transport that was never
/// started.
#[async_trait]
pub trait DiscoveryTransport: Send + Sync {
    /// Which transport this is
    fn kind(&self) -> TransportKind;

    /// Opens sockets and begins emitting events
    async fn start(&self) -> Result<()>;

    /// Releases receive resources; idempotent
    async fn stop(&self) -> Result<()>;

    /// Subscribes to this transport's events
    fn subscribe(&self) -> broadcast::Receiver<ScanEvent>;

    fn is_running(&self) -> bool;
}

/// Outbound path for configuration requests.
#[async_trait]
pub trait ConfigChannel: Send + Sync {
    /// Sends one configure request and returns the request id used.
    ///
    /// Success means the datagram was handed to the network; the device does
    /// not acknowledge.
    async fn configure(&self, params: ConfigureParams) -> Result<u64>;
}
