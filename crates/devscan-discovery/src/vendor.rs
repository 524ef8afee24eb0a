//! Vendor multicast announce/configure transport.
//!
//! Devices periodically multicast a JSON-RPC shaped `announce` datagram on
//! the announce group. Configuration requests travel the other way on a
//! dedicated configure group; the socket for that channel is bound once per
//! transport and survives start/stop cycles.

use crate::error::{DiscoveryError, Result};
use crate::event::{ScanEvent, EVENT_CHANNEL_CAPACITY};
use crate::metrics::TransportMetrics;
use crate::socket::{bind_udp, join_group, recv_backoff, MAX_DATAGRAM_SIZE};
use crate::transport::{ConfigChannel, DiscoveryTransport};
use async_trait::async_trait;
use devscan_core::config::VendorConfig;
use devscan_core::error::ParseError;
use devscan_core::sanitize;
use devscan_core::types::{
    AnnounceParams, ConfigureParams, DeviceRecord, JsonRpcMessage, TransportKind,
    METHOD_ANNOUNCE,
};
use parking_lot::Mutex;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Running receive loop for the announce channel
struct ReceiveLoop {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Vendor announce listener and configure sender.
pub struct VendorTransport {
    config: VendorConfig,

    /// Configure channel socket, bound for the transport's lifetime
    send_socket: Arc<UdpSocket>,

    /// Next configure request id; starts at 1 and is never reused
    next_id: AtomicU64,

    event_tx: broadcast::Sender<ScanEvent>,

    receiver: Mutex<Option<ReceiveLoop>>,

    metrics: Arc<TransportMetrics>,
}

impl VendorTransport {
    /// Creates the transport and binds the configure socket.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: VendorConfig) -> Result<Self> {
        let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, config.configure_port);
        let send_socket = bind_udp(bind_addr)?;

        let memberships = join_group(&send_socket, config.configure_group);
        if let Err(e) = send_socket.set_multicast_ttl_v4(config.multicast_ttl) {
            warn!(error = %e, "Failed to set multicast TTL on configure socket");
        }

        info!(
            %bind_addr,
            group = %config.configure_group,
            memberships,
            "Vendor configure channel bound"
        );

        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            config,
            send_socket: Arc::new(send_socket),
            next_id: AtomicU64::new(1),
            event_tx,
            receiver: Mutex::new(None),
            metrics: Arc::new(TransportMetrics::new(TransportKind::Vendor)),
        })
    }

    pub fn metrics(&self) -> &TransportMetrics {
        &self.metrics
    }

    fn configure_target(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.config.configure_group, self.config.configure_port)
    }

    /// Allocates the next request id and encodes the configure datagram.
    fn encode_configure(&self, params: ConfigureParams) -> Result<(u64, Vec<u8>)> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let message = JsonRpcMessage::configure(id, params);

        let payload = serde_json::to_vec(&message)
            .map_err(|e| DiscoveryError::Internal(format!("Failed to encode configure request: {}", e)))?;
        Ok((id, payload))
    }
}

#[async_trait]
impl DiscoveryTransport for VendorTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Vendor
    }

    async fn start(&self) -> Result<()> {
        if self.receiver.lock().is_some() {
            debug!("Vendor transport already running");
            return Ok(());
        }

        let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, self.config.announce_port);
        let socket = bind_udp(bind_addr)?;
        let memberships = join_group(&socket, self.config.announce_group);

        let cancel = CancellationToken::new();
        let task = tokio::spawn(receive_loop(
            socket,
            cancel.clone(),
            self.event_tx.clone(),
            self.metrics.clone(),
            self.config.max_error_chars,
        ));

        let mut receiver = self.receiver.lock();
        if let Some(previous) = receiver.replace(ReceiveLoop { cancel, task }) {
            // Lost a start race; keep the newest loop
            previous.cancel.cancel();
        }

        info!(
            %bind_addr,
            group = %self.config.announce_group,
            memberships,
            "Vendor transport started"
        );
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let Some(receive_loop) = self.receiver.lock().take() else {
            return Ok(());
        };

        // The loop drops its socket once it observes the cancellation
        receive_loop.cancel.cancel();
        drop(receive_loop.task);

        info!("Vendor transport stopped");
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.event_tx.subscribe()
    }

    fn is_running(&self) -> bool {
        self.receiver.lock().is_some()
    }
}

#[async_trait]
impl ConfigChannel for VendorTransport {
    async fn configure(&self, params: ConfigureParams) -> Result<u64> {
        let uuid = params.device.uuid.clone();
        let (id, payload) = self.encode_configure(params)?;

        let target = self.configure_target();
        self.send_socket
            .send_to(&payload, target)
            .await
            .map_err(|e| DiscoveryError::send_failed(target, e))?;

        info!(id, %uuid, %target, "Configure request sent");
        Ok(id)
    }
}

async fn receive_loop(
    socket: UdpSocket,
    cancel: CancellationToken,
    event_tx: broadcast::Sender<ScanEvent>,
    metrics: Arc<TransportMetrics>,
    max_error_chars: usize,
) {
    let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];
    let mut consecutive_errors = 0u32;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Vendor receive loop shutting down");
                break;
            }
            result = socket.recv_from(&mut buffer) => {
                match result {
                    Ok((size, source)) => {
                        consecutive_errors = 0;
                        debug!(%source, size, "Announce datagram received");
                        handle_datagram(&buffer[..size], max_error_chars, &event_tx, &metrics);
                    }
                    Err(e) => {
                        consecutive_errors = consecutive_errors.saturating_add(1);
                        let backoff = recv_backoff(consecutive_errors);
                        warn!(
                            error = %e,
                            consecutive_errors,
                            backoff_ms = backoff.as_millis() as u64,
                            "Error receiving announce datagram"
                        );
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(backoff) => {}
                        }
                    }
                }
            }
        }
    }
}

/// Parses one datagram and publishes the outcome.
pub(crate) fn handle_datagram(
    payload: &[u8],
    max_error_chars: usize,
    event_tx: &broadcast::Sender<ScanEvent>,
    metrics: &TransportMetrics,
) {
    metrics.record_datagram();

    let event = match parse_datagram(payload, max_error_chars) {
        Ok(Some(device)) => {
            metrics.record_device();
            ScanEvent::observed(TransportKind::Vendor, device)
        }
        Ok(None) => return,
        Err(e) => {
            metrics.record_parse_error();
            debug!(error = %e, "Dropping malformed announce");
            let message = sanitize::strip_markup(&e.to_string(), max_error_chars);
            ScanEvent::error(TransportKind::Vendor, message)
        }
    };

    // No subscribers is not an error
    let _ = event_tx.send(event);
}

/// Decodes a vendor datagram.
///
/// Returns `Ok(None)` for well-formed envelopes carrying a method other than
/// `announce`. Parse failures carry the raw text clipped to `max_error_chars`.
pub fn parse_datagram(
    payload: &[u8],
    max_error_chars: usize,
) -> std::result::Result<Option<DeviceRecord>, ParseError> {
    let raw = String::from_utf8_lossy(payload);
    let invalid = || ParseError::invalid_json(sanitize::clip(&raw, max_error_chars));

    let envelope: JsonRpcMessage<serde_json::Value> =
        serde_json::from_str(&raw).map_err(|_| invalid())?;

    if envelope.method != METHOD_ANNOUNCE {
        debug!(method = %envelope.method, "Ignoring non-announce vendor message");
        return Ok(None);
    }

    let params: AnnounceParams = serde_json::from_value(envelope.params).map_err(|_| invalid())?;
    let record = DeviceRecord::from(params);

    if record.uuid.trim().is_empty() {
        return Err(ParseError::missing_field("params.device.uuid"));
    }

    Ok(Some(record))
}

#[cfg(test)]
mod tests {
    use super::*;
    use devscan_core::types::ConfigRequest;

    const ANNOUNCE: &str = r#"{"jsonrpc":"2.0","method":"announce","params":{"apiVersion":"1.1","device":{"familyType":"SmartTorque","firmwareVersion":"v1.0.33","name":"T100","type":"T100","uuid":"0009E5AFFE00"},"expiration":15,"netSettings":{"interface":{"ipv4":[{"address":"172.19.192.253","netmask":"255.255.0.0"}],"ipv6":[{"address":"fe80::209:e5ff:feaf:fe00","prefix":64}],"name":"end0","type":"ethernet"}},"services":[{"port":7416,"type":"daqStream"},{"port":80,"type":"http"},{"path":"/api/jet/","port":11123,"type":"jetws"}],"vendor":{"rotor":{"identNr":"234530042"}}}}"#;

    #[test]
    fn test_parse_announce() {
        let record = parse_datagram(ANNOUNCE.as_bytes(), 200).unwrap().unwrap();
        assert_eq!(record.uuid, "0009E5AFFE00");
        assert_eq!(record.name, "T100");
        assert_eq!(record.api_version, "1.1");
        assert_eq!(record.primary_ipv4(), Some("172.19.192.253"));
        assert_eq!(record.services[2].path.as_deref(), Some("/api/jet/"));
    }

    #[test]
    fn test_parse_invalid_json_clips_raw_text() {
        let garbage = "x".repeat(500);
        let err = parse_datagram(garbage.as_bytes(), 200).unwrap_err();
        match err {
            ParseError::InvalidJson { raw } => assert_eq!(raw.len(), 200),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_parse_ignores_other_methods() {
        let msg = r#"{"jsonrpc":"2.0","method":"configure","id":"3","params":{}}"#;
        assert_eq!(parse_datagram(msg.as_bytes(), 200).unwrap(), None);
    }

    #[test]
    fn test_parse_rejects_empty_uuid() {
        let msg = r#"{"jsonrpc":"2.0","method":"announce","params":{"device":{"name":"nameless"}}}"#;
        assert_eq!(
            parse_datagram(msg.as_bytes(), 200).unwrap_err(),
            ParseError::missing_field("params.device.uuid")
        );
    }

    #[test]
    fn test_parse_unrecognized_configuration_method() {
        let msg = ANNOUNCE.replace(r#""name":"end0""#, r#""name":"end0","configurationMethod":"routerSolicitation""#);
        let record = parse_datagram(msg.as_bytes(), 200).unwrap().unwrap();
        assert_eq!(record.uuid, "0009E5AFFE00");
        assert_eq!(record.configuration_method(), None);
        assert_eq!(record.primary_ipv4(), Some("172.19.192.253"));
    }

    #[tokio::test]
    async fn test_configure_ids_start_at_one_and_increase() {
        let transport = VendorTransport::new(VendorConfig {
            configure_port: 0,
            ..Default::default()
        })
        .unwrap();

        let params = || ConfigRequest::dhcp("0009E5AFFE00", "end0").to_params(120);
        let (first, first_payload) = transport.encode_configure(params()).unwrap();
        let (second, second_payload) = transport.encode_configure(params()).unwrap();
        let (third, _) = transport.encode_configure(params()).unwrap();
        assert_eq!((first, second, third), (1, 2, 3));

        let first_payload = String::from_utf8(first_payload).unwrap();
        let second_payload = String::from_utf8(second_payload).unwrap();
        assert!(first_payload.contains(r#""id":"1""#));
        assert!(first_payload.contains(r#""method":"configure""#));
        assert!(second_payload.contains(r#""id":"2""#));
    }

    #[test]
    fn test_handle_datagram_publishes_events() {
        let (tx, mut rx) = broadcast::channel(8);
        let metrics = TransportMetrics::new(TransportKind::Vendor);

        handle_datagram(ANNOUNCE.as_bytes(), 200, &tx, &metrics);
        handle_datagram(b"<b>not json</b>", 200, &tx, &metrics);

        match rx.try_recv().unwrap() {
            ScanEvent::DeviceObserved { origin, device } => {
                assert_eq!(origin, TransportKind::Vendor);
                assert_eq!(device.uuid, "0009E5AFFE00");
            }
            other => panic!("unexpected event: {other:?}"),
        }
        match rx.try_recv().unwrap() {
            ScanEvent::Error { message, .. } => assert_eq!(message, "invalid json: not json"),
            other => panic!("unexpected event: {other:?}"),
        }

        assert_eq!(metrics.datagrams_received(), 2);
        assert_eq!(metrics.devices_observed(), 1);
        assert_eq!(metrics.parse_errors(), 1);
    }
}
