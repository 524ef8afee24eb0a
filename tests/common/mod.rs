//! Common test utilities and helpers for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use devscan_core::types::{
    ConfigureParams, DeviceRecord, Ipv4Entry, NetworkInterface, ServiceEntry, TransportKind,
};
use devscan_discovery::{ConfigChannel, DiscoveryError, DiscoveryTransport, ScanEvent};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;

/// How long tests wait for an event before giving up
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(2);

/// Announce datagram as sent by a QuantumX module.
pub const QUANTUMX_ANNOUNCE: &str = r#"{
    "jsonrpc": "2.0",
    "method": "announce",
    "params": {
        "apiVersion": "1.0",
        "device": {
            "familyType": "QuantumX",
            "firmwareVersion": "4.46.18.0",
            "name": "MX1601B_Advantage",
            "type": "MX1601",
            "uuid": "0009E50046CC"
        },
        "expiration": 15,
        "netSettings": {
            "interface": {
                "configurationMethod": "dhcp",
                "ipv4": [{ "address": "172.19.106.101", "netmask": "255.255.0.0" }],
                "name": "eth0",
                "type": "ethernet"
            }
        },
        "services": [
            { "port": 7411, "type": "daqStream" },
            { "port": 5001, "type": "hbmProtocol" },
            { "port": 80, "type": "http" }
        ]
    }
}"#;

/// Transport driven by the test through [`MockTransport::emit`].
pub struct MockTransport {
    kind: TransportKind,
    event_tx: broadcast::Sender<ScanEvent>,
    running: AtomicBool,
    fail_start: bool,
    pub stop_calls: AtomicU64,
}

impl MockTransport {
    pub fn new(kind: TransportKind) -> Self {
        let (event_tx, _) = broadcast::channel(64);
        Self {
            kind,
            event_tx,
            running: AtomicBool::new(false),
            fail_start: false,
            stop_calls: AtomicU64::new(0),
        }
    }

    /// A transport whose `start` always fails to bind.
    pub fn failing(kind: TransportKind) -> Self {
        Self {
            fail_start: true,
            ..Self::new(kind)
        }
    }

    pub fn emit(&self, device: DeviceRecord) {
        let _ = self.event_tx.send(ScanEvent::observed(self.kind, device));
    }

    pub fn emit_error(&self, message: &str) {
        let _ = self.event_tx.send(ScanEvent::error(self.kind, message));
    }
}

#[async_trait]
impl DiscoveryTransport for MockTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn start(&self) -> devscan_discovery::Result<()> {
        if self.fail_start {
            return Err(DiscoveryError::bind_failed(
                "0.0.0.0:31416",
                "<b>address in use</b>",
            ));
        }
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> devscan_discovery::Result<()> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.event_tx.subscribe()
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Configure channel that records what it was asked to send.
#[derive(Default)]
pub struct MockConfigChannel {
    pub sent: Mutex<Vec<ConfigureParams>>,
    next_id: AtomicU64,
    fail: bool,
}

impl MockConfigChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }
}

#[async_trait]
impl ConfigChannel for MockConfigChannel {
    async fn configure(&self, params: ConfigureParams) -> devscan_discovery::Result<u64> {
        if self.fail {
            return Err(DiscoveryError::send_failed(
                "239.255.77.77:31417",
                "network unreachable",
            ));
        }
        self.sent.lock().push(params);
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

/// A device record with one IPv4 address and the given service types.
pub fn device(uuid: &str, name: &str, family: &str, ip: &str, services: &[(&str, u16)]) -> DeviceRecord {
    DeviceRecord {
        uuid: uuid.to_string(),
        name: name.to_string(),
        family_type: family.to_string(),
        network_interface: NetworkInterface {
            name: "eth0".to_string(),
            ipv4: vec![Ipv4Entry {
                address: ip.to_string(),
                netmask: "255.255.0.0".to_string(),
                gateway: None,
            }],
            ..Default::default()
        },
        services: services
            .iter()
            .map(|(ty, port)| ServiceEntry::new(*ty, *port))
            .collect(),
        ..Default::default()
    }
}

/// Receives the next message or panics after [`EVENT_TIMEOUT`].
pub async fn next<T: Clone>(rx: &mut broadcast::Receiver<T>) -> T {
    tokio::time::timeout(EVENT_TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("channel closed")
}
