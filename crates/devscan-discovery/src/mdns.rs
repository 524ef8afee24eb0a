//! Delegated mDNS / DNS-SD transport.
//!
//! Resolution is left entirely to `mdns-sd`; this transport only browses the
//! configured service types and projects resolved services into device
//! records.

use crate::error::{DiscoveryError, Result};
use crate::event::{ScanEvent, EVENT_CHANNEL_CAPACITY};
use crate::metrics::TransportMetrics;
use crate::transport::DiscoveryTransport;
use async_trait::async_trait;
use dashmap::DashMap;
use devscan_core::config::MdnsConfig;
use devscan_core::types::{DeviceRecord, Ipv4Entry, NetworkInterface, ServiceEntry, TransportKind};
use mdns_sd::{ServiceDaemon, ServiceEvent as MdnsEvent, ServiceInfo};
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Prefix of service entries produced by this transport
pub const MDNS_SERVICE_PREFIX: &str = "avahi";

/// Family assigned to devices found through mDNS
pub const MDNS_FAMILY: &str = "Other";

/// Browses DNS-SD service types through an mDNS daemon.
pub struct MdnsTransport {
    config: MdnsConfig,

    daemon: ServiceDaemon,

    event_tx: broadcast::Sender<ScanEvent>,

    running: Arc<AtomicBool>,

    /// Browse tasks keyed by service type
    browsers: DashMap<String, JoinHandle<()>>,

    metrics: Arc<TransportMetrics>,
}

impl MdnsTransport {
    pub fn new(config: MdnsConfig) -> Result<Self> {
        let daemon = ServiceDaemon::new().map_err(|e| {
            DiscoveryError::MdnsInitFailed(format!("Failed to create mDNS daemon: {}", e))
        })?;

        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        info!(service_types = ?config.service_types, "mDNS transport created");

        Ok(Self {
            config,
            daemon,
            event_tx,
            running: Arc::new(AtomicBool::new(false)),
            browsers: DashMap::new(),
            metrics: Arc::new(TransportMetrics::new(TransportKind::Mdns)),
        })
    }

    pub fn metrics(&self) -> &TransportMetrics {
        &self.metrics
    }

    fn start_browser(&self, service_type: &str) -> Result<()> {
        let receiver = self
            .daemon
            .browse(service_type)
            .map_err(|e| DiscoveryError::BrowseFailed {
                service_type: service_type.to_string(),
                reason: e.to_string(),
            })?;

        let event_tx = self.event_tx.clone();
        let running = self.running.clone();
        let metrics = self.metrics.clone();
        let browsed = service_type.to_string();

        let task = tokio::spawn(async move {
            while running.load(Ordering::SeqCst) {
                match receiver.recv_async().await {
                    Ok(event) => handle_mdns_event(event, &event_tx, &metrics),
                    Err(e) => {
                        debug!(error = %e, "mDNS browse channel closed");
                        break;
                    }
                }
            }
            debug!(service_type = %browsed, "Browser task stopped");
        });

        self.browsers.insert(service_type.to_string(), task);
        Ok(())
    }
}

#[async_trait]
impl DiscoveryTransport for MdnsTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Mdns
    }

    async fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let mut last_error = None;
        for service_type in &self.config.service_types {
            info!(%service_type, "Starting mDNS browser");
            if let Err(e) = self.start_browser(service_type) {
                warn!(%service_type, error = %e, "mDNS browse failed, skipping service type");
                last_error = Some(e);
            }
        }

        if self.browsers.is_empty() {
            self.running.store(false, Ordering::SeqCst);
            if let Some(e) = last_error {
                return Err(e);
            }
        }

        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        let service_types: Vec<String> = self.browsers.iter().map(|e| e.key().clone()).collect();
        for service_type in service_types {
            if let Err(e) = self.daemon.stop_browse(&service_type) {
                debug!(%service_type, error = %e, "Failed to stop mDNS browse");
            }
            if let Some((_, task)) = self.browsers.remove(&service_type) {
                task.abort();
            }
        }

        info!("mDNS transport stopped");
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.event_tx.subscribe()
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for MdnsTransport {
    fn drop(&mut self) {
        if let Err(e) = self.daemon.shutdown() {
            error!(error = %e, "Failed to shut down mDNS daemon");
        }
    }
}

fn handle_mdns_event(
    event: MdnsEvent,
    event_tx: &broadcast::Sender<ScanEvent>,
    metrics: &TransportMetrics,
) {
    match event {
        MdnsEvent::ServiceResolved(info) => {
            debug!(
                service = info.get_fullname(),
                hostname = info.get_hostname(),
                port = info.get_port(),
                "Service resolved"
            );
            metrics.record_device();
            let _ = event_tx.send(ScanEvent::observed(TransportKind::Mdns, record_from_service(&info)));
        }
        MdnsEvent::SearchStarted(ty) => debug!(ty = ty, "Search started"),
        MdnsEvent::SearchStopped(ty) => debug!(ty = ty, "Search stopped"),
        _ => {}
    }
}

/// Projects a resolved DNS-SD service into a device record.
///
/// The full service name is the identity. The service entry type is
/// prefixed with `avahi` so capability derivation can recognize it.
pub fn record_from_service(info: &ServiceInfo) -> DeviceRecord {
    let fullname = info.get_fullname();
    let service_type = info.get_type();

    let name = fullname
        .strip_suffix(service_type)
        .unwrap_or(fullname)
        .trim_end_matches('.')
        .to_string();

    let mut ipv4: Vec<Ipv4Entry> = info
        .get_addresses()
        .iter()
        .filter_map(|addr| match addr {
            IpAddr::V4(v4) => Some(Ipv4Entry {
                address: v4.to_string(),
                ..Default::default()
            }),
            IpAddr::V6(_) => None,
        })
        .collect();
    ipv4.sort_by(|a, b| a.address.cmp(&b.address));

    let short_type = service_type.trim_end_matches('.').trim_end_matches(".local");

    DeviceRecord {
        uuid: fullname.to_string(),
        name,
        device_type: info
            .get_property_val_str("model")
            .unwrap_or_default()
            .to_string(),
        family_type: MDNS_FAMILY.to_string(),
        network_interface: NetworkInterface {
            ipv4,
            ..Default::default()
        },
        services: vec![ServiceEntry::new(
            format!("{}/{}", MDNS_SERVICE_PREFIX, short_type),
            info.get_port(),
        )],
        ..Default::default()
    }
}
