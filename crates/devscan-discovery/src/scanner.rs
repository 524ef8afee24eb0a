//! Scanner aggregator.
//!
//! Owns the transports selected at construction time and multiplexes their
//! events onto one channel. A failing transport degrades the scan but never
//! stops the others.

use crate::error::{DiscoveryError, Result};
use crate::event::{ScanEvent, EVENT_CHANNEL_CAPACITY};
use crate::mdns::MdnsTransport;
use crate::transport::DiscoveryTransport;
use crate::upnp::UpnpTransport;
use crate::vendor::VendorTransport;
use devscan_core::config::{AppConfig, ScannerConfig};
use devscan_core::sanitize;
use devscan_core::types::TransportKind;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Aggregates discovery transports behind one lifecycle.
pub struct Scanner {
    transports: HashMap<TransportKind, Arc<dyn DiscoveryTransport>>,

    /// Concrete handle kept for the configure channel
    vendor: Option<Arc<VendorTransport>>,

    event_tx: broadcast::Sender<ScanEvent>,

    /// Forwarder task per started transport
    started: Mutex<HashMap<TransportKind, JoinHandle<()>>>,

    running: AtomicBool,

    max_error_chars: usize,
}

impl Scanner {
    /// Creates a scanner without transports.
    pub fn empty() -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            transports: HashMap::new(),
            vendor: None,
            event_tx,
            started: Mutex::new(HashMap::new()),
            running: AtomicBool::new(false),
            max_error_chars: sanitize::MAX_ERROR_CHARS,
        }
    }

    /// Constructs the transports selected in `config.scanner`.
    pub fn new(config: &AppConfig) -> Result<Self> {
        let mut scanner = Self::empty();
        scanner.max_error_chars = config.vendor.max_error_chars;

        if config.scanner.vendor {
            let vendor = Arc::new(VendorTransport::new(config.vendor.clone())?);
            scanner.vendor = Some(vendor.clone());
            scanner = scanner.with_transport(vendor);
        }
        if config.scanner.mdns {
            scanner = scanner.with_transport(Arc::new(MdnsTransport::new(config.mdns.clone())?));
        }
        if config.scanner.upnp {
            scanner = scanner.with_transport(Arc::new(UpnpTransport::new(config.upnp.clone())?));
        }

        info!(transports = ?scanner.configured(), "Scanner created");
        Ok(scanner)
    }

    /// Adds (or replaces) a transport.
    pub fn with_transport(mut self, transport: Arc<dyn DiscoveryTransport>) -> Self {
        self.transports.insert(transport.kind(), transport);
        self
    }

    /// Transports constructed in this scanner, in start order.
    pub fn configured(&self) -> Vec<TransportKind> {
        TransportKind::ALL
            .into_iter()
            .filter(|kind| self.transports.contains_key(kind))
            .collect()
    }

    /// The vendor transport, when one was constructed.
    pub fn vendor(&self) -> Option<Arc<VendorTransport>> {
        self.vendor.clone()
    }

    /// Subscribes to the unified event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.event_tx.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Starts every transport in `selection`.
    ///
    /// Fails with [`DiscoveryError::TransportNotConfigured`] before starting
    /// anything if a selected transport was not constructed. A transport that
    /// fails to start is reported on the event stream and skipped.
    pub async fn start(&self, selection: &ScannerConfig) -> Result<()> {
        let selected = selection.selected();
        if let Some(missing) = selected
            .iter()
            .find(|kind| !self.transports.contains_key(*kind))
        {
            return Err(DiscoveryError::TransportNotConfigured(*missing));
        }

        self.running.store(true, Ordering::SeqCst);

        for kind in selected {
            if self.started.lock().contains_key(&kind) {
                debug!(origin = %kind, "Transport already started");
                continue;
            }
            let transport = self.transports[&kind].clone();

            // Subscribe first so nothing emitted during start is lost
            let forwarder = tokio::spawn(forward(
                kind,
                transport.subscribe(),
                self.event_tx.clone(),
            ));

            match transport.start().await {
                Ok(()) => {
                    info!(origin = %kind, "Transport started");
                    self.started.lock().insert(kind, forwarder);
                }
                Err(e) => {
                    forwarder.abort();
                    warn!(origin = %kind, error = %e, "Transport failed to start");
                    let message = sanitize::strip_markup(&e.to_string(), self.max_error_chars);
                    let _ = self.event_tx.send(ScanEvent::error(kind, message));
                }
            }
        }

        Ok(())
    }

    /// Stops one transport; unknown transports are a configuration error.
    pub async fn stop_transport(&self, kind: TransportKind) -> Result<()> {
        let transport = self
            .transports
            .get(&kind)
            .ok_or(DiscoveryError::TransportNotConfigured(kind))?;

        let forwarder = self.started.lock().remove(&kind);
        let Some(forwarder) = forwarder else {
            return Ok(());
        };

        if let Err(e) = transport.stop().await {
            warn!(origin = %kind, error = %e, "Transport failed to stop cleanly");
        }
        forwarder.abort();
        Ok(())
    }

    /// Stops every started transport; safe to call repeatedly.
    pub async fn stop(&self) -> Result<()> {
        let started: Vec<TransportKind> = self.started.lock().keys().copied().collect();
        for kind in started {
            self.stop_transport(kind).await?;
        }

        if self.running.swap(false, Ordering::SeqCst) {
            info!("Scanner stopped");
        }
        Ok(())
    }
}

async fn forward(
    origin: TransportKind,
    mut rx: broadcast::Receiver<ScanEvent>,
    tx: broadcast::Sender<ScanEvent>,
) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                let _ = tx.send(event);
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(%origin, skipped, "Scanner fell behind transport, events dropped");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use devscan_core::types::DeviceRecord;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct FakeTransport {
        kind: TransportKind,
        tx: broadcast::Sender<ScanEvent>,
        fail_start: bool,
        starts: AtomicUsize,
        stops: AtomicUsize,
    }

    impl FakeTransport {
        fn new(kind: TransportKind) -> Arc<Self> {
            Self::build(kind, false)
        }

        fn failing(kind: TransportKind) -> Arc<Self> {
            Self::build(kind, true)
        }

        fn build(kind: TransportKind, fail_start: bool) -> Arc<Self> {
            let (tx, _) = broadcast::channel(16);
            Arc::new(Self {
                kind,
                tx,
                fail_start,
                starts: AtomicUsize::new(0),
                stops: AtomicUsize::new(0),
            })
        }

        fn emit(&self, uuid: &str) {
            let device = DeviceRecord {
                uuid: uuid.to_string(),
                ..Default::default()
            };
            let _ = self.tx.send(ScanEvent::observed(self.kind, device));
        }
    }

    #[async_trait]
    impl DiscoveryTransport for FakeTransport {
        fn kind(&self) -> TransportKind {
            self.kind
        }

        async fn start(&self) -> Result<()> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            if self.fail_start {
                return Err(DiscoveryError::bind_failed("0.0.0.0:31416", "<b>address in use</b>"));
            }
            Ok(())
        }

        async fn stop(&self) -> Result<()> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
            self.tx.subscribe()
        }

        fn is_running(&self) -> bool {
            self.starts.load(Ordering::SeqCst) > self.stops.load(Ordering::SeqCst)
        }
    }

    #[tokio::test]
    async fn test_unconfigured_transport_fails_loudly() {
        let vendor = FakeTransport::new(TransportKind::Vendor);
        let scanner = Scanner::empty().with_transport(vendor.clone());

        let err = scanner.start(&ScannerConfig::default()).await.unwrap_err();
        assert!(matches!(err, DiscoveryError::TransportNotConfigured(TransportKind::Mdns)));
        assert_eq!(vendor.starts.load(Ordering::SeqCst), 0);
        assert!(!scanner.is_running());

        let err = scanner.stop_transport(TransportKind::Upnp).await.unwrap_err();
        assert!(matches!(err, DiscoveryError::TransportNotConfigured(TransportKind::Upnp)));
    }

    #[tokio::test]
    async fn test_events_are_forwarded() {
        let vendor = FakeTransport::new(TransportKind::Vendor);
        let upnp = FakeTransport::new(TransportKind::Upnp);
        let scanner = Scanner::empty()
            .with_transport(vendor.clone())
            .with_transport(upnp.clone());
        let mut events = scanner.subscribe();

        let selection = ScannerConfig::only(&[TransportKind::Vendor, TransportKind::Upnp]);
        scanner.start(&selection).await.unwrap();
        assert!(scanner.is_running());

        vendor.emit("dev-1");
        upnp.emit("dev-1");

        let first = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .unwrap()
            .unwrap();
        let second = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .unwrap()
            .unwrap();

        // Same uuid from two transports is not merged
        let mut origins = vec![first.origin(), second.origin()];
        origins.sort_by_key(|kind| kind.to_string());
        assert_eq!(origins, vec![TransportKind::Upnp, TransportKind::Vendor]);
    }

    #[tokio::test]
    async fn test_failed_start_is_isolated() {
        let vendor = FakeTransport::failing(TransportKind::Vendor);
        let upnp = FakeTransport::new(TransportKind::Upnp);
        let scanner = Scanner::empty()
            .with_transport(vendor.clone())
            .with_transport(upnp.clone());
        let mut events = scanner.subscribe();

        let selection = ScannerConfig::only(&[TransportKind::Vendor, TransportKind::Upnp]);
        scanner.start(&selection).await.unwrap();

        match events.recv().await.unwrap() {
            ScanEvent::Error { origin, message } => {
                assert_eq!(origin, TransportKind::Vendor);
                assert!(!message.contains('<'));
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(upnp.starts.load(Ordering::SeqCst), 1);

        // Only the started transport is stopped
        scanner.stop().await.unwrap();
        assert_eq!(vendor.stops.load(Ordering::SeqCst), 0);
        assert_eq!(upnp.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let mdns = FakeTransport::new(TransportKind::Mdns);
        let scanner = Scanner::empty().with_transport(mdns.clone());

        scanner.stop().await.unwrap();
        scanner
            .start(&ScannerConfig::only(&[TransportKind::Mdns]))
            .await
            .unwrap();
        scanner.stop().await.unwrap();
        scanner.stop().await.unwrap();

        assert_eq!(mdns.stops.load(Ordering::SeqCst), 1);
        assert!(!scanner.is_running());
    }
}
