//! UPnP / SSDP discovery transport.
//!
//! Each search sends one M-SEARCH and listens for responses for exactly one
//! window of `MX` seconds; a later search replaces the window. Every unique
//! `Location` seen within a window is fetched once and, if it describes a
//! device with a serial number, reported as an observation. Fetch failures
//! are swallowed: SSDP responders routinely disappear before resolution.

use crate::description::DeviceDescription;
use crate::error::{DiscoveryError, Result};
use crate::event::{ScanEvent, EVENT_CHANNEL_CAPACITY};
use crate::metrics::TransportMetrics;
use crate::socket::{bind_udp, join_group, recv_backoff, MAX_DATAGRAM_SIZE};
use crate::ssdp::{build_msearch, SsdpResponse};
use crate::transport::DiscoveryTransport;
use async_trait::async_trait;
use dashmap::DashSet;
use devscan_core::config::UpnpConfig;
use devscan_core::types::TransportKind;
use parking_lot::Mutex;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Retrieves description documents.
#[async_trait]
pub trait DescriptionFetcher: Send + Sync {
    /// Returns the response body of a successful GET.
    async fn fetch(&self, url: &str) -> Result<String>;
}

/// Time-bounded HTTP fetcher.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DiscoveryError::Internal(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl DescriptionFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        let fetch_failed = |e: reqwest::Error| DiscoveryError::FetchFailed {
            url: url.to_string(),
            reason: e.to_string(),
        };

        self.client
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(fetch_failed)?
            .text()
            .await
            .map_err(fetch_failed)
    }
}

/// State shared between the transport and its listener/resolver tasks
struct SearchState {
    fetcher: Arc<dyn DescriptionFetcher>,

    /// Locations already fetched in the current window
    seen_locations: DashSet<String>,

    fetch_permits: Semaphore,

    event_tx: broadcast::Sender<ScanEvent>,

    metrics: TransportMetrics,
}

impl SearchState {
    /// Handles one response datagram. Returns the resolver task when a new
    /// location was accepted.
    fn handle_response(self: &Arc<Self>, payload: &[u8]) -> Option<JoinHandle<()>> {
        self.metrics.record_datagram();

        let text = String::from_utf8_lossy(payload);
        let response = SsdpResponse::parse(&text)?;
        let location = response.location()?.to_string();

        if !self.seen_locations.insert(location.clone()) {
            debug!(%location, "Location already resolved in this window");
            return None;
        }

        let state = Arc::clone(self);
        Some(tokio::spawn(async move { state.resolve(location).await }))
    }

    async fn resolve(&self, location: String) {
        let Ok(_permit) = self.fetch_permits.acquire().await else {
            return;
        };

        let body = match self.fetcher.fetch(&location).await {
            Ok(body) => body,
            Err(e) => {
                self.metrics.record_fetch_failure();
                debug!(%location, error = %e, "Description fetch failed");
                return;
            }
        };

        let Some(description) = DeviceDescription::parse(&body) else {
            debug!(%location, "Description is not an XML document");
            return;
        };
        if description.is_empty() {
            debug!(%location, "Description carries no recognized fields");
            return;
        }
        let Some(device) = description.into_record(&location) else {
            debug!(%location, "Description has no serial number");
            return;
        };

        debug!(uuid = %device.uuid, %location, "UPnP device resolved");
        self.metrics.record_device();
        let _ = self
            .event_tx
            .send(ScanEvent::observed(TransportKind::Upnp, device));
    }
}

/// SSDP search transport.
pub struct UpnpTransport {
    config: UpnpConfig,
    state: Arc<SearchState>,
    socket: Mutex<Option<Arc<UdpSocket>>>,

    /// Listener of the current search window
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl UpnpTransport {
    /// Creates the transport with an HTTP fetcher bounded by the configured timeout.
    pub fn new(config: UpnpConfig) -> Result<Self> {
        let fetcher = HttpFetcher::new(config.fetch_timeout())?;
        Ok(Self::with_fetcher(config, Arc::new(fetcher)))
    }

    /// Creates the transport with a custom description fetcher.
    pub fn with_fetcher(config: UpnpConfig, fetcher: Arc<dyn DescriptionFetcher>) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let state = Arc::new(SearchState {
            fetcher,
            seen_locations: DashSet::new(),
            fetch_permits: Semaphore::new(config.max_inflight_fetches),
            event_tx,
            metrics: TransportMetrics::new(TransportKind::Upnp),
        });

        Self {
            config,
            state,
            socket: Mutex::new(None),
            listener: Mutex::new(None),
        }
    }

    pub fn metrics(&self) -> &TransportMetrics {
        &self.state.metrics
    }

    /// Sends a new M-SEARCH and opens a fresh listen window.
    pub async fn search(&self) -> Result<()> {
        let socket = self
            .socket
            .lock()
            .clone()
            .ok_or_else(|| DiscoveryError::Internal("UPnP transport is not started".to_string()))?;

        self.begin_window();

        let window = self.config.search_window();
        let state = Arc::clone(&self.state);
        let listen_socket = Arc::clone(&socket);
        let listener = tokio::spawn(async move {
            let _ = tokio::time::timeout(window, listen(listen_socket, state)).await;
            debug!("SSDP search window closed");
        });
        if let Some(previous) = self.listener.lock().replace(listener) {
            previous.abort();
        }

        let request = build_msearch(
            self.config.ssdp_group,
            self.config.ssdp_port,
            self.config.mx_secs,
            &self.config.search_target,
        );
        let target = SocketAddrV4::new(self.config.ssdp_group, self.config.ssdp_port);
        socket
            .send_to(request.as_bytes(), target)
            .await
            .map_err(|e| DiscoveryError::send_failed(target, e))?;

        info!(%target, st = %self.config.search_target, "M-SEARCH sent");
        Ok(())
    }

    /// Returns the search socket, binding it on first use.
    fn ensure_socket(&self) -> Result<Arc<UdpSocket>> {
        let mut slot = self.socket.lock();
        if let Some(socket) = slot.as_ref() {
            return Ok(Arc::clone(socket));
        }

        let socket = bind_udp(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0))?;
        join_group(&socket, self.config.ssdp_group);
        let socket = Arc::new(socket);
        *slot = Some(Arc::clone(&socket));
        info!("UPnP transport started");
        Ok(socket)
    }

    /// Starts a new dedup window.
    fn begin_window(&self) {
        self.state.seen_locations.clear();
    }

    #[cfg(test)]
    fn handle_response(&self, payload: &[u8]) -> Option<JoinHandle<()>> {
        self.state.handle_response(payload)
    }
}

#[async_trait]
impl DiscoveryTransport for UpnpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Upnp
    }

    async fn start(&self) -> Result<()> {
        self.ensure_socket()?;
        self.search().await
    }

    async fn stop(&self) -> Result<()> {
        if let Some(listener) = self.listener.lock().take() {
            listener.abort();
        }
        if self.socket.lock().take().is_some() {
            info!("UPnP transport stopped");
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.state.event_tx.subscribe()
    }

    fn is_running(&self) -> bool {
        self.socket.lock().is_some()
    }
}

async fn listen(socket: Arc<UdpSocket>, state: Arc<SearchState>) {
    let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];
    let mut consecutive_errors = 0u32;

    loop {
        match socket.recv_from(&mut buffer).await {
            Ok((size, source)) => {
                consecutive_errors = 0;
                debug!(%source, size, "SSDP response received");
                state.handle_response(&buffer[..size]);
            }
            Err(e) => {
                consecutive_errors = consecutive_errors.saturating_add(1);
                let backoff = recv_backoff(consecutive_errors);
                warn!(
                    error = %e,
                    consecutive_errors,
                    backoff_ms = backoff.as_millis() as u64,
                    "Error receiving SSDP response"
                );
                // The search window timeout still bounds this loop
                tokio::time::sleep(backoff).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const RESPONSE: &str = "HTTP/1.1 200 OK\r\n\
                            CACHE-CONTROL: max-age=1800\r\n\
                            Location: http://10.0.0.5/desc.xml\r\n\
                            ST: upnp:rootdevice\r\n\r\n";

    const DESCRIPTION: &str = r#"<?xml version="1.0"?><root><friendlyName>Foo</friendlyName><serialNumber>abc-1</serialNumber><presentationURL>http://10.0.0.5</presentationURL></root>"#;

    #[derive(Default)]
    struct StaticFetcher {
        bodies: HashMap<String, String>,
        calls: AtomicUsize,
    }

    impl StaticFetcher {
        fn with(url: &str, body: &str) -> Self {
            let mut bodies = HashMap::new();
            bodies.insert(url.to_string(), body.to_string());
            Self {
                bodies,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl DescriptionFetcher for StaticFetcher {
        async fn fetch(&self, url: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.bodies
                .get(url)
                .cloned()
                .ok_or_else(|| DiscoveryError::FetchFailed {
                    url: url.to_string(),
                    reason: "connection refused".to_string(),
                })
        }
    }

    #[tokio::test]
    async fn test_response_resolves_to_device() {
        let fetcher = Arc::new(StaticFetcher::with("http://10.0.0.5/desc.xml", DESCRIPTION));
        let transport = UpnpTransport::with_fetcher(UpnpConfig::default(), fetcher.clone());
        let mut events = transport.subscribe();

        transport
            .handle_response(RESPONSE.as_bytes())
            .unwrap()
            .await
            .unwrap();

        match events.recv().await.unwrap() {
            ScanEvent::DeviceObserved { origin, device } => {
                assert_eq!(origin, TransportKind::Upnp);
                assert_eq!(device.uuid, "abc-1");
                assert_eq!(device.name, "Foo");
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(events.try_recv().is_err());
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_duplicate_location_fetched_once() {
        let fetcher = Arc::new(StaticFetcher::with("http://10.0.0.5/desc.xml", DESCRIPTION));
        let transport = UpnpTransport::with_fetcher(UpnpConfig::default(), fetcher.clone());

        let first = transport.handle_response(RESPONSE.as_bytes());
        let second = transport.handle_response(RESPONSE.as_bytes());
        assert!(second.is_none());
        first.unwrap().await.unwrap();

        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_new_window_clears_dedup() {
        let fetcher = Arc::new(StaticFetcher::with("http://10.0.0.5/desc.xml", DESCRIPTION));
        let transport = UpnpTransport::with_fetcher(UpnpConfig::default(), fetcher.clone());

        transport.handle_response(RESPONSE.as_bytes()).unwrap().await.unwrap();
        transport.begin_window();
        transport.handle_response(RESPONSE.as_bytes()).unwrap().await.unwrap();

        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_fetch_is_silent() {
        let fetcher = Arc::new(StaticFetcher::default());
        let transport = UpnpTransport::with_fetcher(UpnpConfig::default(), fetcher);
        let mut events = transport.subscribe();

        transport.handle_response(RESPONSE.as_bytes()).unwrap().await.unwrap();

        assert!(events.try_recv().is_err());
        assert_eq!(transport.metrics().fetch_failures(), 1);
    }

    #[tokio::test]
    async fn test_ignores_non_ok_and_locationless_responses() {
        let fetcher = Arc::new(StaticFetcher::default());
        let transport = UpnpTransport::with_fetcher(UpnpConfig::default(), fetcher.clone());

        assert!(transport
            .handle_response(b"NOTIFY * HTTP/1.1\r\nLocation: http://10.0.0.9/\r\n\r\n")
            .is_none());
        assert!(transport
            .handle_response(b"HTTP/1.1 200 OK\r\nST: upnp:rootdevice\r\n\r\n")
            .is_none());
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_non_xml_body_not_reported() {
        let fetcher = Arc::new(StaticFetcher::with("http://10.0.0.5/desc.xml", "<html></html>"));
        let transport = UpnpTransport::with_fetcher(UpnpConfig::default(), fetcher);
        let mut events = transport.subscribe();

        transport.handle_response(RESPONSE.as_bytes()).unwrap().await.unwrap();
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_search_socket_bound_once() {
        let transport =
            UpnpTransport::with_fetcher(UpnpConfig::default(), Arc::new(StaticFetcher::default()));

        let first = transport.ensure_socket().unwrap();
        let second = transport.ensure_socket().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(transport.is_running());

        transport.stop().await.unwrap();
        assert!(!transport.is_running());
        let rebound = transport.ensure_socket().unwrap();
        assert!(!Arc::ptr_eq(&first, &rebound));
        transport.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_without_start_is_noop() {
        let transport =
            UpnpTransport::with_fetcher(UpnpConfig::default(), Arc::new(StaticFetcher::default()));
        transport.stop().await.unwrap();
        transport.stop().await.unwrap();
        assert!(!transport.is_running());
        assert!(transport.search().await.is_err());
    }
}
