//! Rate-limited configuration dispatcher.
//!
//! Requests are gated by a cooldown, checked against the registry, validated,
//! and handed to a [`ConfigChannel`]. The channel gives no acknowledgement,
//! so a successful send is reported as success and reflected in the registry
//! immediately.

use crate::error::DispatchError;
use crate::registry::DeviceRegistry;
use crate::validate::{is_valid_ipv4, is_valid_netmask};
use devscan_core::config::DispatchConfig;
use devscan_core::types::ConfigRequest;
use devscan_discovery::ConfigChannel;
use metrics::counter;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{info, warn};

/// Maximum number of results to buffer per subscriber
const RESULT_CHANNEL_CAPACITY: usize = 64;

/// Outcome of one configuration attempt, as published to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationResult {
    pub uuid: String,
    pub success: bool,
    pub message: String,
}

/// Validates, rate-limits, and sends configuration requests.
pub struct ConfigDispatcher {
    registry: Arc<DeviceRegistry>,
    channel: Arc<dyn ConfigChannel>,
    cooldown: Duration,
    ttl: u32,

    /// Start of the most recent attempt that passed the gate
    last_attempt: Mutex<Option<Instant>>,

    result_tx: broadcast::Sender<ConfigurationResult>,
}

impl ConfigDispatcher {
    pub fn new(
        config: &DispatchConfig,
        registry: Arc<DeviceRegistry>,
        channel: Arc<dyn ConfigChannel>,
    ) -> Self {
        let (result_tx, _) = broadcast::channel(RESULT_CHANNEL_CAPACITY);
        Self {
            registry,
            channel,
            cooldown: config.cooldown(),
            ttl: config.ttl,
            last_attempt: Mutex::new(None),
            result_tx,
        }
    }

    /// Subscribes to configuration results.
    pub fn subscribe(&self) -> broadcast::Receiver<ConfigurationResult> {
        self.result_tx.subscribe()
    }

    /// Dispatches one request and returns the id it was sent with.
    ///
    /// Any request that passes the cooldown gate consumes the cooldown, even
    /// if it is later rejected by validation.
    pub async fn configure(&self, request: &ConfigRequest) -> Result<u64, DispatchError> {
        self.acquire_slot()?;

        let uuid = request.uuid.trim();
        let outcome = match self.validate(request) {
            Ok(()) => self.send(request).await,
            Err(e) => Err(e),
        };

        let result = match &outcome {
            Ok(id) => {
                info!(%uuid, id, method = %request.method(), "Configuration sent");
                counter!("dispatch_requests_total", "outcome" => "sent").increment(1);
                ConfigurationResult {
                    uuid: uuid.to_string(),
                    success: true,
                    message: format!("Configuration sent (request {})", id),
                }
            }
            Err(e) => {
                warn!(%uuid, error = %e, "Configuration rejected");
                counter!("dispatch_requests_total", "outcome" => "failed").increment(1);
                ConfigurationResult {
                    uuid: uuid.to_string(),
                    success: false,
                    message: e.to_string(),
                }
            }
        };
        let _ = self.result_tx.send(result);

        outcome
    }

    /// Atomic check-and-set of the cooldown gate.
    fn acquire_slot(&self) -> Result<(), DispatchError> {
        let now = Instant::now();
        let mut last = self.last_attempt.lock();

        if let Some(previous) = *last {
            let elapsed = now.saturating_duration_since(previous);
            if elapsed < self.cooldown {
                let retry_after = self.cooldown - elapsed;
                counter!("dispatch_requests_total", "outcome" => "rate_limited").increment(1);
                return Err(DispatchError::RateLimited {
                    retry_after_ms: u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX),
                });
            }
        }

        *last = Some(now);
        Ok(())
    }

    fn validate(&self, request: &ConfigRequest) -> Result<(), DispatchError> {
        let uuid = request.uuid.trim();
        if uuid.is_empty() || !self.registry.contains(uuid) {
            return Err(DispatchError::UnknownDevice(uuid.to_string()));
        }

        if request.use_dhcp {
            return Ok(());
        }
        if !is_valid_ipv4(&request.ip) {
            return Err(DispatchError::invalid_address("ip", &request.ip));
        }
        if !is_valid_netmask(&request.netmask) {
            return Err(DispatchError::invalid_address("netmask", &request.netmask));
        }
        if !request.gateway.is_empty() && !is_valid_ipv4(&request.gateway) {
            return Err(DispatchError::invalid_address("gateway", &request.gateway));
        }
        Ok(())
    }

    async fn send(&self, request: &ConfigRequest) -> Result<u64, DispatchError> {
        let id = self
            .channel
            .configure(request.to_params(self.ttl))
            .await
            .map_err(|e| DispatchError::TransportSendFailure(e.to_string()))?;

        self.registry.apply_network_update(request);
        Ok(id)
    }
}
