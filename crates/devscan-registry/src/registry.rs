//! Device registry and liveness tracking.
//!
//! Every observation upserts the entry keyed by uuid. A periodic sweep flips
//! entries that have been silent for longer than the offline threshold.
//! Entries are never evicted; offline devices stay visible.

use crate::error::RegistryError;
use chrono::{DateTime, Utc};
use devscan_core::config::RegistryConfig;
use devscan_core::sanitize;
use devscan_core::types::{ConfigRequest, DeviceRecord, Ipv4Entry, RegistryEntry};
use devscan_discovery::ScanEvent;
use metrics::{counter, gauge};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Maximum number of notifications to buffer per subscriber
const NOTIFICATION_CHANNEL_CAPACITY: usize = 256;

/// Liveness transition kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// First observation of a uuid
    NewDevice,
    /// Observation of an entry the sweep had marked offline
    BackOnline,
    /// The sweep found an online entry stale
    WentOffline,
}

/// A liveness transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryNotification {
    pub kind: NotificationKind,
    pub uuid: String,
    pub name: String,
    pub record: DeviceRecord,
    pub timestamp: DateTime<Utc>,
}

impl RegistryNotification {
    fn new(kind: NotificationKind, entry: &RegistryEntry, timestamp: DateTime<Utc>) -> Self {
        Self {
            kind,
            uuid: entry.uuid().to_string(),
            name: entry.name().to_string(),
            record: entry.record.clone(),
            timestamp,
        }
    }
}

/// In-memory registry of discovered devices.
pub struct DeviceRegistry {
    /// All writers take the write lock; readers get cloned snapshots
    entries: RwLock<HashMap<String, RegistryEntry>>,

    notify_tx: broadcast::Sender<RegistryNotification>,

    sweep_interval: Duration,

    offline_threshold: chrono::Duration,

    max_name_chars: usize,
}

impl DeviceRegistry {
    pub fn new(config: &RegistryConfig) -> Self {
        let (notify_tx, _) = broadcast::channel(NOTIFICATION_CHANNEL_CAPACITY);
        let offline_threshold = chrono::Duration::from_std(config.offline_threshold())
            .unwrap_or_else(|_| chrono::Duration::seconds(i64::from(u32::MAX)));

        Self {
            entries: RwLock::new(HashMap::new()),
            notify_tx,
            sweep_interval: config.sweep_interval(),
            offline_threshold,
            max_name_chars: config.max_name_chars,
        }
    }

    /// Subscribes to liveness transitions.
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryNotification> {
        self.notify_tx.subscribe()
    }

    /// Ingests an observation made now.
    pub fn observe(
        &self,
        record: DeviceRecord,
    ) -> Result<Option<RegistryNotification>, RegistryError> {
        self.observe_at(record, Utc::now())
    }

    /// Ingests an observation made at `now`.
    ///
    /// Returns the transition it caused, if any. Refreshing an entry that is
    /// already online is silent.
    pub fn observe_at(
        &self,
        mut record: DeviceRecord,
        now: DateTime<Utc>,
    ) -> Result<Option<RegistryNotification>, RegistryError> {
        record.uuid = record.uuid.trim().to_string();
        if record.uuid.is_empty() {
            return Err(RegistryError::EmptyUuid);
        }
        record.name = sanitize::device_name(&record.name, self.max_name_chars);

        let notification = {
            let mut entries = self.entries.write();
            match entries.get_mut(&record.uuid) {
                Some(entry) => {
                    let was_online = entry.is_online;
                    entry.mark_seen(record, now);
                    (!was_online)
                        .then(|| RegistryNotification::new(NotificationKind::BackOnline, entry, now))
                }
                None => {
                    let entry = RegistryEntry::new(record, now);
                    let notification =
                        RegistryNotification::new(NotificationKind::NewDevice, &entry, now);
                    entries.insert(entry.uuid().to_string(), entry);
                    gauge!("registry_devices").set(entries.len() as f64);
                    Some(notification)
                }
            }
        };

        if let Some(notification) = &notification {
            info!(uuid = %notification.uuid, name = %notification.name, kind = ?notification.kind, "Device online");
            counter!("registry_transitions_total", "kind" => "online").increment(1);
            let _ = self.notify_tx.send(notification.clone());
        }

        Ok(notification)
    }

    /// Runs one liveness sweep now.
    pub fn sweep(&self) -> Vec<RegistryNotification> {
        self.sweep_at(Utc::now())
    }

    /// Flips every online entry silent for longer than the threshold.
    pub fn sweep_at(&self, now: DateTime<Utc>) -> Vec<RegistryNotification> {
        let transitions: Vec<RegistryNotification> = {
            let mut entries = self.entries.write();
            entries
                .values_mut()
                .filter(|entry| entry.is_online && entry.is_stale(now, self.offline_threshold))
                .map(|entry| {
                    entry.mark_offline();
                    RegistryNotification::new(NotificationKind::WentOffline, entry, now)
                })
                .collect()
        };

        for notification in &transitions {
            info!(uuid = %notification.uuid, name = %notification.name, "Device went offline");
            counter!("registry_transitions_total", "kind" => "offline").increment(1);
            let _ = self.notify_tx.send(notification.clone());
        }

        transitions
    }

    /// Copy of every entry.
    pub fn snapshot(&self) -> Vec<RegistryEntry> {
        self.entries.read().values().cloned().collect()
    }

    pub fn get(&self, uuid: &str) -> Option<RegistryEntry> {
        self.entries.read().get(uuid).cloned()
    }

    pub fn contains(&self, uuid: &str) -> bool {
        self.entries.read().contains_key(uuid)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn online_count(&self) -> usize {
        self.entries
            .read()
            .values()
            .filter(|entry| entry.is_online)
            .count()
    }

    /// Reflects an applied configuration request in the stored record.
    ///
    /// Sets the configuration method and, for manual requests, replaces the
    /// first IPv4 entry. Returns false if the uuid is unknown.
    pub fn apply_network_update(&self, request: &ConfigRequest) -> bool {
        let mut entries = self.entries.write();
        let Some(entry) = entries.get_mut(request.uuid.trim()) else {
            return false;
        };

        let interface = &mut entry.record.network_interface;
        interface.configuration_method = Some(request.method());

        if let Some(Ipv4Entry {
            address,
            netmask,
            gateway,
        }) = request.ipv4_entry()
        {
            let gateway = gateway.filter(|gw| !gw.is_empty());
            match interface.ipv4.first_mut() {
                Some(first) => {
                    first.address = address;
                    first.netmask = netmask;
                    first.gateway = gateway;
                }
                None => interface.ipv4.push(Ipv4Entry {
                    address,
                    netmask,
                    gateway,
                }),
            }
        }

        debug!(uuid = %request.uuid, method = %request.method(), "Registry entry updated from configuration");
        true
    }

    /// Ingests every device observation from `events` until the stream closes.
    pub fn attach(self: &Arc<Self>, mut events: broadcast::Receiver<ScanEvent>) -> JoinHandle<()> {
        let registry = Arc::clone(self);

        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(ScanEvent::DeviceObserved { origin, device }) => {
                        if let Err(e) = registry.observe(device) {
                            debug!(%origin, error = %e, "Observation dropped");
                        }
                    }
                    Ok(ScanEvent::Error { origin, message }) => {
                        debug!(%origin, %message, "Transport error");
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Registry fell behind scanner, observations dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("Registry ingest task stopped");
        })
    }

    /// Runs the liveness sweep on its configured interval.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        let period = self.sweep_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                registry.sweep();
            }
        })
    }
}
