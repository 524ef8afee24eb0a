//! Per-transport counters, mirrored into the `metrics` facade.

use devscan_core::types::TransportKind;
use metrics::{counter, describe_counter};
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for one transport instance.
#[derive(Debug)]
pub struct TransportMetrics {
    origin: TransportKind,
    datagrams_received: AtomicU64,
    devices_observed: AtomicU64,
    parse_errors: AtomicU64,
    fetch_failures: AtomicU64,
}

impl TransportMetrics {
    pub fn new(origin: TransportKind) -> Self {
        describe_counter!(
            "discovery_datagrams_received_total",
            "Datagrams received by a discovery transport"
        );
        describe_counter!(
            "discovery_devices_observed_total",
            "Device observations emitted by a discovery transport"
        );
        describe_counter!(
            "discovery_parse_errors_total",
            "Malformed payloads dropped by a discovery transport"
        );
        describe_counter!(
            "discovery_fetch_failures_total",
            "Description documents that could not be retrieved"
        );

        Self {
            origin,
            datagrams_received: AtomicU64::new(0),
            devices_observed: AtomicU64::new(0),
            parse_errors: AtomicU64::new(0),
            fetch_failures: AtomicU64::new(0),
        }
    }

    pub fn record_datagram(&self) {
        self.datagrams_received.fetch_add(1, Ordering::Relaxed);
        counter!("discovery_datagrams_received_total", "origin" => self.origin.to_string())
            .increment(1);
    }

    pub fn record_device(&self) {
        self.devices_observed.fetch_add(1, Ordering::Relaxed);
        counter!("discovery_devices_observed_total", "origin" => self.origin.to_string())
            .increment(1);
    }

    pub fn record_parse_error(&self) {
        self.parse_errors.fetch_add(1, Ordering::Relaxed);
        counter!("discovery_parse_errors_total", "origin" => self.origin.to_string()).increment(1);
    }

    pub fn record_fetch_failure(&self) {
        self.fetch_failures.fetch_add(1, Ordering::Relaxed);
        counter!("discovery_fetch_failures_total", "origin" => self.origin.to_string())
            .increment(1);
    }

    pub fn datagrams_received(&self) -> u64 {
        self.datagrams_received.load(Ordering::Relaxed)
    }

    pub fn devices_observed(&self) -> u64 {
        self.devices_observed.load(Ordering::Relaxed)
    }

    pub fn parse_errors(&self) -> u64 {
        self.parse_errors.load(Ordering::Relaxed)
    }

    pub fn fetch_failures(&self) -> u64 {
        self.fetch_failures.load(Ordering::Relaxed)
    }
}
