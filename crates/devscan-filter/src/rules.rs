//! Filter rules over registry entries
//!
//! Each rule checks one field of a device. Rules are combined with AND by the
//! engine; a rule that errors excludes only the entry it was evaluating.

use crate::capability::{capabilities_of, Capability};
use devscan_core::types::RegistryEntry;
use std::collections::HashSet;
use thiserror::Error;

/// Result of a filter evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterResult {
    /// Entry passes the filter
    Pass,
    /// Entry is excluded by the filter
    Block,
}

impl FilterResult {
    /// Check if the result is Pass
    #[inline]
    pub fn is_pass(&self) -> bool {
        matches!(self, FilterResult::Pass)
    }

    /// Check if the result is Block
    #[inline]
    pub fn is_block(&self) -> bool {
        matches!(self, FilterResult::Block)
    }

    fn from_bool(pass: bool) -> Self {
        if pass {
            FilterResult::Pass
        } else {
            FilterResult::Block
        }
    }
}

/// A rule could not be evaluated for an entry
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{rule} failed: {reason}")]
pub struct FilterError {
    pub rule: String,
    pub reason: String,
}

/// Trait for filter rules
pub trait FilterRule: Send + Sync {
    /// Evaluate the rule against one entry
    fn evaluate(&self, entry: &RegistryEntry) -> Result<FilterResult, FilterError>;

    /// Get a human-readable description of this rule
    fn describe(&self) -> String;
}

/// Case-insensitive substring match on the device name
#[derive(Debug, Clone)]
pub struct NameFilter {
    needle: String,
}

impl NameFilter {
    pub fn new(needle: &str) -> Self {
        Self {
            needle: needle.to_lowercase(),
        }
    }
}

impl FilterRule for NameFilter {
    fn evaluate(&self, entry: &RegistryEntry) -> Result<FilterResult, FilterError> {
        Ok(FilterResult::from_bool(
            entry.name().to_lowercase().contains(&self.needle),
        ))
    }

    fn describe(&self) -> String {
        format!("NameFilter(contains: {:?})", self.needle)
    }
}

/// Family type must be one of the allowed set
#[derive(Debug, Clone)]
pub struct FamilyFilter {
    allow: HashSet<String>,
}

impl FamilyFilter {
    pub fn new(allow: HashSet<String>) -> Self {
        Self { allow }
    }
}

impl FilterRule for FamilyFilter {
    fn evaluate(&self, entry: &RegistryEntry) -> Result<FilterResult, FilterError> {
        Ok(FilterResult::from_bool(
            self.allow.contains(&entry.record.family_type),
        ))
    }

    fn describe(&self) -> String {
        format!("FamilyFilter(allow: {:?})", self.allow)
    }
}

/// Device must expose at least one of the wanted capabilities
#[derive(Debug, Clone)]
pub struct CapabilityFilter {
    any_of: HashSet<Capability>,
}

impl CapabilityFilter {
    pub fn new(any_of: HashSet<Capability>) -> Self {
        Self { any_of }
    }
}

impl FilterRule for CapabilityFilter {
    fn evaluate(&self, entry: &RegistryEntry) -> Result<FilterResult, FilterError> {
        Ok(FilterResult::from_bool(
            capabilities_of(&entry.record)
                .iter()
                .any(|cap| self.any_of.contains(cap)),
        ))
    }

    fn describe(&self) -> String {
        format!("CapabilityFilter(any_of: {:?})", self.any_of)
    }
}

/// Substring match against the first IPv4 address
#[derive(Debug, Clone)]
pub struct IpFilter {
    needle: String,
}

impl IpFilter {
    pub fn new(needle: &str) -> Self {
        Self {
            needle: needle.to_string(),
        }
    }
}

impl FilterRule for IpFilter {
    fn evaluate(&self, entry: &RegistryEntry) -> Result<FilterResult, FilterError> {
        Ok(FilterResult::from_bool(
            entry
                .record
                .primary_ipv4()
                .is_some_and(|ip| ip.contains(&self.needle)),
        ))
    }

    fn describe(&self) -> String {
        format!("IpFilter(contains: {:?})", self.needle)
    }
}

/// Substring match against the decimal form of any advertised port
#[derive(Debug, Clone)]
pub struct PortFilter {
    needle: String,
}

impl PortFilter {
    pub fn new(needle: &str) -> Self {
        Self {
            needle: needle.to_string(),
        }
    }
}

impl FilterRule for PortFilter {
    fn evaluate(&self, entry: &RegistryEntry) -> Result<FilterResult, FilterError> {
        Ok(FilterResult::from_bool(
            entry
                .record
                .services
                .iter()
                .any(|service| service.port.to_string().contains(&self.needle)),
        ))
    }

    fn describe(&self) -> String {
        format!("PortFilter(contains: {:?})", self.needle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devscan_core::types::{DeviceRecord, Ipv4Entry, NetworkInterface, ServiceEntry};

    fn entry() -> RegistryEntry {
        let record = DeviceRecord {
            uuid: "0009E50046CC".to_string(),
            name: "MX1601B_Advantage".to_string(),
            family_type: "QuantumX".to_string(),
            network_interface: NetworkInterface {
                ipv4: vec![Ipv4Entry {
                    address: "172.19.106.101".to_string(),
                    netmask: "255.255.0.0".to_string(),
                    gateway: None,
                }],
                ..Default::default()
            },
            services: vec![
                ServiceEntry::new("daqStream", 7411),
                ServiceEntry::new("hbmProtocol", 5001),
            ],
            ..Default::default()
        };
        RegistryEntry::new(record, chrono::Utc::now())
    }

    #[test]
    fn test_name_filter() {
        assert!(NameFilter::new("mx16").evaluate(&entry()).unwrap().is_pass());
        assert!(NameFilter::new("t100").evaluate(&entry()).unwrap().is_block());
    }

    #[test]
    fn test_family_filter() {
        let allow: HashSet<String> = ["QuantumX".to_string()].into();
        assert!(FamilyFilter::new(allow).evaluate(&entry()).unwrap().is_pass());

        let allow: HashSet<String> = ["SmartTorque".to_string()].into();
        assert!(FamilyFilter::new(allow).evaluate(&entry()).unwrap().is_block());
    }

    #[test]
    fn test_capability_filter() {
        let hbm: HashSet<Capability> = [Capability::Hbm, Capability::Avahi].into();
        assert!(CapabilityFilter::new(hbm).evaluate(&entry()).unwrap().is_pass());

        let upnp: HashSet<Capability> = [Capability::Upnp].into();
        assert!(CapabilityFilter::new(upnp).evaluate(&entry()).unwrap().is_block());
    }

    #[test]
    fn test_ip_and_port_filters() {
        assert!(IpFilter::new("172.19").evaluate(&entry()).unwrap().is_pass());
        assert!(IpFilter::new("10.").evaluate(&entry()).unwrap().is_block());

        assert!(PortFilter::new("741").evaluate(&entry()).unwrap().is_pass());
        assert!(PortFilter::new("80").evaluate(&entry()).unwrap().is_block());
    }

    #[test]
    fn test_ip_filter_without_address() {
        let mut entry = entry();
        entry.record.network_interface.ipv4.clear();
        assert!(IpFilter::new("1").evaluate(&entry).unwrap().is_block());
    }
}
