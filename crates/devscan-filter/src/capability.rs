//! Coarse interface capabilities derived from advertised services.

use devscan_core::types::{DeviceRecord, RegistryEntry};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Capability classes, in display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Capability {
    Hbm,
    Dcp,
    Upnp,
    Avahi,
}

impl Capability {
    /// All capabilities, in display order.
    pub const ALL: [Capability; 4] = [
        Capability::Hbm,
        Capability::Dcp,
        Capability::Upnp,
        Capability::Avahi,
    ];

    /// Lowercase tag searched for in service types.
    pub fn tag(&self) -> &'static str {
        match self {
            Capability::Hbm => "hbm",
            Capability::Dcp => "dcp",
            Capability::Upnp => "upnp",
            Capability::Avahi => "avahi",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tag().to_ascii_uppercase())
    }
}

impl FromStr for Capability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Capability::ALL
            .into_iter()
            .find(|cap| cap.tag().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown capability '{}'", s))
    }
}

/// Capabilities of one device, in display order.
pub fn capabilities_of(record: &DeviceRecord) -> Vec<Capability> {
    let service_types: Vec<String> = record
        .services
        .iter()
        .map(|service| service.service_type.to_lowercase())
        .collect();

    Capability::ALL
        .into_iter()
        .filter(|cap| service_types.iter().any(|ty| ty.contains(cap.tag())))
        .collect()
}

/// Capabilities present on at least one entry, in display order.
pub fn available_capabilities(entries: &[RegistryEntry]) -> Vec<Capability> {
    let mut present: Vec<Capability> = entries
        .iter()
        .flat_map(|entry| capabilities_of(&entry.record))
        .collect();
    present.sort();
    present.dedup();
    present
}

#[cfg(test)]
mod tests {
    use super::*;
    use devscan_core::types::ServiceEntry;

    fn record(services: &[&str]) -> DeviceRecord {
        DeviceRecord {
            services: services.iter().map(|ty| ServiceEntry::new(*ty, 1)).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_capabilities_from_services() {
        let caps = capabilities_of(&record(&["daqStream", "hbmProtocol", "http", "UPnP-desc"]));
        assert_eq!(caps, vec![Capability::Hbm, Capability::Upnp]);
        assert!(capabilities_of(&record(&["http", "ssh"])).is_empty());
    }

    #[test]
    fn test_available_capabilities_order() {
        let now = chrono::Utc::now();
        let entries = vec![
            RegistryEntry::new(record(&["avahi/_http._tcp"]), now),
            RegistryEntry::new(record(&["dcpServer", "hbmProtocol"]), now),
            RegistryEntry::new(record(&["hbm"]), now),
        ];
        assert_eq!(
            available_capabilities(&entries),
            vec![Capability::Hbm, Capability::Dcp, Capability::Avahi]
        );
    }

    #[test]
    fn test_parse_and_display() {
        assert_eq!("upnp".parse::<Capability>().unwrap(), Capability::Upnp);
        assert_eq!("AVAHI".parse::<Capability>().unwrap(), Capability::Avahi);
        assert!("wifi".parse::<Capability>().is_err());
        assert_eq!(Capability::Dcp.to_string(), "DCP");
    }
}
