//! Core data model for discovered devices.
//!
//! The wire structures in this module mirror the JSON carried by vendor
//! announce/configure datagrams (camelCase members). [`DeviceRecord`] is the
//! flattened, transport-independent shape every discovery transport emits.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// JSON-RPC protocol version carried by every vendor datagram.
pub const JSONRPC_VERSION: &str = "2.0";

/// Method name of unsolicited device announcements.
pub const METHOD_ANNOUNCE: &str = "announce";

/// Method name of outbound configuration requests.
pub const METHOD_CONFIGURE: &str = "configure";

/// Discovery transport a record originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Vendor multicast announce/configure protocol
    Vendor,
    /// Delegated mDNS / DNS-SD resolver
    Mdns,
    /// UPnP / SSDP with description-document retrieval
    Upnp,
}

impl TransportKind {
    /// All transports, in start order.
    pub const ALL: [TransportKind; 3] = [TransportKind::Vendor, TransportKind::Mdns, TransportKind::Upnp];
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Vendor => write!(f, "vendor"),
            TransportKind::Mdns => write!(f, "mdns"),
            TransportKind::Upnp => write!(f, "upnp"),
        }
    }
}

/// How an interface obtains its IPv4 configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigurationMethod {
    /// Statically assigned address
    Manual,
    /// Address leased from a DHCP server
    Dhcp,
}

impl fmt::Display for ConfigurationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigurationMethod::Manual => write!(f, "manual"),
            ConfigurationMethod::Dhcp => write!(f, "dhcp"),
        }
    }
}

impl FromStr for ConfigurationMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "manual" => Ok(ConfigurationMethod::Manual),
            "dhcp" => Ok(ConfigurationMethod::Dhcp),
            other => Err(format!("unknown configuration method '{}'", other)),
        }
    }
}

/// Reads `configurationMethod` from untrusted input. Spellings other than
/// manual/dhcp (in any case), and non-string values, decode as `None`.
fn lenient_configuration_method<'de, D>(
    deserializer: D,
) -> Result<Option<ConfigurationMethod>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(raw
        .as_ref()
        .and_then(serde_json::Value::as_str)
        .and_then(|value| value.parse().ok()))
}

/// One IPv4 address assigned to an interface.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ipv4Entry {
    pub address: String,

    #[serde(default)]
    pub netmask: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,
}

/// One IPv6 address assigned to an interface.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ipv6Entry {
    pub address: String,

    #[serde(default)]
    pub prefix: u8,
}

/// Network interface as advertised by a device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterface {
    /// Interface name (e.g. "eth0")
    #[serde(default)]
    pub name: String,

    /// Link type (e.g. "ethernet", "wifi")
    #[serde(default, rename = "type")]
    pub link_type: String,

    /// Configuration method; some firmware omits it or reports other values
    #[serde(
        default,
        deserialize_with = "lenient_configuration_method",
        skip_serializing_if = "Option::is_none"
    )]
    pub configuration_method: Option<ConfigurationMethod>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub ipv4: Vec<Ipv4Entry>,

    #[serde(default)]
    pub ipv6: Vec<Ipv6Entry>,
}

/// A reachable sub-protocol advertised by a device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEntry {
    #[serde(rename = "type")]
    pub service_type: String,

    #[serde(default)]
    pub port: u16,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl ServiceEntry {
    /// Creates a service entry without a path.
    pub fn new(service_type: impl Into<String>, port: u16) -> Self {
        Self {
            service_type: service_type.into(),
            port,
            path: None,
        }
    }
}

/// Canonical description of one discovered device.
///
/// `uuid` is the only identity: two records with the same `uuid` describe the
/// same device at different points in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DeviceRecord {
    pub uuid: String,
    pub name: String,
    #[serde(rename = "type")]
    pub device_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub family_type: String,
    pub firmware_version: String,
    pub api_version: String,
    /// Advertiser's self-declared validity window; informational only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_seconds: Option<u32>,
    pub network_interface: NetworkInterface,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_gateway: Option<String>,
    pub services: Vec<ServiceEntry>,
}

impl DeviceRecord {
    /// Returns the first advertised IPv4 address, if any.
    pub fn primary_ipv4(&self) -> Option<&str> {
        self.network_interface
            .ipv4
            .first()
            .map(|entry| entry.address.as_str())
    }

    /// Returns the advertised configuration method, if any.
    pub fn configuration_method(&self) -> Option<ConfigurationMethod> {
        self.network_interface.configuration_method
    }
}

// ---------------------------------------------------------------------------
// Vendor wire format
// ---------------------------------------------------------------------------

/// JSON-RPC shaped envelope used on both vendor channels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcMessage<P> {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub params: P,
}

impl<P> JsonRpcMessage<P> {
    /// Builds an outbound configure request with the given id.
    pub fn configure(id: u64, params: P) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: METHOD_CONFIGURE.to_string(),
            id: Some(id.to_string()),
            params,
        }
    }
}

/// Identity block of an announce payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnouncedDevice {
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "type")]
    pub device_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default)]
    pub family_type: String,
    #[serde(default)]
    pub firmware_version: String,
}

/// Default gateway block (`netSettings.defaultGateway`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DefaultGateway {
    #[serde(default)]
    pub ipv4_address: String,
}

/// `netSettings` block of an announce payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnouncedNetSettings {
    #[serde(default)]
    pub interface: NetworkInterface,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_gateway: Option<DefaultGateway>,
}

/// `params` of an announce datagram.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnounceParams {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub device: AnnouncedDevice,
    #[serde(default)]
    pub net_settings: AnnouncedNetSettings,
    #[serde(default)]
    pub services: Vec<ServiceEntry>,
    #[serde(default)]
    pub expiration: Option<u32>,
}

impl From<AnnounceParams> for DeviceRecord {
    fn from(params: AnnounceParams) -> Self {
        let default_gateway = params
            .net_settings
            .default_gateway
            .map(|gw| gw.ipv4_address)
            .filter(|gw| !gw.is_empty());

        DeviceRecord {
            uuid: params.device.uuid,
            name: params.device.name,
            device_type: params.device.device_type,
            label: params.device.label,
            family_type: params.device.family_type,
            firmware_version: params.device.firmware_version,
            api_version: params.api_version,
            expiration_seconds: params.expiration,
            network_interface: params.net_settings.interface,
            default_gateway,
            services: params.services,
        }
    }
}

/// `params` of an outbound configure datagram.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigureParams {
    pub device: ConfigureDevice,
    pub net_settings: ConfigureNetSettings,
    pub ttl: u32,
}

/// Target device of a configure request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigureDevice {
    pub uuid: String,
}

/// `netSettings` block of a configure request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigureNetSettings {
    pub interface: ConfigureInterface,
}

/// Interface block of a configure request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigureInterface {
    pub name: String,
    pub configuration_method: ConfigurationMethod,
    pub ipv4: Vec<Ipv4Entry>,
    pub ipv6: Vec<Ipv6Entry>,
}

// ---------------------------------------------------------------------------
// Registry and dispatch data
// ---------------------------------------------------------------------------

/// A device as tracked by the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryEntry {
    pub record: DeviceRecord,

    /// First time this uuid was observed
    pub first_seen_at: DateTime<Utc>,

    /// Refreshed on every observation
    pub last_seen_at: DateTime<Utc>,

    pub is_online: bool,

    /// Number of observations since creation
    pub seen_count: u64,
}

impl RegistryEntry {
    /// Creates an online entry first observed at `now`.
    pub fn new(record: DeviceRecord, now: DateTime<Utc>) -> Self {
        Self {
            record,
            first_seen_at: now,
            last_seen_at: now,
            is_online: true,
            seen_count: 1,
        }
    }

    /// Replaces the record and refreshes liveness.
    pub fn mark_seen(&mut self, record: DeviceRecord, now: DateTime<Utc>) {
        self.record = record;
        self.last_seen_at = now;
        self.seen_count += 1;
        self.is_online = true;
    }

    /// Flips the entry offline, leaving the record untouched.
    pub fn mark_offline(&mut self) {
        self.is_online = false;
    }

    /// Returns true if not seen within `threshold` of `now`.
    pub fn is_stale(&self, now: DateTime<Utc>, threshold: chrono::Duration) -> bool {
        now - self.last_seen_at > threshold
    }

    pub fn uuid(&self) -> &str {
        &self.record.uuid
    }

    pub fn name(&self) -> &str {
        &self.record.name
    }
}

/// A user-initiated network reconfiguration of one device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigRequest {
    pub uuid: String,
    pub use_dhcp: bool,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub netmask: String,
    /// Optional; empty means "no gateway"
    #[serde(default)]
    pub gateway: String,
    pub interface_name: String,
}

impl ConfigRequest {
    /// Creates a DHCP request for `uuid` on `interface_name`.
    pub fn dhcp(uuid: impl Into<String>, interface_name: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            use_dhcp: true,
            interface_name: interface_name.into(),
            ..Default::default()
        }
    }

    /// Creates a manual request for `uuid` on `interface_name`.
    pub fn manual(
        uuid: impl Into<String>,
        interface_name: impl Into<String>,
        ip: impl Into<String>,
        netmask: impl Into<String>,
        gateway: impl Into<String>,
    ) -> Self {
        Self {
            uuid: uuid.into(),
            use_dhcp: false,
            ip: ip.into(),
            netmask: netmask.into(),
            gateway: gateway.into(),
            interface_name: interface_name.into(),
        }
    }

    pub fn method(&self) -> ConfigurationMethod {
        if self.use_dhcp {
            ConfigurationMethod::Dhcp
        } else {
            ConfigurationMethod::Manual
        }
    }

    /// The IPv4 entry a manual request asks for; `None` for DHCP.
    pub fn ipv4_entry(&self) -> Option<Ipv4Entry> {
        if self.use_dhcp {
            return None;
        }
        Some(Ipv4Entry {
            address: self.ip.clone(),
            netmask: self.netmask.clone(),
            gateway: Some(self.gateway.clone()),
        })
    }

    /// Builds the wire payload for this request.
    pub fn to_params(&self, ttl: u32) -> ConfigureParams {
        ConfigureParams {
            device: ConfigureDevice {
                uuid: self.uuid.trim().to_string(),
            },
            net_settings: ConfigureNetSettings {
                interface: ConfigureInterface {
                    name: self.interface_name.clone(),
                    configuration_method: self.method(),
                    ipv4: self.ipv4_entry().into_iter().collect(),
                    ipv6: Vec::new(),
                },
            },
            ttl,
        }
    }
}
