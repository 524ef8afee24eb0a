//! Configuration management for devscan.
//!
//! Every field carries a default matching the deployed network setup, so an
//! empty YAML document is a valid configuration. Values can be loaded from
//! YAML directly or through the `config` crate with `DEVSCAN__*` environment
//! overrides.

use crate::error::{ConfigError, Result};
use crate::types::TransportKind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Main application configuration.
///
/// # Examples
///
/// ```
/// use devscan_core::config::AppConfig;
///
/// let config = AppConfig::from_yaml("registry:\n  offline_threshold_secs: 30\n").unwrap();
/// assert_eq!(config.registry.offline_threshold_secs, 30);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Which transports the scanner constructs
    #[serde(default)]
    pub scanner: ScannerConfig,

    #[serde(default)]
    pub vendor: VendorConfig,

    #[serde(default)]
    pub upnp: UpnpConfig,

    #[serde(default)]
    pub mdns: MdnsConfig,

    #[serde(default)]
    pub registry: RegistryConfig,

    #[serde(default)]
    pub dispatch: DispatchConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Loads configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::LoadFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        Self::from_yaml(&contents)
    }

    /// Loads configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(yaml).map_err(|e| {
            ConfigError::InvalidFormat {
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Loads configuration using the `config` crate: an optional YAML file
    /// overridden by `DEVSCAN__SECTION__FIELD` environment variables.
    pub fn from_config_builder(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix("DEVSCAN")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ConfigError::LoadFailed {
                path: path
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "<environment>".to_string()),
                reason: e.to_string(),
            })?;

        config.try_deserialize().map_err(|e| {
            ConfigError::InvalidFormat {
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        self.vendor.validate()?;
        self.upnp.validate()?;
        self.registry.validate()?;
        self.dispatch.validate()?;
        self.logging.parse_level()?;
        Ok(())
    }
}

/// Transport selection for the scanner aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScannerConfig {
    #[serde(default = "default_true")]
    pub vendor: bool,

    #[serde(default = "default_true")]
    pub mdns: bool,

    #[serde(default = "default_true")]
    pub upnp: bool,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            vendor: true,
            mdns: true,
            upnp: true,
        }
    }
}

impl ScannerConfig {
    /// Selection with only the given transports enabled.
    pub fn only(kinds: &[TransportKind]) -> Self {
        Self {
            vendor: kinds.contains(&TransportKind::Vendor),
            mdns: kinds.contains(&TransportKind::Mdns),
            upnp: kinds.contains(&TransportKind::Upnp),
        }
    }

    pub fn includes(&self, kind: TransportKind) -> bool {
        match kind {
            TransportKind::Vendor => self.vendor,
            TransportKind::Mdns => self.mdns,
            TransportKind::Upnp => self.upnp,
        }
    }

    /// Selected transports, in start order.
    pub fn selected(&self) -> Vec<TransportKind> {
        TransportKind::ALL
            .into_iter()
            .filter(|kind| self.includes(*kind))
            .collect()
    }
}

/// Vendor multicast protocol settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VendorConfig {
    /// Multicast group carrying device announcements
    #[serde(default = "default_announce_group")]
    pub announce_group: Ipv4Addr,

    #[serde(default = "default_announce_port")]
    pub announce_port: u16,

    /// Multicast group carrying configuration requests
    #[serde(default = "default_configure_group")]
    pub configure_group: Ipv4Addr,

    #[serde(default = "default_configure_port")]
    pub configure_port: u16,

    /// Multicast TTL for configure datagrams
    #[serde(default = "default_multicast_ttl")]
    pub multicast_ttl: u32,

    /// Raw payload text kept in parse error events
    #[serde(default = "default_max_error_chars")]
    pub max_error_chars: usize,
}

impl Default for VendorConfig {
    fn default() -> Self {
        Self {
            announce_group: default_announce_group(),
            announce_port: default_announce_port(),
            configure_group: default_configure_group(),
            configure_port: default_configure_port(),
            multicast_ttl: default_multicast_ttl(),
            max_error_chars: default_max_error_chars(),
        }
    }
}

impl VendorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.announce_port == 0 {
            return Err(ConfigError::invalid_value("vendor.announce_port", "cannot be 0").into());
        }
        if self.configure_port == 0 {
            return Err(ConfigError::invalid_value("vendor.configure_port", "cannot be 0").into());
        }
        if !self.announce_group.is_multicast() {
            return Err(ConfigError::invalid_value(
                "vendor.announce_group",
                format!("{} is not a multicast address", self.announce_group),
            )
            .into());
        }
        if !self.configure_group.is_multicast() {
            return Err(ConfigError::invalid_value(
                "vendor.configure_group",
                format!("{} is not a multicast address", self.configure_group),
            )
            .into());
        }
        Ok(())
    }
}

/// UPnP / SSDP settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpnpConfig {
    #[serde(default = "default_ssdp_group")]
    pub ssdp_group: Ipv4Addr,

    #[serde(default = "default_ssdp_port")]
    pub ssdp_port: u16,

    /// MX header value; also the length of one search window in seconds
    #[serde(default = "default_mx")]
    pub mx_secs: u64,

    #[serde(default = "default_search_target")]
    pub search_target: String,

    /// Upper bound on one description-document fetch
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,

    /// Upper bound on concurrently running fetches
    #[serde(default = "default_max_inflight_fetches")]
    pub max_inflight_fetches: usize,
}

impl Default for UpnpConfig {
    fn default() -> Self {
        Self {
            ssdp_group: default_ssdp_group(),
            ssdp_port: default_ssdp_port(),
            mx_secs: default_mx(),
            search_target: default_search_target(),
            fetch_timeout_secs: default_fetch_timeout(),
            max_inflight_fetches: default_max_inflight_fetches(),
        }
    }
}

impl UpnpConfig {
    pub fn search_window(&self) -> Duration {
        Duration::from_secs(self.mx_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.mx_secs == 0 {
            return Err(ConfigError::invalid_value("upnp.mx_secs", "cannot be 0").into());
        }
        if self.fetch_timeout_secs == 0 {
            return Err(ConfigError::invalid_value("upnp.fetch_timeout_secs", "cannot be 0").into());
        }
        if self.max_inflight_fetches == 0 {
            return Err(
                ConfigError::invalid_value("upnp.max_inflight_fetches", "cannot be 0").into(),
            );
        }
        if self.search_target.trim().is_empty() {
            return Err(ConfigError::invalid_value("upnp.search_target", "cannot be empty").into());
        }
        Ok(())
    }
}

/// Delegated mDNS resolver settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MdnsConfig {
    /// DNS-SD service types to browse
    #[serde(default = "default_mdns_service_types")]
    pub service_types: Vec<String>,
}

impl Default for MdnsConfig {
    fn default() -> Self {
        Self {
            service_types: default_mdns_service_types(),
        }
    }
}

/// Registry and liveness settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// How often the liveness sweep runs (seconds)
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Silence after which an online entry flips offline (seconds)
    #[serde(default = "default_offline_threshold")]
    pub offline_threshold_secs: u64,

    #[serde(default = "default_max_name_chars")]
    pub max_name_chars: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval(),
            offline_threshold_secs: default_offline_threshold(),
            max_name_chars: default_max_name_chars(),
        }
    }
}

impl RegistryConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn offline_threshold(&self) -> Duration {
        Duration::from_secs(self.offline_threshold_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sweep_interval_secs == 0 {
            return Err(
                ConfigError::invalid_value("registry.sweep_interval_secs", "cannot be 0").into(),
            );
        }
        // A threshold at or below the sweep interval flaps on one missed announce
        if self.offline_threshold_secs <= self.sweep_interval_secs {
            return Err(ConfigError::invalid_value(
                "registry.offline_threshold_secs",
                format!(
                    "must exceed sweep_interval_secs ({})",
                    self.sweep_interval_secs
                ),
            )
            .into());
        }
        if self.max_name_chars == 0 {
            return Err(ConfigError::invalid_value("registry.max_name_chars", "cannot be 0").into());
        }
        Ok(())
    }
}

/// Configuration dispatcher settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Minimum spacing between configuration requests (milliseconds)
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,

    /// `ttl` member of outbound configure payloads
    #[serde(default = "default_configure_ttl")]
    pub ttl: u32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            cooldown_ms: default_cooldown_ms(),
            ttl: default_configure_ttl(),
        }
    }
}

impl DispatchConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cooldown_ms == 0 {
            return Err(ConfigError::invalid_value("dispatch.cooldown_ms", "cannot be 0").into());
        }
        Ok(())
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "text" or "json"
    #[serde(default = "default_log_format")]
    pub format: LogFormat,

    /// Whether to include file/line info
    #[serde(default)]
    pub file_line: bool,

    /// Per-module log levels
    #[serde(default)]
    pub module_levels: HashMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::Text,
            file_line: false,
            module_levels: HashMap::new(),
        }
    }
}

impl LoggingConfig {
    /// Parses the log level string to a tracing Level.
    pub fn parse_level(&self) -> Result<Level> {
        self.level.parse().map_err(|_| {
            ConfigError::InvalidValue {
                field: "logging.level".to_string(),
                reason: format!("Invalid log level: {}", self.level),
            }
            .into()
        })
    }

    /// Builds an `EnvFilter` directive string from the level and module overrides.
    pub fn filter_directives(&self) -> String {
        let mut directives = vec![self.level.clone()];
        let mut modules: Vec<_> = self.module_levels.iter().collect();
        modules.sort();
        for (module, level) in modules {
            directives.push(format!("{}={}", module, level));
        }
        directives.join(",")
    }
}

/// Log format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text format
    Text,
    /// JSON format for structured logging
    Json,
}

fn default_true() -> bool {
    true
}

fn default_announce_group() -> Ipv4Addr {
    Ipv4Addr::new(239, 255, 77, 76)
}

fn default_announce_port() -> u16 {
    31416
}

fn default_configure_group() -> Ipv4Addr {
    Ipv4Addr::new(239, 255, 77, 77)
}

fn default_configure_port() -> u16 {
    31417
}

fn default_multicast_ttl() -> u32 {
    1
}

fn default_max_error_chars() -> usize {
    crate::sanitize::MAX_ERROR_CHARS
}

fn default_ssdp_group() -> Ipv4Addr {
    Ipv4Addr::new(239, 255, 255, 250)
}

fn default_ssdp_port() -> u16 {
    1900
}

fn default_mx() -> u64 {
    3
}

fn default_search_target() -> String {
    "upnp:rootdevice".to_string()
}

fn default_fetch_timeout() -> u64 {
    5
}

fn default_max_inflight_fetches() -> usize {
    16
}

fn default_mdns_service_types() -> Vec<String> {
    vec!["_http._tcp.local.".to_string()]
}

fn default_sweep_interval() -> u64 {
    5
}

fn default_offline_threshold() -> u64 {
    15
}

fn default_max_name_chars() -> usize {
    crate::sanitize::MAX_NAME_CHARS
}

fn default_cooldown_ms() -> u64 {
    2000
}

fn default_configure_ttl() -> u32 {
    120
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> LogFormat {
    LogFormat::Text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DevscanError;

    #[test]
    fn test_missing_file_is_load_failure() {
        let err = AppConfig::from_file("/nonexistent/devscan.yaml").unwrap_err();
        match err {
            DevscanError::Config(ConfigError::LoadFailed { path, .. }) => {
                assert_eq!(path, "/nonexistent/devscan.yaml")
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.vendor.announce_port, 31416);
        assert_eq!(config.vendor.configure_group, Ipv4Addr::new(239, 255, 77, 77));
        assert_eq!(config.upnp.mx_secs, 3);
        assert_eq!(config.registry.sweep_interval(), Duration::from_secs(5));
        assert_eq!(config.registry.offline_threshold(), Duration::from_secs(15));
        assert_eq!(config.dispatch.cooldown(), Duration::from_secs(2));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_yaml_is_default() {
        let config = AppConfig::from_yaml("").unwrap();
        assert!(config.scanner.vendor && config.scanner.mdns && config.scanner.upnp);
    }

    #[test]
    fn test_config_from_yaml() {
        let yaml = r#"
scanner:
  mdns: false

vendor:
  announce_port: 41416

upnp:
  search_target: ssdp:all
  max_inflight_fetches: 4

registry:
  sweep_interval_secs: 2
  offline_threshold_secs: 8

logging:
  level: debug
  format: json
"#;

        let config = AppConfig::from_yaml(yaml).unwrap();
        assert!(!config.scanner.mdns);
        assert_eq!(config.scanner.selected(), vec![TransportKind::Vendor, TransportKind::Upnp]);
        assert_eq!(config.vendor.announce_port, 41416);
        assert_eq!(config.vendor.configure_port, 31417);
        assert_eq!(config.upnp.search_target, "ssdp:all");
        assert_eq!(config.upnp.max_inflight_fetches, 4);
        assert_eq!(config.registry.offline_threshold_secs, 8);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_threshold_must_exceed_sweep_interval() {
        let mut config = AppConfig::default();
        config.registry.offline_threshold_secs = config.registry.sweep_interval_secs;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_non_multicast_group_rejected() {
        let mut config = AppConfig::default();
        config.vendor.announce_group = Ipv4Addr::new(192, 168, 1, 1);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_log_level_rejected() {
        let mut config = AppConfig::default();
        config.logging.level = "chatty".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_filter_directives() {
        let mut logging = LoggingConfig::default();
        logging
            .module_levels
            .insert("devscan_discovery".to_string(), "debug".to_string());
        assert_eq!(logging.filter_directives(), "info,devscan_discovery=debug");
    }

    #[test]
    fn test_scanner_selection() {
        let only = ScannerConfig::only(&[TransportKind::Upnp]);
        assert!(!only.includes(TransportKind::Vendor));
        assert!(only.includes(TransportKind::Upnp));
        assert_eq!(only.selected(), vec![TransportKind::Upnp]);
    }
}
