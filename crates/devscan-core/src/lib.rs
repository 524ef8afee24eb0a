//! # devscan core
//!
//! Core types, error handling, and configuration shared by the devscan crates.
//!
//! - **Types**: the canonical [`DeviceRecord`], the vendor JSON-RPC wire
//!   envelopes, [`RegistryEntry`], and [`ConfigRequest`].
//! - **Errors**: serializable `thiserror` enums for parse and configuration
//!   failures.
//! - **Configuration**: [`AppConfig`], loadable from YAML with environment
//!   overrides, with defaults matching the deployed multicast setup.
//! - **Sanitization**: clipping and markup stripping for untrusted strings.
//!
//! ## Example
//!
//! ```
//! use devscan_core::types::{AnnounceParams, DeviceRecord, JsonRpcMessage};
//!
//! let raw = r#"{"jsonrpc":"2.0","method":"announce","params":{"device":{"uuid":"0009E50046CC","name":"MX1601"}}}"#;
//! let msg: JsonRpcMessage<AnnounceParams> = serde_json::from_str(raw).unwrap();
//! let record = DeviceRecord::from(msg.params);
//! assert_eq!(record.uuid, "0009E50046CC");
//! ```

pub mod config;
pub mod error;
pub mod sanitize;
pub mod types;

// Re-export commonly used types for convenience
pub use config::AppConfig;
pub use error::{DevscanError, ParseError, Result};
pub use types::{
    ConfigRequest, ConfigurationMethod, ConfigureParams, DeviceRecord, RegistryEntry,
    ServiceEntry, TransportKind,
};
