//! # devscan registry
//!
//! Client-side state for discovered devices:
//!
//! - [`DeviceRegistry`] turns the scanner's observations into a keyed,
//!   online/offline device list and publishes liveness transitions.
//! - [`ConfigDispatcher`] validates and rate-limits configuration requests,
//!   sends them through a [`devscan_discovery::ConfigChannel`], and reflects
//!   successful sends in the registry.

pub mod dispatch;
pub mod error;
pub mod registry;
pub mod validate;

pub use dispatch::{ConfigDispatcher, ConfigurationResult};
pub use error::{DispatchError, RegistryError};
pub use registry::{DeviceRegistry, NotificationKind, RegistryNotification};
