//! # devscan discovery
//!
//! Discovery transports and the scanner that aggregates them.
//!
//! - [`VendorTransport`]: vendor multicast `announce` listener plus the
//!   `configure` sender ([`ConfigChannel`]).
//! - [`UpnpTransport`]: SSDP M-SEARCH with one bounded listen window per
//!   search and description-document resolution.
//! - [`MdnsTransport`]: DNS-SD browsing delegated to `mdns-sd`.
//! - [`Scanner`]: starts and stops a selection of transports and re-emits
//!   their [`ScanEvent`]s on one channel.
//!
//! ## Example
//!
//! ```no_run
//! use devscan_core::config::AppConfig;
//! use devscan_discovery::{ScanEvent, Scanner};
//!
//! # async fn example() -> devscan_discovery::Result<()> {
//! let config = AppConfig::default();
//! let scanner = Scanner::new(&config)?;
//! let mut events = scanner.subscribe();
//! scanner.start(&config.scanner).await?;
//!
//! while let Ok(event) = events.recv().await {
//!     if let ScanEvent::DeviceObserved { device, .. } = event {
//!         println!("{} {}", device.uuid, device.name);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod description;
pub mod error;
pub mod event;
pub mod mdns;
pub mod metrics;
pub mod scanner;
mod socket;
pub mod ssdp;
pub mod transport;
pub mod upnp;
pub mod vendor;

pub use error::{DiscoveryError, Result};
pub use event::ScanEvent;
pub use mdns::MdnsTransport;
pub use scanner::Scanner;
pub use transport::{ConfigChannel, DiscoveryTransport};
pub use upnp::{DescriptionFetcher, HttpFetcher, UpnpTransport};
pub use vendor::VendorTransport;
