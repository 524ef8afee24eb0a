//! UPnP device description documents.
//!
//! Only flat leaf tags are read, by scanning for `<tag>value</tag>` pairs.
//! Nested elements, attributes on the recognized tags, and namespaces are not
//! supported; the documents served by the devices we care about are shallow.

use devscan_core::types::{DeviceRecord, Ipv4Entry, NetworkInterface, ServiceEntry};
use reqwest::Url;

/// Prefix a description body must start with
pub const XML_DECLARATION: &str = "<?xml";

/// Family assigned to devices found through UPnP
pub const UPNP_FAMILY: &str = "Other";

/// Recognized leaf fields of a description document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceDescription {
    pub friendly_name: Option<String>,
    pub manufacturer: Option<String>,
    pub model_description: Option<String>,
    pub model_name: Option<String>,
    pub model_number: Option<String>,
    pub serial_number: Option<String>,
    pub presentation_url: Option<String>,
}

impl DeviceDescription {
    /// Extracts the recognized tags; `None` if the body is not an XML document.
    pub fn parse(body: &str) -> Option<Self> {
        if !body.trim_start().starts_with(XML_DECLARATION) {
            return None;
        }

        Some(Self {
            friendly_name: leaf_value(body, "friendlyName"),
            manufacturer: leaf_value(body, "manufacturer"),
            model_description: leaf_value(body, "modelDescription"),
            model_name: leaf_value(body, "modelName"),
            model_number: leaf_value(body, "modelNumber"),
            serial_number: leaf_value(body, "serialNumber"),
            presentation_url: leaf_value(body, "presentationURL"),
        })
    }

    /// True when none of the recognized tags were present.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Normalizes into a device record.
    ///
    /// `serialNumber` becomes the uuid, so descriptions without one yield
    /// `None`. The device address is the host of `presentationURL`, falling
    /// back to the host of `location` when that URL is missing or relative.
    pub fn into_record(self, location: &str) -> Option<DeviceRecord> {
        let uuid = self.serial_number?;

        let host = self
            .presentation_url
            .as_deref()
            .and_then(url_host)
            .or_else(|| url_host(location));

        let ipv4 = host
            .map(|address| {
                vec![Ipv4Entry {
                    address,
                    ..Default::default()
                }]
            })
            .unwrap_or_default();

        Some(DeviceRecord {
            uuid,
            name: self.friendly_name.unwrap_or_default(),
            device_type: self.model_name.unwrap_or_default(),
            label: self.model_description,
            family_type: UPNP_FAMILY.to_string(),
            firmware_version: self.model_number.unwrap_or_default(),
            network_interface: NetworkInterface {
                ipv4,
                ..Default::default()
            },
            services: vec![ServiceEntry::new("http", 80)],
            ..Default::default()
        })
    }
}

fn url_host(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()?
        .host_str()
        .filter(|host| !host.is_empty())
        .map(str::to_string)
}

/// Text between the first `<tag>` and the following `</tag>`, trimmed.
fn leaf_value(body: &str, tag: &str) -> Option<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);

    let start = body.find(&open)? + open.len();
    let len = body[start..].find(&close)?;
    let value = body[start..start + len].trim();

    (!value.is_empty()).then(|| value.to_string())
}
