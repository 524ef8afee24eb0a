//! Filter specification and input sanitization.

use crate::capability::Capability;
use crate::rules::{CapabilityFilter, FamilyFilter, FilterRule, IpFilter, NameFilter, PortFilter};
use devscan_core::sanitize;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::OnceLock;
use tracing::warn;

/// Longest accepted name filter, in characters
pub const MAX_NAME_FILTER_CHARS: usize = 50;

fn disallowed_name_chars() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[^\w\s\-.]").expect("static name filter pattern"))
}

/// Query over the registry. Empty fields mean "no constraint".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FilterSpec {
    /// Case-insensitive substring of the device name
    pub name: String,

    /// Allowed family types
    pub families: HashSet<String>,

    /// Device must expose at least one of these
    pub capabilities: HashSet<Capability>,

    /// Substring of the first IPv4 address
    pub ip: String,

    /// Substring of any advertised port
    pub port: String,
}

impl FilterSpec {
    /// Returns a copy with user input cleaned up.
    ///
    /// The name is clipped and stripped of characters other than word
    /// characters, whitespace, `-`, `_`, and `.`. IP and port values that
    /// contain anything but digits (and dots, for IP) are dropped.
    pub fn sanitized(&self) -> Self {
        let name = disallowed_name_chars()
            .replace_all(sanitize::clip(&self.name, MAX_NAME_FILTER_CHARS), "")
            .into_owned();

        let ip = if self.ip.chars().all(|c| c.is_ascii_digit() || c == '.') {
            self.ip.clone()
        } else {
            warn!(ip = %self.ip, "Invalid IP filter ignored");
            String::new()
        };

        let port = if self.port.chars().all(|c| c.is_ascii_digit()) {
            self.port.clone()
        } else {
            warn!(port = %self.port, "Invalid port filter ignored");
            String::new()
        };

        Self {
            name,
            families: self.families.clone(),
            capabilities: self.capabilities.clone(),
            ip,
            port,
        }
    }

    /// True when no field constrains the result.
    pub fn is_unconstrained(&self) -> bool {
        self.name.trim().is_empty()
            && self.families.is_empty()
            && self.capabilities.is_empty()
            && self.ip.trim().is_empty()
            && self.port.trim().is_empty()
    }

    /// Rules for the constrained fields, in evaluation order.
    pub fn rules(&self) -> Vec<Box<dyn FilterRule>> {
        let mut rules: Vec<Box<dyn FilterRule>> = Vec::new();

        if !self.name.trim().is_empty() {
            rules.push(Box::new(NameFilter::new(&self.name)));
        }
        if !self.families.is_empty() {
            rules.push(Box::new(FamilyFilter::new(self.families.clone())));
        }
        if !self.capabilities.is_empty() {
            rules.push(Box::new(CapabilityFilter::new(self.capabilities.clone())));
        }
        if !self.ip.trim().is_empty() {
            rules.push(Box::new(IpFilter::new(self.ip.trim())));
        }
        if !self.port.trim().is_empty() {
            rules.push(Box::new(PortFilter::new(self.port.trim())));
        }

        rules
    }
}
