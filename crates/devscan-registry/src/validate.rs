//! Dotted-quad grammars for configuration requests.

use regex::Regex;
use std::sync::OnceLock;

const OCTET: &str = r"(25[0-5]|2[0-4]\d|[01]?\d\d?)";
const MASK_OCTET: &str = r"(0|128|192|224|240|248|252|254|255)";

fn ipv4_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        let pattern = format!(r"^{o}\.{o}\.{o}\.{o}$", o = OCTET);
        Regex::new(&pattern).expect("static address pattern")
    })
}

fn netmask_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        let pattern = format!(r"^(255)\.{m}\.{m}\.{m}$", m = MASK_OCTET);
        Regex::new(&pattern).expect("static netmask pattern")
    })
}

/// Four decimal octets in 0..=255, dot separated.
pub fn is_valid_ipv4(value: &str) -> bool {
    ipv4_pattern().is_match(value)
}

/// A mask whose first octet is 255 and whose remaining octets are each a
/// contiguous-prefix value.
pub fn is_valid_netmask(value: &str) -> bool {
    netmask_pattern().is_match(value)
}
