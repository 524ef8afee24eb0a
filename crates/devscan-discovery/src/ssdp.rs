//! SSDP message building and response parsing.

use std::collections::HashMap;
use std::net::Ipv4Addr;

/// Status line every accepted search response starts with
pub const OK_STATUS_LINE: &str = "HTTP/1.1 200 OK";

/// Response headers we keep; anything else is ignored
const KNOWN_HEADERS: [&str; 8] = [
    "cache-control",
    "date",
    "ext",
    "location",
    "server",
    "st",
    "usn",
    "content-length",
];

/// Builds an M-SEARCH request.
pub fn build_msearch(group: Ipv4Addr, port: u16, mx_secs: u64, search_target: &str) -> String {
    format!(
        "M-SEARCH * HTTP/1.1\r\n\
         HOST: {group}:{port}\r\n\
         MAN: \"ssdp:discover\"\r\n\
         MX: {mx_secs}\r\n\
         ST: {search_target}\r\n\
         \r\n"
    )
}

/// Headers of one accepted search response, keyed by lowercase name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SsdpResponse {
    headers: HashMap<String, String>,
}

impl SsdpResponse {
    /// Parses a response datagram; `None` unless it starts with the OK status line.
    pub fn parse(text: &str) -> Option<Self> {
        let mut lines = text.lines();
        let status = lines.next()?.trim();
        if !status.eq_ignore_ascii_case(OK_STATUS_LINE) {
            return None;
        }

        let headers = lines
            .filter_map(|line| line.split_once(':'))
            .filter_map(|(key, value)| {
                let key = key.trim().to_ascii_lowercase();
                KNOWN_HEADERS
                    .contains(&key.as_str())
                    .then(|| (key, value.trim().to_string()))
            })
            .collect();

        Some(Self { headers })
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Description document URL, if advertised.
    pub fn location(&self) -> Option<&str> {
        self.header("location").filter(|value| !value.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_msearch() {
        let msg = build_msearch(Ipv4Addr::new(239, 255, 255, 250), 1900, 3, "upnp:rootdevice");
        assert!(msg.starts_with("M-SEARCH * HTTP/1.1\r\n"));
        assert!(msg.contains("HOST: 239.255.255.250:1900\r\n"));
        assert!(msg.contains("MX: 3\r\n"));
        assert!(msg.contains("MAN: \"ssdp:discover\"\r\n"));
        assert!(msg.contains("ST: upnp:rootdevice\r\n"));
        assert!(msg.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_parse_response() {
        let text = "HTTP/1.1 200 OK\r\n\
                    CACHE-CONTROL: max-age=1800\r\n\
                    LOCATION: http://10.0.0.5:49152/desc.xml\r\n\
                    X-User-Agent: redsonic\r\n\
                    ST: upnp:rootdevice\r\n\r\n";

        let response = SsdpResponse::parse(text).unwrap();
        assert_eq!(response.location(), Some("http://10.0.0.5:49152/desc.xml"));
        assert_eq!(response.header("st"), Some("upnp:rootdevice"));
        assert_eq!(response.header("X-User-Agent"), None);
    }

    #[test]
    fn test_rejects_non_ok_status() {
        assert!(SsdpResponse::parse("NOTIFY * HTTP/1.1\r\nLocation: http://x/\r\n").is_none());
        assert!(SsdpResponse::parse("HTTP/1.1 404 Not Found\r\n").is_none());
        assert!(SsdpResponse::parse("").is_none());
    }

    #[test]
    fn test_missing_location() {
        let response = SsdpResponse::parse("HTTP/1.1 200 OK\r\nST: upnp:rootdevice\r\n").unwrap();
        assert_eq!(response.location(), None);
    }
}
