//! SSDP response and NOTIFY parsing
//!
//! HTTP-style header blocks over UDP. The first line must be an
//! `HTTP/1.1 200 OK` response or a `NOTIFY` announcement; following
//! `Key: Value` lines are collected with lower-cased keys.

use std::collections::HashMap;

/// A parsed SSDP message.
#[derive(Debug, Clone)]
pub struct SsdpMessage {
    pub headers: HashMap<String, String>,
}

impl SsdpMessage {
    pub fn location(&self) -> Option<&str> {
        self.headers.get("location").map(|s| s.as_str())
    }

    pub fn usn(&self) -> Option<&str> {
        self.headers.get("usn").map(|s| s.as_str())
    }

    /// Service type: `ST` on search responses, `NT` on announcements.
    pub fn service_type(&self) -> Option<&str> {
        self.headers
            .get("st")
            .or_else(|| self.headers.get("nt"))
            .map(|s| s.as_str())
    }

    pub fn server(&self) -> Option<&str> {
        self.headers.get("server").map(|s| s.as_str())
    }

    /// `host:port` part of the location URL, when present.
    pub fn location_host(&self) -> Option<&str> {
        let location = self.location()?;
        let rest = location.split_once("://").map(|(_, r)| r)?;
        let end = rest.find('/').unwrap_or(rest.len());
        let host = &rest[..end];
        (!host.is_empty()).then_some(host)
    }
}

/// Parse one SSDP datagram. M-SEARCH requests (our own queries echoed
/// back) and non-SSDP payloads yield `None`.
pub fn parse_message(text: &str) -> Option<SsdpMessage> {
    let mut lines = text.lines();
    let first = lines.next()?.trim();
    if !first.starts_with("HTTP/") && !first.starts_with("NOTIFY") {
        return None;
    }

    let mut headers = HashMap::new();
    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some((key, value)) = line.split_once(':') {
            headers.insert(key.trim().to_lowercase(), value.trim().to_string());
        }
    }

    Some(SsdpMessage { headers })
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESPONSE: &str = "HTTP/1.1 200 OK\r\n\
CACHE-CONTROL: max-age=1800\r\n\
LOCATION: http://192.168.1.1:49152/rootDesc.xml\r\n\
SERVER: Linux/5.10 UPnP/1.0 MiniUPnPd/2.2.1\r\n\
ST: upnp:rootdevice\r\n\
USN: uuid:abcd-1234::upnp:rootdevice\r\n\r\n";

    #[test]
    fn parses_search_response() {
        let msg = parse_message(RESPONSE).unwrap();
        assert_eq!(
            msg.location(),
            Some("http://192.168.1.1:49152/rootDesc.xml")
        );
        assert_eq!(msg.location_host(), Some("192.168.1.1:49152"));
        assert_eq!(msg.service_type(), Some("upnp:rootdevice"));
        assert_eq!(msg.server(), Some("Linux/5.10 UPnP/1.0 MiniUPnPd/2.2.1"));
        assert_eq!(msg.usn(), Some("uuid:abcd-1234::upnp:rootdevice"));
    }

    #[test]
    fn parses_notify_with_nt() {
        let text = "NOTIFY * HTTP/1.1\r\n\
HOST: 239.255.255.250:1900\r\n\
NT: urn:dial-multiscreen-org:service:dial:1\r\n\
USN: uuid:cast-1\r\n\r\n";
        let msg = parse_message(text).unwrap();
        assert_eq!(
            msg.service_type(),
            Some("urn:dial-multiscreen-org:service:dial:1")
        );
    }

    #[test]
    fn rejects_msearch_and_garbage() {
        assert!(parse_message("M-SEARCH * HTTP/1.1\r\nST: ssdp:all\r\n").is_none());
        assert!(parse_message("").is_none());
        assert!(parse_message("random bytes").is_none());
    }
}
