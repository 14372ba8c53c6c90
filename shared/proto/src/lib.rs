//! Wire types shared between the mau server and sync client: the file
//! listing manifest, HTTP-date conditional-fetch helpers, and the mDNS
//! naming scheme both discovery and the server agree on.

use std::time::SystemTime;

use mau_core::Fingerprint;
use serde::{Deserialize, Serialize};

/// The mDNS service type mau advertises itself under.
pub const SERVICE_NAME: &str = "_mau._tcp.local.";

/// The default scheme for the HTTP(S)-over-mTLS transport.
pub const DEFAULT_SCHEME: &str = "https";

/// The server's manifest entry for one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileListItem {
    pub name: String,
    pub size: u64,
    pub sum: String,
}

impl FileListItem {
    pub fn new(name: impl Into<String>, size: u64, sum: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size,
            sum: sum.into(),
        }
    }
}

/// The mDNS instance name a server advertises itself under:
/// `<fingerprint>._mau._tcp.local.`
pub fn instance_name(fingerprint: Fingerprint) -> String {
    format!("{}.{}", fingerprint.to_hex(), SERVICE_NAME)
}

/// Recovers a fingerprint from an advertised instance name, if it matches
/// the expected service suffix.
pub fn fingerprint_from_instance_name(instance: &str) -> Option<Fingerprint> {
    let prefix = instance.strip_suffix(&format!(".{SERVICE_NAME}"))?;
    prefix.parse().ok()
}

/// Formats a timestamp as an RFC 7231 HTTP-date (UTC), for the
/// `If-Modified-Since` request header and comparisons against it.
pub fn format_http_date(time: SystemTime) -> String {
    httpdate::fmt_http_date(time)
}

/// Parses an RFC 7231 HTTP-date into a timestamp.
pub fn parse_http_date(value: &str) -> Result<SystemTime, httpdate::Error> {
    httpdate::parse_http_date(value)
}

/// The address a client dials to reach a peer, as emitted by discovery:
/// `"<scheme>://<host>:<port>"`.
pub fn format_address(scheme: &str, host: &str, port: u16) -> String {
    format!("{scheme}://{host}:{port}")
}
