//! Proxy data models

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Proxy protocol enumeration
///
/// The `h` suffixed SOCKS variants resolve hostnames through the proxy
/// instead of locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Http,
    Https,
    Socks4,
    Socks4h,
    Socks5,
    Socks5h,
}

impl Protocol {
    /// Every accepted protocol
    pub const ALL: [Protocol; 6] = [
        Protocol::Http,
        Protocol::Https,
        Protocol::Socks4,
        Protocol::Socks4h,
        Protocol::Socks5,
        Protocol::Socks5h,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
            Protocol::Socks4 => "socks4",
            Protocol::Socks4h => "socks4h",
            Protocol::Socks5 => "socks5",
            Protocol::Socks5h => "socks5h",
        }
    }

    pub fn is_socks(&self) -> bool {
        !matches!(self, Protocol::Http | Protocol::Https)
    }

    /// Whether hostnames are resolved by the proxy
    pub fn resolves_remotely(&self) -> bool {
        matches!(self, Protocol::Socks4h | Protocol::Socks5h)
    }

    /// The remote-resolving variant of a SOCKS protocol; other protocols are returned as is
    pub fn with_remote_dns(self) -> Self {
        match self {
            Protocol::Socks4 => Protocol::Socks4h,
            Protocol::Socks5 => Protocol::Socks5h,
            other => other,
        }
    }

    /// Scheme understood by the HTTP client when dialing through this proxy
    pub fn client_scheme(&self) -> &'static str {
        match self {
            Protocol::Socks4h => "socks4a",
            other => other.as_str(),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = String;

    /// Case-insensitive parse; `socks4a` is accepted as an alias of `socks4h`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(Protocol::Http),
            "https" => Ok(Protocol::Https),
            "socks4" => Ok(Protocol::Socks4),
            "socks4h" | "socks4a" => Ok(Protocol::Socks4h),
            "socks5" => Ok(Protocol::Socks5),
            "socks5h" => Ok(Protocol::Socks5h),
            other => Err(format!("unsupported protocol: {other:?}")),
        }
    }
}

/// Proxy authentication credentials
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyAuth {
    pub username: String,
    pub password: String,
}

impl ProxyAuth {
    pub fn new(username: String, password: String) -> Self {
        Self { username, password }
    }
}

/// Identity of a proxy: two records with equal keys are the same proxy
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AddressKey {
    pub protocol: Protocol,
    pub host: String,
    pub port: u16,
}

impl AddressKey {
    pub fn new(protocol: Protocol, host: impl Into<String>, port: u16) -> Self {
        Self {
            protocol,
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for AddressKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.protocol, self.host, self.port)
    }
}

/// Unvalidated proxy tuple as emitted by a source adapter
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawProxyTuple {
    pub host: String,
    pub port: String,
    pub protocol: String,
    pub country: Option<String>,
    /// Set when the source declares hostname resolution through the proxy
    pub remote_dns: bool,
    pub auth: Option<ProxyAuth>,
}

impl RawProxyTuple {
    pub fn new(host: impl Into<String>, port: impl ToString, protocol: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: port.to_string(),
            protocol: protocol.into(),
            country: None,
            remote_dns: false,
            auth: None,
        }
    }

    pub fn with_country(mut self, country: impl Into<String>) -> Self {
        self.country = Some(country.into());
        self
    }

    pub fn with_remote_dns(mut self, remote_dns: bool) -> Self {
        self.remote_dns = remote_dns;
        self
    }

    pub fn with_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.auth = Some(ProxyAuth::new(username.into(), password.into()));
        self
    }
}

/// Immutable description of one proxy endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyRecord {
    host: String,
    port: u16,
    protocol: Protocol,
    country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    auth: Option<ProxyAuth>,
}

impl ProxyRecord {
    /// Create a new record without authentication
    ///
    /// The caller must supply a non-empty host and a non-zero port.
    /// [`ProxyParser`](crate::proxy::ProxyParser) and the registry check both
    /// before constructing a record.
    pub fn new(host: impl Into<String>, port: u16, protocol: Protocol) -> Self {
        let host = host.into();
        debug_assert!(!host.trim().is_empty(), "proxy record needs a host");
        debug_assert!(port != 0, "proxy record needs a non-zero port");
        Self {
            host,
            port,
            protocol,
            country: None,
            auth: None,
        }
    }

    pub fn with_country(mut self, country: impl Into<String>) -> Self {
        self.country = Some(country.into());
        self
    }

    pub fn with_auth(mut self, username: String, password: String) -> Self {
        self.auth = Some(ProxyAuth::new(username, password));
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn country(&self) -> Option<&str> {
        self.country.as_deref()
    }

    pub fn auth(&self) -> Option<&ProxyAuth> {
        self.auth.as_ref()
    }

    pub fn address_key(&self) -> AddressKey {
        AddressKey::new(self.protocol, self.host.clone(), self.port)
    }

    /// URL handed to the HTTP client, credentials included
    pub fn client_url(&self) -> String {
        let auth_part = self.auth.as_ref().map_or(String::new(), |auth| {
            format!("{}:{}@", auth.username, auth.password)
        });

        format!(
            "{}://{}{}:{}",
            self.protocol.client_scheme(),
            auth_part,
            self.host,
            self.port
        )
    }

    /// Get the proxy string in HOST:PORT format
    pub fn to_simple_string(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for ProxyRecord {
    /// Canonical `protocol://host:port`; credentials are never displayed
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.protocol, self.host, self.port)
    }
}
