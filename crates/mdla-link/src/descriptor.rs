//! Server Descriptor
//!
//! The normalized, protocol-agnostic description of one remote proxy
//! endpoint. Every share-link encoding decodes into this type and every
//! other component (registry, synthesizer, controller) consumes it.
//!
//! Fields that a protocol does not use stay at their zero value. They are
//! still serialized so the persisted schema stays stable.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Port used when a link does not carry one
pub const DEFAULT_PORT: u16 = 443;

/// Transport used when a link does not name one
pub const DEFAULT_NETWORK: &str = "tcp";

/// Security layer used when a link does not name one
pub const DEFAULT_SECURITY: &str = "none";

/// Proxy protocol family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolKind {
    Vmess,
    Vless,
    Trojan,
    #[serde(alias = "ss")]
    Shadowsocks,
    Hysteria,
    Hysteria2,
    Tuic,
    #[default]
    #[serde(other)]
    Unknown,
}

impl ProtocolKind {
    /// Lowercase identifier, also used as the core outbound protocol name
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolKind::Vmess => "vmess",
            ProtocolKind::Vless => "vless",
            ProtocolKind::Trojan => "trojan",
            ProtocolKind::Shadowsocks => "shadowsocks",
            ProtocolKind::Hysteria => "hysteria",
            ProtocolKind::Hysteria2 => "hysteria2",
            ProtocolKind::Tuic => "tuic",
            ProtocolKind::Unknown => "unknown",
        }
    }

    /// Human-readable name
    pub fn display_name(&self) -> &'static str {
        match self {
            ProtocolKind::Vmess => "VMess",
            ProtocolKind::Vless => "VLESS",
            ProtocolKind::Trojan => "Trojan",
            ProtocolKind::Shadowsocks => "Shadowsocks",
            ProtocolKind::Hysteria => "Hysteria",
            ProtocolKind::Hysteria2 => "Hysteria2",
            ProtocolKind::Tuic => "TUIC",
            ProtocolKind::Unknown => "Unknown",
        }
    }

    /// Name given to servers whose link carries no fragment
    pub fn default_server_name(&self) -> String {
        format!("{} Server", self.display_name())
    }

    /// Canonical share-link scheme (without `://`)
    pub fn scheme(&self) -> Option<&'static str> {
        match self {
            ProtocolKind::Vmess => Some("vmess"),
            ProtocolKind::Vless => Some("vless"),
            ProtocolKind::Trojan => Some("trojan"),
            ProtocolKind::Shadowsocks => Some("ss"),
            ProtocolKind::Hysteria => Some("hysteria"),
            ProtocolKind::Hysteria2 => Some("hysteria2"),
            ProtocolKind::Tuic => Some("tuic"),
            ProtocolKind::Unknown => None,
        }
    }
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProtocolKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = match s.to_ascii_lowercase().as_str() {
            "vmess" => ProtocolKind::Vmess,
            "vless" => ProtocolKind::Vless,
            "trojan" => ProtocolKind::Trojan,
            "ss" | "shadowsocks" => ProtocolKind::Shadowsocks,
            "hysteria" => ProtocolKind::Hysteria,
            "hysteria2" | "hy2" => ProtocolKind::Hysteria2,
            "tuic" => ProtocolKind::Tuic,
            _ => ProtocolKind::Unknown,
        };
        Ok(kind)
    }
}

/// Normalized server description
///
/// Built once by the codec (or loaded from the store) and replaced rather
/// than edited afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerDescriptor {
    /// Display name (may be empty)
    pub name: String,
    /// Protocol family
    pub protocol: ProtocolKind,
    /// Server host
    pub address: String,
    /// Server port
    pub port: u16,
    /// User id (vmess, vless)
    pub uuid: String,
    /// Password (trojan, shadowsocks, hysteria2)
    pub password: String,
    /// Cipher (shadowsocks)
    #[serde(rename = "method")]
    pub cipher_method: String,
    /// Transport: tcp, ws, grpc, ...
    pub network: String,
    /// Security layer: none, tls, reality
    pub security: String,
    pub sni: String,
    pub fingerprint: String,
    pub alpn: String,
    /// WebSocket path or gRPC service name
    pub path: String,
    /// WebSocket Host header
    pub host: String,
    /// VLESS flow control
    pub flow: String,
    /// Reality public key
    pub public_key: String,
    /// Reality short id
    pub short_id: String,
    /// Protocol-specific leftovers (obfuscation, plugins)
    pub extra: BTreeMap<String, Value>,
}

impl Default for ServerDescriptor {
    fn default() -> Self {
        Self {
            name: String::new(),
            protocol: ProtocolKind::Unknown,
            address: String::new(),
            port: DEFAULT_PORT,
            uuid: String::new(),
            password: String::new(),
            cipher_method: String::new(),
            network: DEFAULT_NETWORK.to_string(),
            security: DEFAULT_SECURITY.to_string(),
            sni: String::new(),
            fingerprint: String::new(),
            alpn: String::new(),
            path: String::new(),
            host: String::new(),
            flow: String::new(),
            public_key: String::new(),
            short_id: String::new(),
            extra: BTreeMap::new(),
        }
    }
}

impl ServerDescriptor {
    /// Create a descriptor with defaults for everything but the endpoint
    pub fn new(protocol: ProtocolKind, address: impl Into<String>, port: u16) -> Self {
        Self {
            protocol,
            address: address.into(),
            port,
            ..Self::default()
        }
    }

    /// `address:port`
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    /// Name for display, falling back to the endpoint
    pub fn label(&self) -> String {
        if self.name.is_empty() {
            self.endpoint()
        } else {
            self.name.clone()
        }
    }

    /// Look up a string value in `extra`
    pub fn extra_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(Value::as_str)
    }

    pub fn uses_tls(&self) -> bool {
        self.security == "tls"
    }

    pub fn uses_reality(&self) -> bool {
        self.security == "reality"
    }
}

impl fmt::Display for ServerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} ({}, {}/{})",
            self.protocol.display_name(),
            self.label(),
            self.endpoint(),
            self.network,
            self.security
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let d = ServerDescriptor::default();
        assert_eq!(d.port, 443);
        assert_eq!(d.network, "tcp");
        assert_eq!(d.security, "none");
        assert_eq!(d.protocol, ProtocolKind::Unknown);
    }

    #[test]
    fn test_protocol_parse() {
        assert_eq!("ss".parse::<ProtocolKind>().unwrap(), ProtocolKind::Shadowsocks);
        assert_eq!("HY2".parse::<ProtocolKind>().unwrap(), ProtocolKind::Hysteria2);
        assert_eq!("wireguard".parse::<ProtocolKind>().unwrap(), ProtocolKind::Unknown);
    }

    #[test]
    fn test_serializes_every_field() {
        let d = ServerDescriptor::new(ProtocolKind::Trojan, "example.com", 443);
        let json = serde_json::to_value(&d).unwrap();
        let obj = json.as_object().unwrap();

        for key in [
            "name", "protocol", "address", "port", "uuid", "password", "method", "network",
            "security", "sni", "fingerprint", "alpn", "path", "host", "flow", "public_key",
            "short_id", "extra",
        ] {
            assert!(obj.contains_key(key), "missing key {key}");
        }
        assert_eq!(obj["uuid"], "");
        assert_eq!(obj["protocol"], "trojan");
    }

    #[test]
    fn test_legacy_and_unknown_protocol_values() {
        let d: ServerDescriptor =
            serde_json::from_str(r#"{"protocol": "ss", "address": "a", "port": 8388}"#).unwrap();
        assert_eq!(d.protocol, ProtocolKind::Shadowsocks);
        assert_eq!(d.network, "tcp");

        let d: ServerDescriptor = serde_json::from_str(r#"{"protocol": "wireguard"}"#).unwrap();
        assert_eq!(d.protocol, ProtocolKind::Unknown);
        assert_eq!(d.port, 443);
    }

    #[test]
    fn test_label_falls_back_to_endpoint() {
        let mut d = ServerDescriptor::new(ProtocolKind::Vless, "example.com", 8443);
        assert_eq!(d.label(), "example.com:8443");
        d.name = "Frankfurt".to_string();
        assert_eq!(d.label(), "Frankfurt");
    }
}
