//! Core Config Synthesis
//!
//! Turns a [`ServerDescriptor`] into the JSON document the proxy core runs
//! with: a local SOCKS inbound, the proxy outbound plus `direct` and
//! `block`, and geoip routing that keeps private and in-country traffic off
//! the tunnel.
//!
//! Synthesis is total. Protocols the core cannot be configured for yet get
//! an outbound with empty settings.

use crate::config::AppConfig;
use mdla_link::{ProtocolKind, ServerDescriptor};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Tag of the local SOCKS inbound
pub const SOCKS_INBOUND_TAG: &str = "socks-in";

/// Fingerprint used when a TLS or Reality descriptor names none
pub const DEFAULT_FINGERPRINT: &str = "chrome";

/// Full core configuration document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreConfig {
    pub log: LogConfig,
    pub inbounds: Vec<Inbound>,
    pub outbounds: Vec<Outbound>,
    pub routing: Routing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    pub loglevel: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Inbound {
    pub tag: String,
    pub port: u16,
    pub listen: String,
    pub protocol: String,
    pub settings: Value,
    pub sniffing: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Outbound {
    pub tag: String,
    pub protocol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_settings: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Routing {
    pub domain_strategy: String,
    pub rules: Vec<RoutingRule>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingRule {
    #[serde(rename = "type")]
    pub rule_type: String,
    pub ip: Vec<String>,
    pub outbound_tag: String,
}

impl CoreConfig {
    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    /// The `proxy` outbound
    pub fn proxy_outbound(&self) -> Option<&Outbound> {
        self.outbounds.iter().find(|o| o.tag == "proxy")
    }
}

/// Builds [`CoreConfig`] documents
#[derive(Debug, Clone)]
pub struct ConfigSynthesizer {
    /// Local SOCKS port
    pub socks_port: u16,
    /// Core log level
    pub log_level: String,
    /// geoip sets routed direct (without the `geoip:` prefix)
    pub direct_geoip: Vec<String>,
}

impl Default for ConfigSynthesizer {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

impl ConfigSynthesizer {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            socks_port: config.socks_port,
            log_level: config.log_level.clone(),
            direct_geoip: config.direct_geoip.clone(),
        }
    }

    pub fn synthesize(&self, descriptor: &ServerDescriptor) -> CoreConfig {
        CoreConfig {
            log: LogConfig {
                loglevel: self.log_level.clone(),
            },
            inbounds: vec![self.socks_inbound()],
            outbounds: vec![
                proxy_outbound(descriptor),
                Outbound {
                    tag: "direct".to_string(),
                    protocol: "freedom".to_string(),
                    settings: None,
                    stream_settings: None,
                },
                Outbound {
                    tag: "block".to_string(),
                    protocol: "blackhole".to_string(),
                    settings: None,
                    stream_settings: None,
                },
            ],
            routing: Routing {
                domain_strategy: "IPIfNonMatch".to_string(),
                rules: self
                    .direct_geoip
                    .iter()
                    .map(|set| RoutingRule {
                        rule_type: "field".to_string(),
                        ip: vec![format!("geoip:{}", set)],
                        outbound_tag: "direct".to_string(),
                    })
                    .collect(),
            },
        }
    }

    fn socks_inbound(&self) -> Inbound {
        Inbound {
            tag: SOCKS_INBOUND_TAG.to_string(),
            port: self.socks_port,
            listen: "127.0.0.1".to_string(),
            protocol: "socks".to_string(),
            settings: json!({
                "auth": "noauth",
                "udp": true,
                "userLevel": 0,
            }),
            sniffing: json!({
                "enabled": true,
                "destOverride": ["http", "tls"],
            }),
        }
    }
}

fn proxy_outbound(descriptor: &ServerDescriptor) -> Outbound {
    Outbound {
        tag: "proxy".to_string(),
        protocol: descriptor.protocol.as_str().to_string(),
        settings: Some(outbound_settings(descriptor)),
        stream_settings: Some(stream_settings(descriptor)),
    }
}

fn outbound_settings(d: &ServerDescriptor) -> Value {
    match d.protocol {
        ProtocolKind::Vmess => json!({
            "vnext": [{
                "address": d.address,
                "port": d.port,
                "users": [{ "id": d.uuid, "alterId": 0, "security": "auto" }],
            }],
        }),
        ProtocolKind::Vless => {
            let mut user = Map::new();
            user.insert("id".into(), json!(d.uuid));
            user.insert("encryption".into(), json!("none"));
            insert_non_empty(&mut user, "flow", &d.flow);
            json!({
                "vnext": [{ "address": d.address, "port": d.port, "users": [user] }],
            })
        }
        ProtocolKind::Trojan => json!({
            "servers": [{ "address": d.address, "port": d.port, "password": d.password }],
        }),
        ProtocolKind::Shadowsocks => json!({
            "servers": [{
                "address": d.address,
                "port": d.port,
                "method": d.cipher_method,
                "password": d.password,
            }],
        }),
        ProtocolKind::Hysteria
        | ProtocolKind::Hysteria2
        | ProtocolKind::Tuic
        | ProtocolKind::Unknown => json!({}),
    }
}

fn stream_settings(d: &ServerDescriptor) -> Value {
    let mut stream = Map::new();
    stream.insert("network".into(), json!(d.network));

    match d.network.as_str() {
        "ws" => {
            let mut ws = Map::new();
            insert_non_empty(&mut ws, "path", &d.path);
            if !d.host.is_empty() {
                ws.insert("headers".into(), json!({ "Host": d.host }));
            }
            stream.insert("wsSettings".into(), Value::Object(ws));
        }
        "grpc" => {
            let mut grpc = Map::new();
            insert_non_empty(&mut grpc, "serviceName", &d.path);
            stream.insert("grpcSettings".into(), Value::Object(grpc));
        }
        _ => {}
    }

    if d.uses_tls() {
        let mut tls = Map::new();
        let server_name = if d.sni.is_empty() { &d.address } else { &d.sni };
        insert_non_empty(&mut tls, "serverName", server_name);
        tls.insert("fingerprint".into(), json!(fingerprint(d)));
        let alpn: Vec<&str> = d
            .alpn
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect();
        if !alpn.is_empty() {
            tls.insert("alpn".into(), json!(alpn));
        }
        stream.insert("security".into(), json!("tls"));
        stream.insert("tlsSettings".into(), Value::Object(tls));
    } else if d.uses_reality() {
        let mut reality = Map::new();
        insert_non_empty(&mut reality, "serverName", &d.sni);
        reality.insert("fingerprint".into(), json!(fingerprint(d)));
        insert_non_empty(&mut reality, "publicKey", &d.public_key);
        insert_non_empty(&mut reality, "shortId", &d.short_id);
        stream.insert("security".into(), json!("reality"));
        stream.insert("realitySettings".into(), Value::Object(reality));
    }

    Value::Object(stream)
}

fn fingerprint(d: &ServerDescriptor) -> &str {
    if d.fingerprint.is_empty() {
        DEFAULT_FINGERPRINT
    } else {
        &d.fingerprint
    }
}

fn insert_non_empty(map: &mut Map<String, Value>, key: &str, value: &str) {
    if !value.is_empty() {
        map.insert(key.to_string(), json!(value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to_value(config: &CoreConfig) -> Value {
        serde_json::to_value(config).unwrap()
    }

    fn proxy(config: &CoreConfig) -> Value {
        serde_json::to_value(config.proxy_outbound().unwrap()).unwrap()
    }

    #[test]
    fn test_document_skeleton() {
        let d = ServerDescriptor::new(ProtocolKind::Trojan, "t.example.com", 443);
        let doc = to_value(&ConfigSynthesizer::default().synthesize(&d));

        assert_eq!(doc["log"]["loglevel"], "warning");

        let inbound = &doc["inbounds"][0];
        assert_eq!(inbound["tag"], "socks-in");
        assert_eq!(inbound["listen"], "127.0.0.1");
        assert_eq!(inbound["port"], 10808);
        assert_eq!(inbound["protocol"], "socks");
        assert_eq!(inbound["settings"], json!({"auth": "noauth", "udp": true, "userLevel": 0}));
        assert_eq!(inbound["sniffing"]["destOverride"], json!(["http", "tls"]));

        let tags: Vec<&str> = doc["outbounds"]
            .as_array()
            .unwrap()
            .iter()
            .map(|o| o["tag"].as_str().unwrap())
            .collect();
        assert_eq!(tags, ["proxy", "direct", "block"]);
        assert_eq!(doc["outbounds"][1], json!({"tag": "direct", "protocol": "freedom"}));
        assert_eq!(doc["outbounds"][2], json!({"tag": "block", "protocol": "blackhole"}));

        assert_eq!(doc["routing"]["domainStrategy"], "IPIfNonMatch");
        assert_eq!(
            doc["routing"]["rules"],
            json!([
                {"type": "field", "ip": ["geoip:private"], "outboundTag": "direct"},
                {"type": "field", "ip": ["geoip:cn"], "outboundTag": "direct"},
            ])
        );
    }

    #[test]
    fn test_configured_values() {
        let synth = ConfigSynthesizer {
            socks_port: 1080,
            log_level: "debug".to_string(),
            direct_geoip: vec!["private".to_string(), "ir".to_string()],
        };
        let doc = to_value(&synth.synthesize(&ServerDescriptor::default()));
        assert_eq!(doc["inbounds"][0]["port"], 1080);
        assert_eq!(doc["log"]["loglevel"], "debug");
        assert_eq!(doc["routing"]["rules"][1]["ip"], json!(["geoip:ir"]));
    }

    #[test]
    fn test_vless_ws_tls() {
        let d = mdla_link::decode(
            "vless://3f2a9c1e-1111-2222-3333-444455556666@example.com:443?type=ws&security=tls&sni=cdn.example.com&path=%2Fws&host=cdn.example.com&alpn=h2,http/1.1&flow=xtls-rprx-vision#MyNode",
        )
        .unwrap();
        let out = proxy(&ConfigSynthesizer::default().synthesize(&d));

        assert_eq!(out["protocol"], "vless");
        assert_eq!(
            out["settings"]["vnext"][0],
            json!({
                "address": "example.com",
                "port": 443,
                "users": [{
                    "id": "3f2a9c1e-1111-2222-3333-444455556666",
                    "encryption": "none",
                    "flow": "xtls-rprx-vision",
                }],
            })
        );

        let stream = &out["streamSettings"];
        assert_eq!(stream["network"], "ws");
        assert_eq!(stream["wsSettings"], json!({"path": "/ws", "headers": {"Host": "cdn.example.com"}}));
        assert_eq!(stream["security"], "tls");
        assert_eq!(
            stream["tlsSettings"],
            json!({"serverName": "cdn.example.com", "fingerprint": "chrome", "alpn": ["h2", "http/1.1"]})
        );
    }

    #[test]
    fn test_tls_server_name_defaults_to_address() {
        let mut d = ServerDescriptor::new(ProtocolKind::Vmess, "vm.example.com", 443);
        d.uuid = "id".to_string();
        d.security = "tls".to_string();
        d.fingerprint = "safari".to_string();
        let out = proxy(&ConfigSynthesizer::default().synthesize(&d));

        assert_eq!(
            out["settings"]["vnext"][0]["users"][0],
            json!({"id": "id", "alterId": 0, "security": "auto"})
        );
        assert_eq!(
            out["streamSettings"]["tlsSettings"],
            json!({"serverName": "vm.example.com", "fingerprint": "safari"})
        );
    }

    #[test]
    fn test_reality_and_grpc() {
        let mut d = ServerDescriptor::new(ProtocolKind::Vless, "r.example.com", 443);
        d.uuid = "id".to_string();
        d.network = "grpc".to_string();
        d.path = "svc".to_string();
        d.security = "reality".to_string();
        d.public_key = "PBK".to_string();
        let out = proxy(&ConfigSynthesizer::default().synthesize(&d));

        let stream = &out["streamSettings"];
        assert_eq!(stream["grpcSettings"], json!({"serviceName": "svc"}));
        assert_eq!(stream["security"], "reality");
        assert_eq!(stream["realitySettings"], json!({"fingerprint": "chrome", "publicKey": "PBK"}));
        assert!(stream.get("tlsSettings").is_none());
        assert!(out["settings"]["vnext"][0]["users"][0].get("flow").is_none());
    }

    #[test]
    fn test_plain_tcp_has_no_security() {
        let mut d = ServerDescriptor::new(ProtocolKind::Shadowsocks, "ss.example.com", 8388);
        d.cipher_method = "aes-256-gcm".to_string();
        d.password = "pass".to_string();
        let out = proxy(&ConfigSynthesizer::default().synthesize(&d));

        assert_eq!(out["protocol"], "shadowsocks");
        assert_eq!(
            out["settings"]["servers"][0],
            json!({"address": "ss.example.com", "port": 8388, "method": "aes-256-gcm", "password": "pass"})
        );
        assert_eq!(out["streamSettings"], json!({"network": "tcp"}));
    }

    #[test]
    fn test_trojan_and_empty_settings_kinds() {
        let d = mdla_link::decode("trojan://pw@t.example.com:443#T").unwrap();
        let out = proxy(&ConfigSynthesizer::default().synthesize(&d));
        assert_eq!(
            out["settings"],
            json!({"servers": [{"address": "t.example.com", "port": 443, "password": "pw"}]})
        );
        assert_eq!(out["streamSettings"]["tlsSettings"]["serverName"], "t.example.com");

        for kind in [ProtocolKind::Hysteria, ProtocolKind::Hysteria2, ProtocolKind::Tuic, ProtocolKind::Unknown] {
            let d = ServerDescriptor::new(kind, "x.example.com", 443);
            let out = proxy(&ConfigSynthesizer::default().synthesize(&d));
            assert_eq!(out["settings"], json!({}));
            assert_eq!(out["protocol"], kind.as_str());
        }
    }

    #[test]
    fn test_ws_without_path_or_host() {
        let mut d = ServerDescriptor::new(ProtocolKind::Vmess, "a.example.com", 80);
        d.network = "ws".to_string();
        let out = proxy(&ConfigSynthesizer::default().synthesize(&d));
        assert_eq!(out["streamSettings"]["wsSettings"], json!({}));
    }
}
