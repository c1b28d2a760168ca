//! `scheme://credential@host:port?query#name` links (VLESS, Trojan, Hysteria2).

use crate::codec::{DecodeError, parse_query, split_fragment, split_host_port};
use crate::descriptor::{DEFAULT_NETWORK, DEFAULT_SECURITY, ProtocolKind, ServerDescriptor};
use crate::encoding::{percent_decode, percent_encode};
use serde_json::Value;

type Field = fn(&mut ServerDescriptor) -> &mut String;

/// Query keys mapped onto descriptor fields, in emission order
const QUERY_FIELDS: &[(&str, Field)] = &[
    ("type", |d| &mut d.network),
    ("security", |d| &mut d.security),
    ("sni", |d| &mut d.sni),
    ("fp", |d| &mut d.fingerprint),
    ("alpn", |d| &mut d.alpn),
    ("path", |d| &mut d.path),
    ("host", |d| &mut d.host),
    ("flow", |d| &mut d.flow),
    ("pbk", |d| &mut d.public_key),
    ("sid", |d| &mut d.short_id),
];

/// Hysteria2 parameters kept in `extra`
const HYSTERIA2_EXTRA: &[&str] = &["obfs", "obfs-password"];

pub(crate) fn decode(kind: ProtocolKind, payload: &str) -> Result<ServerDescriptor, DecodeError> {
    let (body, name) = split_fragment(payload)?;
    let (credential, rest) = body.split_once('@').ok_or(DecodeError::MissingCredential)?;
    let (authority, query) = rest.split_once('?').unwrap_or((rest, ""));
    let (address, port) = split_host_port(authority.trim_end_matches('/'))?;

    let credential = percent_decode(credential)?;
    if credential.is_empty() {
        return Err(DecodeError::MissingField(credential_name(kind)));
    }

    let mut descriptor = ServerDescriptor::new(kind, address, port);
    descriptor.name = name.unwrap_or_else(|| kind.default_server_name());
    match kind {
        ProtocolKind::Vless => descriptor.uuid = credential,
        _ => descriptor.password = credential,
    }

    let params = parse_query(query);
    for (key, field) in QUERY_FIELDS {
        let value = params
            .get(*key)
            .filter(|v| !v.is_empty())
            .cloned()
            .unwrap_or_else(|| default_value(&descriptor, key));
        *field(&mut descriptor) = value;
    }

    if kind == ProtocolKind::Hysteria2 {
        for key in HYSTERIA2_EXTRA {
            if let Some(value) = params.get(*key).filter(|v| !v.is_empty()) {
                descriptor
                    .extra
                    .insert(key.to_string(), Value::String(value.clone()));
            }
        }
    }

    Ok(descriptor)
}

pub(crate) fn encode(descriptor: &ServerDescriptor) -> String {
    let credential = match descriptor.protocol {
        ProtocolKind::Vless => &descriptor.uuid,
        _ => &descriptor.password,
    };

    let mut fields = descriptor.clone();
    let mut query = url::form_urlencoded::Serializer::new(String::new());
    for (key, field) in QUERY_FIELDS {
        let value = field(&mut fields);
        if !value.is_empty() && *value != default_value(descriptor, key) {
            query.append_pair(key, value);
        }
    }
    if descriptor.protocol == ProtocolKind::Hysteria2 {
        for key in HYSTERIA2_EXTRA {
            if let Some(value) = descriptor.extra_str(key) {
                query.append_pair(key, value);
            }
        }
    }
    let query = query.finish();

    let mut link = format!(
        "{}://{}@{}:{}",
        descriptor.protocol.scheme().unwrap_or_default(),
        percent_encode(credential),
        descriptor.address,
        descriptor.port
    );
    if !query.is_empty() {
        link.push('?');
        link.push_str(&query);
    }
    link.push('#');
    link.push_str(&percent_encode(&descriptor.name));
    link
}

fn credential_name(kind: ProtocolKind) -> &'static str {
    match kind {
        ProtocolKind::Vless => "uuid",
        _ => "password",
    }
}

/// Value a query key takes when the link leaves it out
fn default_value(descriptor: &ServerDescriptor, key: &str) -> String {
    let trojan = descriptor.protocol == ProtocolKind::Trojan;
    match key {
        "type" => DEFAULT_NETWORK.to_string(),
        "security" if trojan => "tls".to_string(),
        "security" => DEFAULT_SECURITY.to_string(),
        "sni" if trojan => descriptor.address.clone(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use crate::codec::{DecodeError, decode, encode, parse_link};
    use crate::descriptor::ProtocolKind;

    #[test]
    fn test_vless_ws_tls() {
        let d = decode(
            "vless://3f2a9c1e-1111-2222-3333-444455556666@example.com:443?type=ws&security=tls&sni=cdn.example.com&path=%2Fws#MyNode",
        )
        .unwrap();
        assert_eq!(d.protocol, ProtocolKind::Vless);
        assert_eq!(d.uuid, "3f2a9c1e-1111-2222-3333-444455556666");
        assert_eq!(d.address, "example.com");
        assert_eq!(d.port, 443);
        assert_eq!(d.network, "ws");
        assert_eq!(d.security, "tls");
        assert_eq!(d.sni, "cdn.example.com");
        assert_eq!(d.path, "/ws");
        assert_eq!(d.name, "MyNode");
    }

    #[test]
    fn test_vless_reality() {
        let d = decode(
            "vless://id@r.example.com:8443?security=reality&pbk=KEY&sid=0a1b&fp=firefox&flow=xtls-rprx-vision",
        )
        .unwrap();
        assert_eq!(d.security, "reality");
        assert_eq!(d.public_key, "KEY");
        assert_eq!(d.short_id, "0a1b");
        assert_eq!(d.fingerprint, "firefox");
        assert_eq!(d.flow, "xtls-rprx-vision");
        assert_eq!(d.network, "tcp");
        assert_eq!(d.name, "VLESS Server");
    }

    #[test]
    fn test_trojan_defaults() {
        let d = decode("trojan://p%40ss@t.example.com:443").unwrap();
        assert_eq!(d.password, "p@ss");
        assert_eq!(d.security, "tls");
        assert_eq!(d.sni, "t.example.com");
        assert_eq!(d.name, "Trojan Server");

        let d = decode("trojan://pw@t.example.com:443?security=none&sni=other.example#x").unwrap();
        assert_eq!(d.security, "none");
        assert_eq!(d.sni, "other.example");
    }

    #[test]
    fn test_hysteria2_obfs_extra() {
        let d = decode("hysteria2://pw@h.example.com:443?obfs=salamander&obfs-password=s3cret#H").unwrap();
        assert_eq!(d.extra_str("obfs"), Some("salamander"));
        assert_eq!(d.extra_str("obfs-password"), Some("s3cret"));

        let d = decode("hysteria2://pw@h.example.com:443").unwrap();
        assert!(d.extra.is_empty());
        assert_eq!(d.name, "Hysteria2 Server");
    }

    #[test]
    fn test_rejections() {
        assert_eq!(
            parse_link("vless://example.com:443"),
            Err(DecodeError::MissingCredential)
        );
        assert_eq!(parse_link("vless://id@example.com"), Err(DecodeError::MissingPort));
        assert!(matches!(
            parse_link("vless://id@example.com:99999"),
            Err(DecodeError::InvalidPort(_))
        ));
        assert_eq!(
            parse_link("vless://@example.com:443"),
            Err(DecodeError::MissingField("uuid"))
        );
        assert_eq!(
            parse_link("trojan://pw@:443"),
            Err(DecodeError::MissingField("address"))
        );
    }

    #[test]
    fn test_trailing_slash_before_query() {
        let d = decode("vless://id@example.com:443/?type=grpc&path=svc").unwrap();
        assert_eq!(d.port, 443);
        assert_eq!(d.network, "grpc");
        assert_eq!(d.path, "svc");
    }

    #[test]
    fn test_encode_omits_defaults() {
        let d = decode("trojan://pw@t.example.com:443#Plain").unwrap();
        assert_eq!(encode(&d).unwrap(), "trojan://pw@t.example.com:443#Plain");

        let d = decode("vless://id@example.com:443?type=ws&path=%2Fws#My%20Node").unwrap();
        assert_eq!(
            encode(&d).unwrap(),
            "vless://id@example.com:443?type=ws&path=%2Fws#My%20Node"
        );
    }

    #[test]
    fn test_every_query_field_survives_encoding() {
        let link = "vless://id@example.com:443?type=grpc&security=reality&sni=www.example.org&fp=safari&alpn=h2&path=svc&host=h.example.org&flow=xtls-rprx-vision&pbk=PUBKEY&sid=ab12#R";
        let d = decode(link).unwrap();
        assert_eq!(d.network, "grpc");
        assert_eq!(d.security, "reality");
        assert_eq!(d.sni, "www.example.org");
        assert_eq!(d.fingerprint, "safari");
        assert_eq!(d.alpn, "h2");
        assert_eq!(d.path, "svc");
        assert_eq!(d.host, "h.example.org");
        assert_eq!(d.flow, "xtls-rprx-vision");
        assert_eq!(d.public_key, "PUBKEY");
        assert_eq!(d.short_id, "ab12");

        assert_eq!(encode(&d).unwrap(), link);
    }
}
