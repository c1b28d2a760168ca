//! VMess share links: base64 over a JSON object with abbreviated keys.

use crate::codec::{DecodeError, parse_port};
use crate::descriptor::{DEFAULT_NETWORK, DEFAULT_PORT, DEFAULT_SECURITY, ProtocolKind, ServerDescriptor};
use crate::encoding::{decode_base64_text, encode_base64};
use serde_json::{Map, Value, json};

pub(crate) fn decode(kind: ProtocolKind, payload: &str) -> Result<ServerDescriptor, DecodeError> {
    let text = decode_base64_text(payload)?;
    let value: Value =
        serde_json::from_str(&text).map_err(|e| DecodeError::InvalidJson(e.to_string()))?;
    let fields = value
        .as_object()
        .ok_or_else(|| DecodeError::InvalidJson("expected an object".to_string()))?;

    let address = text_field(fields, "add");
    if address.is_empty() {
        return Err(DecodeError::MissingField("add"));
    }
    let uuid = text_field(fields, "id");
    if uuid.is_empty() {
        return Err(DecodeError::MissingField("id"));
    }

    let port = match text_field(fields, "port").as_str() {
        "" => DEFAULT_PORT,
        port => parse_port(port)?,
    };

    let mut descriptor = ServerDescriptor::new(kind, address, port);
    descriptor.uuid = uuid;
    descriptor.name = non_empty(text_field(fields, "ps"), || kind.default_server_name());
    descriptor.network = non_empty(text_field(fields, "net"), || DEFAULT_NETWORK.to_string());
    descriptor.security = non_empty(text_field(fields, "tls"), || DEFAULT_SECURITY.to_string());
    descriptor.sni = text_field(fields, "sni");
    descriptor.fingerprint = text_field(fields, "fp");
    descriptor.alpn = text_field(fields, "alpn");
    descriptor.path = text_field(fields, "path");
    descriptor.host = text_field(fields, "host");
    Ok(descriptor)
}

pub(crate) fn encode(descriptor: &ServerDescriptor) -> String {
    let tls = if descriptor.security == DEFAULT_SECURITY {
        ""
    } else {
        descriptor.security.as_str()
    };

    let body = json!({
        "v": "2",
        "ps": descriptor.name,
        "add": descriptor.address,
        "port": descriptor.port.to_string(),
        "id": descriptor.uuid,
        "aid": "0",
        "scy": "auto",
        "net": descriptor.network,
        "type": "none",
        "host": descriptor.host,
        "path": descriptor.path,
        "tls": tls,
        "sni": descriptor.sni,
        "alpn": descriptor.alpn,
        "fp": descriptor.fingerprint,
    });

    format!("vmess://{}", encode_base64(&body.to_string()))
}

/// String value of a key, accepting JSON numbers as well
fn text_field(fields: &Map<String, Value>, key: &str) -> String {
    match fields.get(key) {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

fn non_empty(value: String, fallback: impl FnOnce() -> String) -> String {
    if value.is_empty() { fallback() } else { value }
}
