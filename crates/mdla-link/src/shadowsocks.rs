//! Shadowsocks links, SIP002 and the legacy whole-authority form.
//!
//! SIP002: `ss://userinfo@host:port[/][?plugin=...][#name]`, where userinfo is
//! base64 `method:password` or, failing that, percent-encoded plain text.
//! Legacy: `ss://base64(method:password@host:port)[#name]`.

use crate::codec::{DecodeError, parse_query, split_fragment, split_host_port};
use crate::descriptor::{ProtocolKind, ServerDescriptor};
use crate::encoding::{decode_base64_text, encode_base64_url, percent_decode, percent_encode};
use serde_json::Value;

pub(crate) fn decode(kind: ProtocolKind, payload: &str) -> Result<ServerDescriptor, DecodeError> {
    let (body, name) = split_fragment(payload)?;

    let mut descriptor = match body.split_once('@') {
        Some((userinfo, rest)) => decode_sip002(kind, userinfo, rest)?,
        None => decode_legacy(kind, body)?,
    };
    descriptor.name = name.unwrap_or_else(|| kind.default_server_name());
    Ok(descriptor)
}

fn decode_sip002(kind: ProtocolKind, userinfo: &str, rest: &str) -> Result<ServerDescriptor, DecodeError> {
    let (authority, query) = rest.split_once('?').unwrap_or((rest, ""));
    let (address, port) = split_host_port(authority.trim_end_matches('/'))?;

    let credentials = decode_base64_text(userinfo)
        .ok()
        .filter(|text| text.contains(':'))
        .map_or_else(|| percent_decode(userinfo), Ok)?;
    let (method, password) = split_credentials(&credentials)?;

    let mut descriptor = ServerDescriptor::new(kind, address, port);
    descriptor.cipher_method = method;
    descriptor.password = password;

    if let Some(plugin) = parse_query(query).remove("plugin").filter(|p| !p.is_empty()) {
        descriptor.extra.insert("plugin".to_string(), Value::String(plugin));
    }
    Ok(descriptor)
}

fn decode_legacy(kind: ProtocolKind, body: &str) -> Result<ServerDescriptor, DecodeError> {
    let text = decode_base64_text(body)?;
    let (credentials, authority) = text.rsplit_once('@').ok_or(DecodeError::MissingCredential)?;
    let (address, port) = split_host_port(authority)?;
    let (method, password) = split_credentials(credentials)?;

    let mut descriptor = ServerDescriptor::new(kind, address, port);
    descriptor.cipher_method = method;
    descriptor.password = password;
    Ok(descriptor)
}

fn split_credentials(text: &str) -> Result<(String, String), DecodeError> {
    let (method, password) = text.split_once(':').ok_or(DecodeError::MissingField("password"))?;
    if method.is_empty() {
        return Err(DecodeError::MissingField("method"));
    }
    Ok((method.to_string(), password.to_string()))
}

pub(crate) fn encode(descriptor: &ServerDescriptor) -> String {
    let userinfo = encode_base64_url(&format!(
        "{}:{}",
        descriptor.cipher_method, descriptor.password
    ));

    let mut link = format!("ss://{userinfo}@{}:{}", descriptor.address, descriptor.port);
    if let Some(plugin) = descriptor.extra_str("plugin") {
        let query = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("plugin", plugin)
            .finish();
        link.push_str("/?");
        link.push_str(&query);
    }
    link.push('#');
    link.push_str(&percent_encode(&descriptor.name));
    link
}
