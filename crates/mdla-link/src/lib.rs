//! MDLA Link - Proxy Share-Link Codec
//!
//! Normalizes the share-link formats that proxy providers hand out into a
//! single [`ServerDescriptor`] model, and renders descriptors back into
//! canonical links.
//!
//! # Flow
//!
//! ```text
//!  vmess://  vless://  trojan://  ss://  hysteria2://  hy2://  hysteria://  tuic://
//!      │        │         │         │          │          │          │          │
//!      └────────┴─────────┴─────────┴────┬─────┴──────────┴──────────┴──────────┘
//!                                        ▼
//!                               ┌──────────────────┐
//!                               │ scheme dispatch  │
//!                               └────────┬─────────┘
//!                                        ▼
//!                               ┌──────────────────┐
//!                               │ ServerDescriptor │──▶ encode() ──▶ canonical link
//!                               └──────────────────┘
//! ```
//!
//! # Behavior
//!
//! - **Total**: [`decode`] never fails outward; bad input yields `None`
//! - **Diagnosable**: [`parse_link`] reports why a link was rejected
//! - **Round-trip**: `decode(encode(d)) == d` for decoded descriptors

mod codec;
mod descriptor;
mod encoding;
mod shadowsocks;
mod userinfo;
mod vmess;

pub use codec::{DecodeError, decode, decode_lines, encode, parse_link};
pub use descriptor::{
    DEFAULT_NETWORK, DEFAULT_PORT, DEFAULT_SECURITY, ProtocolKind, ServerDescriptor,
};
pub use encoding::decode_base64_text;
