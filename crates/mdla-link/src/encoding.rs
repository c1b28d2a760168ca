//! Text encodings shared by the share-link grammars.

use crate::codec::DecodeError;
use base64::alphabet;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine as _;

/// Standard alphabet, padding optional, trailing bits tolerated.
///
/// URL-safe input is folded onto the standard alphabet before decoding,
/// so this one engine accepts both.
const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// Decode base64 text in either alphabet, ignoring whitespace and
/// completing missing `=` padding.
pub fn decode_base64_text(input: &str) -> Result<String, DecodeError> {
    let normalized: String = input
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            other => other,
        })
        .collect();
    let normalized = normalized.trim_end_matches('=');

    if normalized.is_empty() {
        return Err(DecodeError::InvalidBase64);
    }

    let bytes = LENIENT
        .decode(normalized)
        .map_err(|_| DecodeError::InvalidBase64)?;
    String::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8)
}

/// Padded standard base64
pub(crate) fn encode_base64(input: &str) -> String {
    STANDARD.encode(input)
}

/// Unpadded URL-safe base64
pub(crate) fn encode_base64_url(input: &str) -> String {
    URL_SAFE_NO_PAD.encode(input)
}

pub(crate) fn percent_decode(input: &str) -> Result<String, DecodeError> {
    urlencoding::decode(input)
        .map(|s| s.into_owned())
        .map_err(|_| DecodeError::InvalidPercentEncoding)
}

pub(crate) fn percent_encode(input: &str) -> String {
    urlencoding::encode(input).into_owned()
}
