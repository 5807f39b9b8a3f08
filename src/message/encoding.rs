//! Wire encodings: key-value form, form-urlencoding, RFC 3986 percent-encoding.

use std::collections::BTreeMap;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

use crate::core::MessageError;

/// Characters RFC 3986 leaves unreserved; everything else is escaped.
const RFC3986_RESERVED: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// RFC 3986 percent-encoding, as OAuth signature base strings require.
pub fn pct_encode(value: &str) -> String {
    utf8_percent_encode(value, RFC3986_RESERVED).to_string()
}

/// Encode pairs as key-value form (`key:value\n` per pair, UTF-8).
///
/// Pairs are written in the order given.
pub fn encode_kv_form<'a, I>(pairs: I) -> Result<Vec<u8>, MessageError>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut out = Vec::new();
    for (key, value) in pairs {
        if key.contains(':') || key.contains('\n') {
            return Err(MessageError::IllegalCharacter(key.to_string()));
        }
        if value.contains('\n') {
            return Err(MessageError::IllegalCharacter(value.to_string()));
        }
        out.extend_from_slice(key.as_bytes());
        out.push(b':');
        out.extend_from_slice(value.as_bytes());
        out.push(b'\n');
    }
    Ok(out)
}

/// Decode key-value form.
///
/// A final line without its newline is accepted. Values may contain ':'; the
/// first ':' on a line separates the key.
pub fn decode_kv_form(payload: &[u8]) -> Result<BTreeMap<String, String>, MessageError> {
    let text = std::str::from_utf8(payload)
        .map_err(|e| MessageError::IllegalCharacter(format!("invalid UTF-8: {e}")))?;

    let mut parts = BTreeMap::new();
    for (index, line) in text.split_terminator('\n').enumerate() {
        let Some((key, value)) = line.split_once(':') else {
            return Err(MessageError::MalformedLine {
                line: index + 1,
                content: line.to_string(),
            });
        };
        if parts.insert(key.to_string(), value.to_string()).is_some() {
            return Err(MessageError::DuplicateKey(key.to_string()));
        }
    }
    Ok(parts)
}

/// Encode pairs as `application/x-www-form-urlencoded`.
pub fn encode_form<'a, I>(pairs: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish()
}

/// Decode `application/x-www-form-urlencoded`, rejecting repeated keys.
pub fn decode_form(payload: &[u8]) -> Result<BTreeMap<String, String>, MessageError> {
    let mut parts = BTreeMap::new();
    for (key, value) in url::form_urlencoded::parse(payload) {
        if parts.contains_key(key.as_ref()) {
            return Err(MessageError::DuplicateKey(key.into_owned()));
        }
        parts.insert(key.into_owned(), value.into_owned());
    }
    Ok(parts)
}
