//! Signature construction for OpenID and OAuth messages.
//!
//! OpenID signs the key-value form of the parts named in `openid.signed`, in
//! that order and without the `openid.` prefix. OAuth signs a base string of
//! the HTTP method, the normalized request URL, and the sorted parameters.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use url::Url;
use zeroize::Zeroizing;

use crate::core::*;
use crate::crypto::{Association, HashAlgorithm, constant_time_eq};
use crate::message::{Message, MessageKind, encode_kv_form, pct_encode};

/// Key material for one signature.
pub enum SigningKey {
    /// OpenID association.
    Association(Association),
    /// OAuth consumer and token secrets.
    OAuth {
        /// `pct(consumer_secret)&pct(token_secret)`.
        key: Zeroizing<String>,
        /// Digest named by `oauth_signature_method`.
        hash: HashAlgorithm,
    },
}

impl SigningKey {
    /// OAuth key from the consumer secret and optional token secret.
    pub fn oauth(consumer_secret: &str, token_secret: Option<&str>, hash: HashAlgorithm) -> Self {
        let key = format!(
            "{}&{}",
            pct_encode(consumer_secret),
            pct_encode(token_secret.unwrap_or_default())
        );
        SigningKey::OAuth {
            key: Zeroizing::new(key),
            hash,
        }
    }
}

/// Names (without prefix) an outgoing OpenID message should sign: every present
/// signature-mandatory part in schema order, then `openid.*` extension parts.
pub fn openid_fields_to_sign(message: &Message) -> Vec<String> {
    let schema = message.schema();
    let declared = schema
        .parts
        .iter()
        .filter(|p| p.signed && message.get(p.name).is_some())
        .map(|p| p.name);
    let extensions = message
        .extra_parts()
        .map(|(name, _)| name)
        .filter(|name| name.starts_with(OPENID_PREFIX));
    declared
        .chain(extensions)
        .map(|name| name[OPENID_PREFIX.len()..].to_string())
        .collect()
}

/// Check that `openid.signed` covers every present signature-mandatory part.
pub fn ensure_mandatory_parts_signed(message: &Message) -> Result<(), MessageError> {
    let signed = message.require(PART_SIGNED)?;
    let listed: Vec<&str> = signed.split(',').collect();
    let unsigned: Vec<String> = message
        .schema()
        .parts
        .iter()
        .filter(|p| p.signed && message.get(p.name).is_some())
        .filter(|p| !listed.contains(&&p.name[OPENID_PREFIX.len()..]))
        .map(|p| p.name.to_string())
        .collect();
    if unsigned.is_empty() {
        Ok(())
    } else {
        Err(MessageError::UnsignedMandatoryParts(unsigned))
    }
}

/// Key-value form of the parts listed in `openid.signed`.
///
/// A check_authentication request is verified as the id_res it was copied from.
pub fn openid_signature_base(message: &Message) -> Result<Vec<u8>, MessageError> {
    let signed = message.require(PART_SIGNED)?;
    let mut pairs = Vec::new();
    for name in signed.split(',') {
        let prefixed = format!("{OPENID_PREFIX}{name}");
        let value = if prefixed == PART_MODE && message.kind() == MessageKind::CheckAuthenticationRequest {
            MODE_ID_RES
        } else {
            message
                .get(&prefixed)
                .ok_or(MessageError::MissingPart(prefixed))?
        };
        pairs.push((name, value));
    }
    encode_kv_form(pairs)
}

/// `scheme://host[:port]/path`, with default ports, query, and fragment dropped.
pub fn normalize_url(url: &Url) -> String {
    let mut out = format!("{}://{}", url.scheme(), url.host_str().unwrap_or_default());
    if let Some(port) = url.port() {
        out.push_str(&format!(":{port}"));
    }
    out.push_str(url.path());
    out
}

/// OAuth signature base string `METHOD&pct(url)&pct(params)`.
///
/// Query parameters of the recipient are merged in unless the message already
/// carries them; `oauth_signature` is excluded; pairs are sorted by encoded key,
/// then encoded value.
pub fn oauth_signature_base_string(message: &Message) -> Result<String, MessageError> {
    let recipient = message
        .recipient()
        .ok_or_else(|| MessageError::MissingPart("recipient".to_string()))?;

    let mut pairs: Vec<(String, String)> = message
        .parts()
        .filter(|(name, _)| *name != OAUTH_SIGNATURE)
        .map(|(k, v)| (pct_encode(k), pct_encode(v)))
        .collect();
    for (key, value) in recipient.query_pairs() {
        if key != OAUTH_SIGNATURE && message.get(&key).is_none() {
            pairs.push((pct_encode(&key), pct_encode(&value)));
        }
    }
    pairs.sort();

    let params = pairs
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");
    Ok(format!(
        "{}&{}&{}",
        message.http_method().to_ascii_uppercase(),
        pct_encode(&normalize_url(recipient)),
        pct_encode(&params)
    ))
}

/// Digest named by an `oauth_signature_method` value.
pub fn oauth_hash(method: &str) -> Option<HashAlgorithm> {
    match method {
        OAUTH_HMAC_SHA1 => Some(HashAlgorithm::Sha1),
        OAUTH_HMAC_SHA256 => Some(HashAlgorithm::Sha256),
        _ => None,
    }
}

/// Base64 signature of `message` under `key`.
pub fn compute_signature(message: &Message, key: &SigningKey) -> ProtocolResult<String> {
    let tag = match key {
        SigningKey::Association(association) => association.sign(&openid_signature_base(message)?)?,
        SigningKey::OAuth { key, hash } => {
            let base = oauth_signature_base_string(message)?;
            hash.hmac(key.as_bytes(), base.as_bytes())?
        }
    };
    Ok(BASE64.encode(tag))
}

/// Recompute and compare the signature in constant time.
pub fn verify_signature(message: &Message, key: &SigningKey, signature: &str) -> ProtocolResult<bool> {
    let expected = compute_signature(message, key)?;
    Ok(constant_time_eq(expected.as_bytes(), signature.as_bytes()))
}
