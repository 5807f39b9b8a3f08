//! The protocol message: a typed bag of named string parts.

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use url::Url;

use super::encoding::{decode_form, decode_kv_form, encode_form, encode_kv_form};
use super::schema::{MessageKind, MessageSchema, PartType, WireEncoding};
use crate::core::{MessageError, TransportKind};

/// HTTP method used when none is set.
pub const DEFAULT_HTTP_METHOD: &str = "POST";

/// A protocol message.
///
/// Parts are kept in a sorted map; storage order carries no meaning. Parts the
/// schema does not declare are preserved untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    kind: MessageKind,
    parts: BTreeMap<String, String>,
    recipient: Option<Url>,
    http_method: String,
}

impl Message {
    /// Create a message of `kind` with its fixed parts filled in.
    pub fn new(kind: MessageKind) -> Self {
        let mut parts = BTreeMap::new();
        for (name, values) in kind.schema().fixed {
            if let Some(value) = values.first() {
                parts.insert((*name).to_string(), (*value).to_string());
            }
        }
        Self {
            kind,
            parts,
            recipient: None,
            http_method: DEFAULT_HTTP_METHOD.to_string(),
        }
    }

    /// Build and validate a message from decoded parts.
    pub fn from_parts<I>(kind: MessageKind, parts: I) -> Result<Self, MessageError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let message = Self {
            kind,
            parts: parts.into_iter().collect(),
            recipient: None,
            http_method: DEFAULT_HTTP_METHOD.to_string(),
        };
        message.validate()?;
        Ok(message)
    }

    /// Decode a payload that arrived over `arrived_via` as a message of `kind`.
    ///
    /// Indirect payloads are query strings or form bodies; direct payloads use the
    /// type's declared encoding.
    pub fn decode(
        kind: MessageKind,
        payload: &[u8],
        arrived_via: TransportKind,
    ) -> Result<Self, MessageError> {
        let schema = kind.schema();
        if schema.transport != arrived_via {
            return Err(MessageError::WrongTransport {
                message: schema.name,
                expected: schema.transport,
                actual: arrived_via,
            });
        }
        let parts = match schema.encoding {
            WireEncoding::KeyValueForm => decode_kv_form(payload)?,
            WireEncoding::FormUrlEncoded => decode_form(payload)?,
        };
        Self::from_parts(kind, parts)
    }

    /// Decode a direct response as whichever of `candidates` it validates against.
    pub fn decode_response(candidates: &[MessageKind], payload: &[u8]) -> Result<Self, MessageError> {
        let mut last = None;
        for kind in candidates {
            match Self::decode(*kind, payload, TransportKind::Direct) {
                Ok(message) => return Ok(message),
                Err(err) => last = Some(err),
            }
        }
        let names: Vec<&str> = candidates.iter().map(|k| k.name()).collect();
        Err(MessageError::UnexpectedResponse(match last {
            Some(err) => format!("expected one of [{}]: {err}", names.join(", ")),
            None => "no candidate message types".to_string(),
        }))
    }

    /// Message type.
    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    /// Schema of the message type.
    pub fn schema(&self) -> &'static MessageSchema {
        self.kind.schema()
    }

    /// Value of a part.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.parts.get(name).map(String::as_str)
    }

    /// Value of a part that must be present and non-empty.
    pub fn require(&self, name: &str) -> Result<&str, MessageError> {
        match self.parts.get(name) {
            None => Err(MessageError::MissingPart(name.to_string())),
            Some(value) if value.is_empty() => Err(MessageError::EmptyPart(name.to_string())),
            Some(value) => Ok(value),
        }
    }

    /// Required part parsed as an unsigned integer.
    pub fn integer(&self, name: &str) -> Result<u64, MessageError> {
        let value = self.require(name)?;
        value.parse().map_err(|_| MessageError::InvalidInteger {
            part: name.to_string(),
            value: value.to_string(),
        })
    }

    /// Required part decoded from base64.
    pub fn binary(&self, name: &str) -> Result<Vec<u8>, MessageError> {
        BASE64
            .decode(self.require(name)?)
            .map_err(|_| MessageError::InvalidBase64(name.to_string()))
    }

    /// Set a part, replacing any previous value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.parts.insert(name.into(), value.into());
        self
    }

    /// Set a part to the base64 encoding of `bytes`.
    pub fn set_binary(&mut self, name: impl Into<String>, bytes: &[u8]) -> &mut Self {
        self.set(name, BASE64.encode(bytes))
    }

    /// Remove a part, returning its value.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.parts.remove(name)
    }

    /// All parts, sorted by name.
    pub fn parts(&self) -> impl Iterator<Item = (&str, &str)> {
        self.parts.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Parts the schema does not declare.
    pub fn extra_parts(&self) -> impl Iterator<Item = (&str, &str)> {
        let schema = self.schema();
        self.parts().filter(move |(name, _)| !schema.is_declared(name))
    }

    /// Where the message is sent.
    pub fn recipient(&self) -> Option<&Url> {
        self.recipient.as_ref()
    }

    /// Set the recipient.
    pub fn set_recipient(&mut self, recipient: Url) -> &mut Self {
        self.recipient = Some(recipient);
        self
    }

    /// Builder form of [`Message::set_recipient`].
    pub fn with_recipient(mut self, recipient: Url) -> Self {
        self.recipient = Some(recipient);
        self
    }

    /// HTTP method of the request carrying the message.
    pub fn http_method(&self) -> &str {
        &self.http_method
    }

    /// Set the HTTP method.
    pub fn set_http_method(&mut self, method: impl Into<String>) -> &mut Self {
        self.http_method = method.into().to_ascii_uppercase();
        self
    }

    /// Copy every part into a message of another kind, then apply that kind's
    /// fixed values.
    pub fn converted(&self, kind: MessageKind) -> Self {
        let mut message = Self {
            kind,
            parts: self.parts.clone(),
            recipient: self.recipient.clone(),
            http_method: self.http_method.clone(),
        };
        for (name, values) in kind.schema().fixed {
            let keep = message
                .get(name)
                .is_some_and(|current| values.contains(&current));
            match values.first() {
                Some(value) if !keep => {
                    message.set(*name, *value);
                }
                _ => {}
            }
        }
        message
    }

    /// Check the schema: required parts present and non-empty, fixed values
    /// honoured, typed parts parse.
    pub fn validate(&self) -> Result<(), MessageError> {
        let schema = self.schema();

        for spec in schema.required_parts() {
            self.require(spec.name)?;
        }

        for (name, allowed) in schema.fixed {
            if let Some(actual) = self.get(name) {
                if !allowed.contains(&actual) {
                    return Err(MessageError::UnexpectedValue {
                        part: (*name).to_string(),
                        expected: allowed.join("|"),
                        actual: actual.to_string(),
                    });
                }
            }
        }

        for spec in schema.parts {
            let Some(value) = self.get(spec.name) else {
                continue;
            };
            match spec.ty {
                PartType::Text => {}
                PartType::Integer => {
                    self.integer(spec.name)?;
                }
                PartType::Uri => {
                    Url::parse(value).map_err(|_| MessageError::InvalidUri {
                        part: spec.name.to_string(),
                        value: value.to_string(),
                    })?;
                }
                PartType::Base64 => {
                    self.binary(spec.name)?;
                }
            }
        }
        Ok(())
    }

    /// Validate and encode the parts in the type's wire encoding.
    pub fn encode(&self) -> Result<Vec<u8>, MessageError> {
        self.validate()?;
        match self.schema().encoding {
            WireEncoding::KeyValueForm => encode_kv_form(self.parts()),
            WireEncoding::FormUrlEncoded => Ok(encode_form(self.parts()).into_bytes()),
        }
    }

    /// Recipient URL with the parts appended to its query, for indirect messages
    /// delivered by redirect.
    pub fn to_redirect_url(&self) -> Result<Url, MessageError> {
        let schema = self.schema();
        if schema.transport != TransportKind::Indirect {
            return Err(MessageError::WrongTransport {
                message: schema.name,
                expected: schema.transport,
                actual: TransportKind::Indirect,
            });
        }
        self.validate()?;
        let mut url = self
            .recipient
            .clone()
            .ok_or_else(|| MessageError::MissingPart("recipient".to_string()))?;
        url.query_pairs_mut().extend_pairs(self.parts());
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::*;

    fn assertion() -> Message {
        let mut message = Message::new(MessageKind::PositiveAssertion);
        message
            .set(PART_OP_ENDPOINT, "https://op.example/server")
            .set(PART_RETURN_TO, "https://rp.example/return")
            .set(PART_RESPONSE_NONCE, "2024-05-01T12:00:00ZabcdEFGH")
            .set(PART_ASSOC_HANDLE, "h1")
            .set(PART_SIGNED, "op_endpoint,return_to,response_nonce,assoc_handle")
            .set(PART_SIG, "AAAA");
        message
    }

    #[test]
    fn test_new_fills_fixed_parts() {
        let message = Message::new(MessageKind::PositiveAssertion);
        assert_eq!(message.get(PART_NS), Some(OPENID_NS_20));
        assert_eq!(message.get(PART_MODE), Some(MODE_ID_RES));
    }

    #[test]
    fn test_validate_missing_and_empty() {
        let mut message = assertion();
        assert!(message.validate().is_ok());

        message.remove(PART_RETURN_TO);
        assert_eq!(
            message.validate(),
            Err(MessageError::MissingPart(PART_RETURN_TO.into()))
        );

        let mut message = assertion();
        message.set(PART_ASSOC_HANDLE, "");
        assert_eq!(
            message.validate(),
            Err(MessageError::EmptyPart(PART_ASSOC_HANDLE.into()))
        );
    }

    #[test]
    fn test_validate_typed_parts() {
        let mut message = assertion();
        message.set(PART_RETURN_TO, "not a uri");
        assert!(matches!(message.validate(), Err(MessageError::InvalidUri { .. })));

        let mut message = assertion();
        message.set(PART_SIG, "***");
        assert!(matches!(message.validate(), Err(MessageError::InvalidBase64(_))));

        let mut message = Message::new(MessageKind::AssociateSuccess);
        message
            .set(KV_ASSOC_HANDLE, "h1")
            .set(KV_SESSION_TYPE, SESSION_NO_ENCRYPTION)
            .set(KV_ASSOC_TYPE, ASSOC_HMAC_SHA1)
            .set(KV_EXPIRES_IN, "soon");
        assert!(matches!(message.validate(), Err(MessageError::InvalidInteger { .. })));
    }

    #[test]
    fn test_validate_fixed_values() {
        let mut message = assertion();
        message.set(PART_MODE, MODE_CHECK_AUTHENTICATION);
        assert!(matches!(message.validate(), Err(MessageError::UnexpectedValue { .. })));
    }

    #[test]
    fn test_decode_wrong_transport() {
        let encoded = assertion().encode().unwrap();
        let err = Message::decode(MessageKind::PositiveAssertion, &encoded, TransportKind::Direct)
            .unwrap_err();
        assert!(matches!(err, MessageError::WrongTransport { .. }));
    }

    #[test]
    fn test_unknown_parts_preserved() {
        let mut message = assertion();
        message.set("openid.ext1.value", "kept");
        let encoded = message.encode().unwrap();
        let decoded =
            Message::decode(MessageKind::PositiveAssertion, &encoded, TransportKind::Indirect).unwrap();
        assert_eq!(decoded.get("openid.ext1.value"), Some("kept"));
        assert_eq!(decoded.extra_parts().count(), 1);
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_decode_response_picks_matching_kind() {
        let payload = b"ns:http://specs.openid.net/auth/2.0\nerror:nope\nerror_code:unsupported-type\n";
        let message = Message::decode_response(
            &[MessageKind::AssociateSuccess, MessageKind::AssociateUnsuccessful],
            payload,
        )
        .unwrap();
        assert_eq!(message.kind(), MessageKind::AssociateUnsuccessful);

        let err = Message::decode_response(&[MessageKind::AssociateSuccess], b"garbage").unwrap_err();
        assert!(matches!(err, MessageError::UnexpectedResponse(_)));
    }

    #[test]
    fn test_converted_overrides_mode() {
        let check = assertion().converted(MessageKind::CheckAuthenticationRequest);
        assert_eq!(check.get(PART_MODE), Some(MODE_CHECK_AUTHENTICATION));
        assert_eq!(check.get(PART_SIG), Some("AAAA"));
        assert!(check.validate().is_ok());
    }

    #[test]
    fn test_redirect_url() {
        let message = assertion().with_recipient(Url::parse("https://rp.example/return?x=1").unwrap());
        let url = message.to_redirect_url().unwrap();
        let query: BTreeMap<String, String> = url.query_pairs().into_owned().collect();
        assert_eq!(query["x"], "1");
        assert_eq!(query[PART_MODE], MODE_ID_RES);

        let direct = Message::new(MessageKind::AssociateRequest);
        assert!(direct.to_redirect_url().is_err());
    }
}
