//! Message type schemas.
//!
//! Every message the channel understands is one [`MessageKind`]. Its
//! [`MessageSchema`] lists the parts it carries, how it travels, how it is
//! encoded, and which protections the binding pipeline must apply to it.

use crate::core::*;

/// How a part value is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartType {
    /// Free text.
    Text,
    /// Unsigned decimal integer.
    Integer,
    /// Absolute URI.
    Uri,
    /// Standard base64.
    Base64,
}

/// One declared part of a message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartSpec {
    /// Wire name.
    pub name: &'static str,
    /// Must be present and non-empty.
    pub required: bool,
    /// Value interpretation.
    pub ty: PartType,
    /// Must be covered by the signature whenever present.
    pub signed: bool,
}

impl PartSpec {
    const fn required(name: &'static str) -> Self {
        Self {
            name,
            required: true,
            ty: PartType::Text,
            signed: false,
        }
    }

    const fn optional(name: &'static str) -> Self {
        Self {
            name,
            required: false,
            ty: PartType::Text,
            signed: false,
        }
    }

    const fn of(mut self, ty: PartType) -> Self {
        self.ty = ty;
        self
    }

    const fn signed(mut self) -> Self {
        self.signed = true;
        self
    }
}

/// Payload encoding on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireEncoding {
    /// `application/x-www-form-urlencoded` (query string or POST body).
    FormUrlEncoded,
    /// OpenID key-value form (`key:value\n`).
    KeyValueForm,
}

/// Signature construction used by a signed message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureStyle {
    /// Key-value form over the `openid.signed` fields, keyed by an association.
    OpenId,
    /// OAuth 1.0 signature base string, keyed by consumer and token secrets.
    OAuth,
}

/// Where a message carries its issue time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampFormat {
    /// `YYYY-MM-DDTHH:MM:SSZ` prefix of a nonce part.
    NoncePrefix(&'static str),
    /// Seconds since the Unix epoch.
    UnixSeconds(&'static str),
}

impl TimestampFormat {
    /// Part holding the timestamp.
    pub fn part(self) -> &'static str {
        match self {
            TimestampFormat::NoncePrefix(part) | TimestampFormat::UnixSeconds(part) => part,
        }
    }
}

/// The closed set of message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Relying party asks a provider for a shared association.
    AssociateRequest,
    /// Provider issues an association.
    AssociateSuccess,
    /// Provider refuses the requested association type.
    AssociateUnsuccessful,
    /// Relying party sends the user to the provider.
    CheckIdRequest,
    /// Provider's signed assertion, delivered through the user agent.
    PositiveAssertion,
    /// Relying party asks the provider to verify an assertion (dumb mode).
    CheckAuthenticationRequest,
    /// Provider's verdict on a check_authentication request.
    CheckAuthenticationResponse,
    /// OAuth 1.0 signed request.
    OAuthSignedRequest,
    /// OAuth 1.0 token grant.
    OAuthTokenResponse,
}

impl MessageKind {
    /// Every message kind.
    pub const ALL: [MessageKind; 9] = [
        MessageKind::AssociateRequest,
        MessageKind::AssociateSuccess,
        MessageKind::AssociateUnsuccessful,
        MessageKind::CheckIdRequest,
        MessageKind::PositiveAssertion,
        MessageKind::CheckAuthenticationRequest,
        MessageKind::CheckAuthenticationResponse,
        MessageKind::OAuthSignedRequest,
        MessageKind::OAuthTokenResponse,
    ];

    /// Schema of this kind.
    pub fn schema(self) -> &'static MessageSchema {
        match self {
            MessageKind::AssociateRequest => &ASSOCIATE_REQUEST,
            MessageKind::AssociateSuccess => &ASSOCIATE_SUCCESS,
            MessageKind::AssociateUnsuccessful => &ASSOCIATE_UNSUCCESSFUL,
            MessageKind::CheckIdRequest => &CHECKID_REQUEST,
            MessageKind::PositiveAssertion => &POSITIVE_ASSERTION,
            MessageKind::CheckAuthenticationRequest => &CHECK_AUTHENTICATION_REQUEST,
            MessageKind::CheckAuthenticationResponse => &CHECK_AUTHENTICATION_RESPONSE,
            MessageKind::OAuthSignedRequest => &OAUTH_SIGNED_REQUEST,
            MessageKind::OAuthTokenResponse => &OAUTH_TOKEN_RESPONSE,
        }
    }

    /// Schema name.
    pub fn name(self) -> &'static str {
        self.schema().name
    }
}

/// Static description of a message type.
#[derive(Debug)]
pub struct MessageSchema {
    /// Kind described.
    pub kind: MessageKind,
    /// Human readable name.
    pub name: &'static str,
    /// Protocol version (major, minor).
    pub version: (u8, u8),
    /// How the message travels.
    pub transport: TransportKind,
    /// Payload encoding.
    pub encoding: WireEncoding,
    /// Declared parts.
    pub parts: &'static [PartSpec],
    /// Parts whose value is fixed by the type (first value is the default).
    pub fixed: &'static [(&'static str, &'static [&'static str])],
    /// Protections applied when this party sends the message.
    pub outgoing: Protections,
    /// Protections an incoming message must pass.
    pub incoming: Protections,
    /// Signature construction, for tamper-protected types.
    pub signature: Option<SignatureStyle>,
    /// Issue time location, for expiring types.
    pub timestamp: Option<TimestampFormat>,
    /// Single-use nonce part, for replay-protected types.
    pub nonce: Option<&'static str>,
}

impl MessageSchema {
    /// Look up a declared part.
    pub fn part(&self, name: &str) -> Option<&'static PartSpec> {
        self.parts.iter().find(|p| p.name == name)
    }

    /// Declared parts that must be present.
    pub fn required_parts(&self) -> impl Iterator<Item = &'static PartSpec> {
        self.parts.iter().filter(|p| p.required)
    }

    /// Check if `name` is declared by this type.
    pub fn is_declared(&self, name: &str) -> bool {
        self.part(name).is_some()
    }
}

const OPENID_20: (u8, u8) = (2, 0);
const OAUTH_10: (u8, u8) = (1, 0);

static ASSOCIATE_REQUEST: MessageSchema = MessageSchema {
    kind: MessageKind::AssociateRequest,
    name: "associate",
    version: OPENID_20,
    transport: TransportKind::Direct,
    encoding: WireEncoding::FormUrlEncoded,
    parts: &[
        PartSpec::required(PART_NS),
        PartSpec::required(PART_MODE),
        PartSpec::required(PART_ASSOC_TYPE),
        PartSpec::required(PART_SESSION_TYPE),
        PartSpec::optional(PART_DH_MODULUS).of(PartType::Base64),
        PartSpec::optional(PART_DH_GEN).of(PartType::Base64),
        PartSpec::optional(PART_DH_CONSUMER_PUBLIC).of(PartType::Base64),
    ],
    fixed: &[(PART_NS, &[OPENID_NS_20]), (PART_MODE, &[MODE_ASSOCIATE])],
    outgoing: Protections::NONE,
    incoming: Protections::NONE,
    signature: None,
    timestamp: None,
    nonce: None,
};

static ASSOCIATE_SUCCESS: MessageSchema = MessageSchema {
    kind: MessageKind::AssociateSuccess,
    name: "associate success",
    version: OPENID_20,
    transport: TransportKind::Direct,
    encoding: WireEncoding::KeyValueForm,
    parts: &[
        PartSpec::required(KV_NS),
        PartSpec::required(KV_ASSOC_HANDLE),
        PartSpec::required(KV_SESSION_TYPE),
        PartSpec::required(KV_ASSOC_TYPE),
        PartSpec::required(KV_EXPIRES_IN).of(PartType::Integer),
        PartSpec::optional(KV_MAC_KEY).of(PartType::Base64),
        PartSpec::optional(KV_DH_SERVER_PUBLIC).of(PartType::Base64),
        PartSpec::optional(KV_ENC_MAC_KEY).of(PartType::Base64),
    ],
    fixed: &[(KV_NS, &[OPENID_NS_20])],
    outgoing: Protections::NONE,
    incoming: Protections::NONE,
    signature: None,
    timestamp: None,
    nonce: None,
};

static ASSOCIATE_UNSUCCESSFUL: MessageSchema = MessageSchema {
    kind: MessageKind::AssociateUnsuccessful,
    name: "associate unsuccessful",
    version: OPENID_20,
    transport: TransportKind::Direct,
    encoding: WireEncoding::KeyValueForm,
    parts: &[
        PartSpec::required(KV_NS),
        PartSpec::required(KV_ERROR),
        PartSpec::required(KV_ERROR_CODE),
        PartSpec::optional(KV_ASSOC_TYPE),
        PartSpec::optional(KV_SESSION_TYPE),
    ],
    fixed: &[
        (KV_NS, &[OPENID_NS_20]),
        (KV_ERROR_CODE, &[ERROR_CODE_UNSUPPORTED_TYPE]),
    ],
    outgoing: Protections::NONE,
    incoming: Protections::NONE,
    signature: None,
    timestamp: None,
    nonce: None,
};

static CHECKID_REQUEST: MessageSchema = MessageSchema {
    kind: MessageKind::CheckIdRequest,
    name: "checkid",
    version: OPENID_20,
    transport: TransportKind::Indirect,
    encoding: WireEncoding::FormUrlEncoded,
    parts: &[
        PartSpec::required(PART_NS),
        PartSpec::required(PART_MODE),
        PartSpec::required(PART_RETURN_TO).of(PartType::Uri),
        PartSpec::required(PART_REALM).of(PartType::Uri),
        PartSpec::optional(PART_CLAIMED_ID),
        PartSpec::optional(PART_IDENTITY),
        PartSpec::optional(PART_ASSOC_HANDLE),
    ],
    fixed: &[
        (PART_NS, &[OPENID_NS_20]),
        (PART_MODE, &[MODE_CHECKID_SETUP, MODE_CHECKID_IMMEDIATE]),
    ],
    outgoing: Protections::NONE,
    incoming: Protections::NONE,
    signature: None,
    timestamp: None,
    nonce: None,
};

const SIGNED_ASSERTION_PARTS: &[PartSpec] = &[
    PartSpec::required(PART_NS),
    PartSpec::required(PART_MODE),
    PartSpec::required(PART_OP_ENDPOINT).of(PartType::Uri).signed(),
    PartSpec::required(PART_RETURN_TO).of(PartType::Uri).signed(),
    PartSpec::required(PART_RESPONSE_NONCE).signed(),
    PartSpec::required(PART_ASSOC_HANDLE).signed(),
    PartSpec::required(PART_SIGNED),
    PartSpec::required(PART_SIG).of(PartType::Base64),
    PartSpec::optional(PART_CLAIMED_ID).signed(),
    PartSpec::optional(PART_IDENTITY).signed(),
    PartSpec::optional(PART_INVALIDATE_HANDLE),
];

static POSITIVE_ASSERTION: MessageSchema = MessageSchema {
    kind: MessageKind::PositiveAssertion,
    name: "id_res",
    version: OPENID_20,
    transport: TransportKind::Indirect,
    encoding: WireEncoding::FormUrlEncoded,
    parts: SIGNED_ASSERTION_PARTS,
    fixed: &[(PART_NS, &[OPENID_NS_20]), (PART_MODE, &[MODE_ID_RES])],
    outgoing: Protections::ALL,
    incoming: Protections::ALL,
    signature: Some(SignatureStyle::OpenId),
    timestamp: Some(TimestampFormat::NoncePrefix(PART_RESPONSE_NONCE)),
    nonce: Some(PART_RESPONSE_NONCE),
};

// Forwarded verbatim by the relying party; only the provider verifies it.
static CHECK_AUTHENTICATION_REQUEST: MessageSchema = MessageSchema {
    kind: MessageKind::CheckAuthenticationRequest,
    name: "check_authentication",
    version: OPENID_20,
    transport: TransportKind::Direct,
    encoding: WireEncoding::FormUrlEncoded,
    parts: SIGNED_ASSERTION_PARTS,
    fixed: &[
        (PART_NS, &[OPENID_NS_20]),
        (PART_MODE, &[MODE_CHECK_AUTHENTICATION]),
    ],
    outgoing: Protections::NONE,
    incoming: Protections::ALL,
    signature: Some(SignatureStyle::OpenId),
    timestamp: Some(TimestampFormat::NoncePrefix(PART_RESPONSE_NONCE)),
    nonce: Some(PART_RESPONSE_NONCE),
};

static CHECK_AUTHENTICATION_RESPONSE: MessageSchema = MessageSchema {
    kind: MessageKind::CheckAuthenticationResponse,
    name: "check_authentication response",
    version: OPENID_20,
    transport: TransportKind::Direct,
    encoding: WireEncoding::KeyValueForm,
    parts: &[
        PartSpec::required(KV_NS),
        PartSpec::required(KV_IS_VALID),
        PartSpec::optional(KV_INVALIDATE_HANDLE),
    ],
    fixed: &[(KV_NS, &[OPENID_NS_20]), (KV_IS_VALID, &["true", "false"])],
    outgoing: Protections::NONE,
    incoming: Protections::NONE,
    signature: None,
    timestamp: None,
    nonce: None,
};

static OAUTH_SIGNED_REQUEST: MessageSchema = MessageSchema {
    kind: MessageKind::OAuthSignedRequest,
    name: "oauth request",
    version: OAUTH_10,
    transport: TransportKind::Direct,
    encoding: WireEncoding::FormUrlEncoded,
    parts: &[
        PartSpec::required(OAUTH_CONSUMER_KEY).signed(),
        PartSpec::required(OAUTH_SIGNATURE_METHOD).signed(),
        PartSpec::required(OAUTH_TIMESTAMP).of(PartType::Integer).signed(),
        PartSpec::required(OAUTH_NONCE).signed(),
        PartSpec::required(OAUTH_SIGNATURE).of(PartType::Base64),
        PartSpec::optional(OAUTH_TOKEN).signed(),
        PartSpec::optional(OAUTH_VERSION).signed(),
        PartSpec::optional(OAUTH_CALLBACK).of(PartType::Uri).signed(),
        PartSpec::optional(OAUTH_VERIFIER).signed(),
    ],
    fixed: &[(OAUTH_SIGNATURE_METHOD, &[OAUTH_HMAC_SHA1, OAUTH_HMAC_SHA256])],
    outgoing: Protections::ALL,
    incoming: Protections::ALL,
    signature: Some(SignatureStyle::OAuth),
    timestamp: Some(TimestampFormat::UnixSeconds(OAUTH_TIMESTAMP)),
    nonce: Some(OAUTH_NONCE),
};

static OAUTH_TOKEN_RESPONSE: MessageSchema = MessageSchema {
    kind: MessageKind::OAuthTokenResponse,
    name: "oauth token",
    version: OAUTH_10,
    transport: TransportKind::Direct,
    encoding: WireEncoding::FormUrlEncoded,
    parts: &[
        PartSpec::required(OAUTH_TOKEN),
        PartSpec::required(OAUTH_TOKEN_SECRET),
    ],
    fixed: &[],
    outgoing: Protections::NONE,
    incoming: Protections::NONE,
    signature: None,
    timestamp: None,
    nonce: None,
};
