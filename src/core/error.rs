//! Error types for the protocol channel.

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::TransportKind;

/// A message that cannot be trusted to be well formed.
///
/// Always scoped to a single message: the message is rejected, the process carries on.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MessageError {
    /// A required part is absent.
    #[error("missing required part '{0}'")]
    MissingPart(String),

    /// A required part is present but empty.
    #[error("required part '{0}' is empty")]
    EmptyPart(String),

    /// A numeric part did not parse.
    #[error("part '{part}' is not an integer: {value:?}")]
    InvalidInteger {
        /// Part name.
        part: String,
        /// Offending value.
        value: String,
    },

    /// A URI part did not parse as an absolute URI.
    #[error("part '{part}' is not an absolute URI: {value:?}")]
    InvalidUri {
        /// Part name.
        part: String,
        /// Offending value.
        value: String,
    },

    /// A binary part is not valid base64.
    #[error("part '{0}' is not valid base64")]
    InvalidBase64(String),

    /// A part holds a value other than the one its message type fixes.
    #[error("part '{part}' must be {expected:?}, got {actual:?}")]
    UnexpectedValue {
        /// Part name.
        part: String,
        /// Value mandated by the message type.
        expected: String,
        /// Value received.
        actual: String,
    },

    /// The message arrived over a transport its type does not allow.
    #[error("{message} messages must travel {expected}, received {actual}")]
    WrongTransport {
        /// Message type name.
        message: &'static str,
        /// Transport the type requires.
        expected: TransportKind,
        /// Transport actually used.
        actual: TransportKind,
    },

    /// A key occurred twice in one payload.
    #[error("duplicate key '{0}'")]
    DuplicateKey(String),

    /// A key-value form line without a ':' separator.
    #[error("line {line} is not a key:value pair: {content:?}")]
    MalformedLine {
        /// 1-based line number.
        line: usize,
        /// Line content.
        content: String,
    },

    /// A key or value holds a character its encoding cannot carry.
    #[error("illegal character in key-value form input: {0:?}")]
    IllegalCharacter(String),

    /// The signature does not cover parts that must be signed.
    #[error("signature does not cover mandatory parts: {}", .0.join(", "))]
    UnsignedMandatoryParts(Vec<String>),

    /// The response nonce does not start with a valid UTC timestamp.
    #[error("invalid response nonce {0:?}")]
    InvalidNonce(String),

    /// A direct response could not be matched to any expected message type.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
}

/// Association establishment failures.
///
/// Recoverable by falling back to dumb-mode verification.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyExchangeError {
    /// Modulus, generator, or public value is unusable.
    #[error("invalid key exchange parameters: {0}")]
    InvalidParameters(String),

    /// Session hash length does not match the encrypted secret length.
    #[error("association algorithm mismatch: secret is {secret_len} bytes, session hash is {hash_len} bytes")]
    AlgorithmMismatch {
        /// Length of the (encrypted) secret.
        secret_len: usize,
        /// Length of the session's hash output.
        hash_len: usize,
    },

    /// Unknown `assoc_type`.
    #[error("unknown association type {0:?}")]
    UnknownAssociationType(String),

    /// Unknown `session_type`.
    #[error("unknown session type {0:?}")]
    UnknownSessionType(String),

    /// Secret length disagrees with the association algorithm.
    #[error("{association_type} requires a {expected}-byte secret, got {actual}")]
    SecretLengthMismatch {
        /// Association type name.
        association_type: &'static str,
        /// Mandated secret length.
        expected: usize,
        /// Supplied secret length.
        actual: usize,
    },

    /// Association and session types cannot be combined.
    #[error("association type {association_type} is incompatible with session type {session_type}")]
    IncompatibleSessionType {
        /// Association type name.
        association_type: String,
        /// Session type name.
        session_type: String,
    },

    /// No probable prime found within the attempt budget.
    #[error("no {bits}-bit prime found in {attempts} attempts")]
    PrimeGenerationFailed {
        /// Requested modulus size.
        bits: u64,
        /// Attempts made.
        attempts: u32,
    },
}

/// Failures of the external transport collaborator.
///
/// Always retryable at the caller's discretion; the core never retries itself.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// No response within the transport's deadline.
    #[error("request to {0} timed out")]
    Timeout(String),

    /// Connection could not be established or was dropped.
    #[error("connection to {endpoint} failed: {reason}")]
    Connection {
        /// Remote endpoint.
        endpoint: String,
        /// Transport specific reason.
        reason: String,
    },

    /// Non-success HTTP status.
    #[error("{endpoint} answered with HTTP status {status}")]
    Status {
        /// Remote endpoint.
        endpoint: String,
        /// HTTP status code.
        status: u16,
    },

    /// The channel has no direct transport configured.
    #[error("no direct transport configured")]
    NotConfigured,
}

/// Top-level protocol errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Missing or invalid part.
    #[error("malformed message: {0}")]
    Malformed(#[from] MessageError),

    /// Signature did not verify.
    #[error("invalid signature on {0} message")]
    InvalidSignature(&'static str),

    /// Nonce seen before within the retention window.
    #[error("replayed message (nonce {nonce:?})")]
    ReplayedMessage {
        /// The replayed nonce.
        nonce: String,
    },

    /// Message older than the permitted age.
    #[error("message issued {issued} exceeds the maximum age of {max_age_secs}s")]
    Expired {
        /// Issue time carried by the message.
        issued: DateTime<Utc>,
        /// Permitted age including clock skew.
        max_age_secs: u64,
    },

    /// Association establishment failed.
    #[error("key exchange failed: {0}")]
    KeyExchange(#[from] KeyExchangeError),

    /// Transport collaborator failed.
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),

    /// An outgoing message needs a signature but no key is available.
    #[error("no signing key available for {0} message")]
    NoSigningKey(&'static str),

    /// Invalid security settings.
    #[error("configuration error: {0}")]
    Config(String),
}

impl ProtocolError {
    /// Check if this error is a trust failure.
    ///
    /// Trust failures are surfaced to the application as authentication failures
    /// and never downgraded.
    pub fn is_trust_failure(&self) -> bool {
        matches!(
            self,
            ProtocolError::InvalidSignature(_)
                | ProtocolError::ReplayedMessage { .. }
                | ProtocolError::Expired { .. }
        )
    }

    /// Check if the caller may retry the operation.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProtocolError::Transport(err) if !matches!(err, TransportError::NotConfigured)
        )
    }

    /// Check if association setup may fall back to dumb-mode verification.
    pub fn permits_dumb_mode_fallback(&self) -> bool {
        matches!(
            self,
            ProtocolError::KeyExchange(_) | ProtocolError::Transport(_) | ProtocolError::Malformed(_)
        )
    }
}

/// Result alias used throughout the crate.
pub type ProtocolResult<T> = Result<T, ProtocolError>;
