//! Binding elements: the stages of the security pipeline.

use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};
use rand::{Rng, rngs::OsRng};
use tracing::{debug, warn};

use super::channel::Channel;
use crate::core::*;
use crate::message::{Message, TimestampFormat};

/// Format of the timestamp prefix of an OpenID response nonce.
const NONCE_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";
const NONCE_TIMESTAMP_LEN: usize = 20;

/// One stage of the pipeline.
///
/// Outgoing messages pass the elements in declaration order; incoming messages
/// pass them in reverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingElement {
    /// Stamps and checks the issue time.
    Expiration,
    /// Stamps and consumes a single-use nonce.
    ReplayProtection,
    /// Signs and verifies.
    Signing,
}

impl BindingElement {
    /// The pipeline, in outgoing order.
    pub const PIPELINE: [BindingElement; 3] = [
        BindingElement::Expiration,
        BindingElement::ReplayProtection,
        BindingElement::Signing,
    ];

    /// Protection this element provides.
    pub fn protection(self) -> Protections {
        match self {
            BindingElement::Expiration => Protections::EXPIRATION,
            BindingElement::ReplayProtection => Protections::REPLAY,
            BindingElement::Signing => Protections::TAMPER,
        }
    }

    /// Apply to an outgoing message whose type asks for this protection.
    pub(crate) fn prepare_outgoing(self, channel: &Channel, message: &mut Message) -> ProtocolResult<()> {
        match self {
            BindingElement::Expiration => stamp_timestamp(channel, message),
            BindingElement::ReplayProtection => stamp_nonce(channel, message),
            BindingElement::Signing => channel.sign(message),
        }
    }

    /// Check an incoming message whose type asks for this protection.
    pub(crate) fn process_incoming(self, channel: &Channel, message: &Message) -> ProtocolResult<()> {
        match self {
            BindingElement::Expiration => check_expiration(channel, message),
            BindingElement::ReplayProtection => check_replay(channel, message),
            BindingElement::Signing => channel.verify(message),
        }
    }
}

fn stamp_timestamp(channel: &Channel, message: &mut Message) -> ProtocolResult<()> {
    let Some(format) = message.schema().timestamp else {
        return Ok(());
    };
    let now = channel.now().trunc_subsecs(0);
    let value = match format {
        TimestampFormat::NoncePrefix(_) => now.format(NONCE_TIMESTAMP_FORMAT).to_string(),
        TimestampFormat::UnixSeconds(_) => now.timestamp().to_string(),
    };
    message.set(format.part(), value);
    Ok(())
}

fn stamp_nonce(channel: &Channel, message: &mut Message) -> ProtocolResult<()> {
    let Some(part) = message.schema().nonce else {
        return Ok(());
    };
    let random = generate_nonce(channel.settings().nonce_length);
    // The OpenID response nonce extends the timestamp the expiration element wrote.
    let value = match message.schema().timestamp {
        Some(format) if format.part() == part => format!("{}{random}", message.require(part)?),
        _ => random,
    };
    message.set(part, value);
    Ok(())
}

/// Random nonce of `len` characters from `[A-Za-z0-9]`.
pub fn generate_nonce(len: usize) -> String {
    let mut rng = OsRng;
    (0..len)
        .map(|_| char::from(NONCE_ALPHABET[rng.gen_range(0..NONCE_ALPHABET.len())]))
        .collect()
}

/// Issue time carried by `message`.
pub fn message_timestamp(message: &Message) -> Result<Option<DateTime<Utc>>, MessageError> {
    let Some(format) = message.schema().timestamp else {
        return Ok(None);
    };
    let part = format.part();
    let value = message.require(part)?;
    let issued = match format {
        TimestampFormat::NoncePrefix(_) => value
            .get(..NONCE_TIMESTAMP_LEN)
            .and_then(|prefix| NaiveDateTime::parse_from_str(prefix, NONCE_TIMESTAMP_FORMAT).ok())
            .map(|naive| naive.and_utc())
            .ok_or_else(|| MessageError::InvalidNonce(value.to_string()))?,
        TimestampFormat::UnixSeconds(_) => {
            let secs = message.integer(part)?;
            i64::try_from(secs)
                .ok()
                .and_then(|secs| DateTime::from_timestamp(secs, 0))
                .ok_or_else(|| MessageError::InvalidInteger {
                    part: part.to_string(),
                    value: value.to_string(),
                })?
        }
    };
    Ok(Some(issued))
}

fn check_expiration(channel: &Channel, message: &Message) -> ProtocolResult<()> {
    let Some(issued) = message_timestamp(message)? else {
        return Ok(());
    };
    let settings = channel.settings();
    let now = channel.now();
    let max_age = settings.max_message_age_with_skew();
    let max_skew = to_chrono(settings.max_clock_skew);

    if now - issued > max_age || issued - now > max_skew {
        warn!(kind = message.kind().name(), %issued, %now, "rejecting expired message");
        return Err(ProtocolError::Expired {
            issued,
            max_age_secs: u64::try_from(max_age.num_seconds()).unwrap_or(0),
        });
    }
    Ok(())
}

fn check_replay(channel: &Channel, message: &Message) -> ProtocolResult<()> {
    let schema = message.schema();
    let Some(part) = schema.nonce else {
        return Ok(());
    };
    let nonce = message.require(part)?;
    let issued = message_timestamp(message)?.unwrap_or_else(|| channel.now());

    // Out-of-window timestamps are left to the expiration element, which runs
    // next and rejects them as expired.
    let window = channel.nonce_store().window();
    let now = channel.now();
    if schema.incoming.contains(Protections::EXPIRATION) && (issued < now - window || issued > now + window) {
        debug!(nonce, "nonce outside replay window, deferring to expiration check");
        return Ok(());
    }

    if !channel.nonce_store().use_nonce(nonce, issued) {
        warn!(kind = schema.name, nonce, "replayed message detected");
        return Err(ProtocolError::ReplayedMessage {
            nonce: nonce.to_string(),
        });
    }
    Ok(())
}
