//! Associations: shared HMAC secrets negotiated between a relying party and a provider.
//!
//! The secret is zeroized on drop and never printed by `Debug`.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Duration as ChronoDuration, SubsecRound, Utc};
use rand::{RngCore, rngs::OsRng};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::dh::SessionType;
use super::hash::HashAlgorithm;
use crate::core::{
    ASSOC_HMAC_SHA1, ASSOC_HMAC_SHA256, HANDLE_RANDOM_BYTES, KeyExchangeError, SHA1_SECRET_SIZE,
    SHA256_SECRET_SIZE, SecuritySettings, to_chrono,
};

/// Association signing algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssociationType {
    /// HMAC-SHA1 with a 20-byte secret.
    HmacSha1,
    /// HMAC-SHA256 with a 32-byte secret.
    HmacSha256,
}

impl AssociationType {
    /// Every type, strongest first.
    pub const STRONGEST_FIRST: [AssociationType; 2] =
        [AssociationType::HmacSha256, AssociationType::HmacSha1];

    /// Protocol name (`assoc_type`).
    pub fn name(self) -> &'static str {
        match self {
            AssociationType::HmacSha1 => ASSOC_HMAC_SHA1,
            AssociationType::HmacSha256 => ASSOC_HMAC_SHA256,
        }
    }

    /// Mandated secret length in bytes.
    pub fn secret_len(self) -> usize {
        match self {
            AssociationType::HmacSha1 => SHA1_SECRET_SIZE,
            AssociationType::HmacSha256 => SHA256_SECRET_SIZE,
        }
    }

    /// Digest behind the HMAC.
    pub fn hash(self) -> HashAlgorithm {
        match self {
            AssociationType::HmacSha1 => HashAlgorithm::Sha1,
            AssociationType::HmacSha256 => HashAlgorithm::Sha256,
        }
    }

    /// Hash size in bits.
    pub fn hash_bit_length(self) -> usize {
        self.hash().bit_length()
    }

    /// Check if a session of `session` type can carry this type's secret.
    ///
    /// Unencrypted sessions carry any secret; a Diffie-Hellman session's hash
    /// must be exactly as long as the secret it masks.
    pub fn is_session_compatible(self, session: SessionType) -> bool {
        match session.hash() {
            None => true,
            Some(hash) => hash.output_len() == self.secret_len(),
        }
    }

    /// Permitted types, strongest first.
    pub fn permitted(settings: &SecuritySettings) -> impl Iterator<Item = AssociationType> + '_ {
        Self::STRONGEST_FIRST
            .into_iter()
            .filter(|t| settings.is_hash_length_permitted(t.hash_bit_length()))
    }

    /// Weakest permitted type.
    pub fn weakest_permitted(settings: &SecuritySettings) -> Option<AssociationType> {
        Self::permitted(settings).last()
    }

    /// Strongest permitted type.
    pub fn strongest_permitted(settings: &SecuritySettings) -> Option<AssociationType> {
        Self::permitted(settings).next()
    }
}

impl FromStr for AssociationType {
    type Err = KeyExchangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            ASSOC_HMAC_SHA1 => Ok(AssociationType::HmacSha1),
            ASSOC_HMAC_SHA256 => Ok(AssociationType::HmacSha256),
            other => Err(KeyExchangeError::UnknownAssociationType(other.to_string())),
        }
    }
}

impl fmt::Display for AssociationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A shared secret with a handle, algorithm, and bounded lifetime.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "AssociationRecord", into = "AssociationRecord")]
pub struct Association {
    handle: String,
    secret: Zeroizing<Vec<u8>>,
    association_type: AssociationType,
    issued: DateTime<Utc>,
    lifetime: Duration,
}

impl Association {
    /// Create an association, checking the secret length.
    ///
    /// The issue time is truncated to whole seconds.
    pub fn new(
        handle: impl Into<String>,
        secret: Vec<u8>,
        association_type: AssociationType,
        issued: DateTime<Utc>,
        lifetime: Duration,
    ) -> Result<Self, KeyExchangeError> {
        if secret.len() != association_type.secret_len() {
            return Err(KeyExchangeError::SecretLengthMismatch {
                association_type: association_type.name(),
                expected: association_type.secret_len(),
                actual: secret.len(),
            });
        }
        Ok(Self {
            handle: handle.into(),
            secret: Zeroizing::new(secret),
            association_type,
            issued: issued.trunc_subsecs(0),
            lifetime: Duration::from_secs(lifetime.as_secs()),
        })
    }

    /// Create a fresh provider-side association with a random secret and handle.
    pub fn generate(association_type: AssociationType, issued: DateTime<Utc>, lifetime: Duration) -> Self {
        let mut secret = vec![0u8; association_type.secret_len()];
        OsRng.fill_bytes(&mut secret);
        Self {
            handle: generate_handle(association_type, issued),
            secret: Zeroizing::new(secret),
            association_type,
            issued: issued.trunc_subsecs(0),
            lifetime: Duration::from_secs(lifetime.as_secs()),
        }
    }

    /// Handle naming this association.
    pub fn handle(&self) -> &str {
        &self.handle
    }

    /// Raw secret.
    ///
    /// # Security
    /// Never log or persist unencrypted.
    pub fn secret(&self) -> &[u8] {
        &self.secret
    }

    /// Signing algorithm.
    pub fn association_type(&self) -> AssociationType {
        self.association_type
    }

    /// Issue time.
    pub fn issued(&self) -> DateTime<Utc> {
        self.issued
    }

    /// Lifetime from the issue time.
    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    /// Hash size in bits.
    pub fn hash_bit_length(&self) -> usize {
        self.association_type.hash_bit_length()
    }

    /// Expiry time.
    pub fn expires(&self) -> DateTime<Utc> {
        self.issued + to_chrono(self.lifetime)
    }

    /// Expired once `now > issued + lifetime`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires()
    }

    /// Life left at `now`, zero once expired.
    pub fn remaining(&self, now: DateTime<Utc>) -> ChronoDuration {
        (self.expires() - now).max(ChronoDuration::zero())
    }

    /// Whole seconds left at `now`.
    pub fn seconds_till_expiration(&self, now: DateTime<Utc>) -> u64 {
        u64::try_from(self.remaining(now).num_seconds()).unwrap_or(0)
    }

    /// Check if at least `minimum` life remains.
    pub fn has_useful_life_remaining(&self, now: DateTime<Utc>, minimum: ChronoDuration) -> bool {
        self.remaining(now) >= minimum
    }

    /// HMAC of `data` under the secret.
    pub fn sign(&self, data: &[u8]) -> Result<Vec<u8>, KeyExchangeError> {
        self.association_type.hash().hmac(&self.secret, data)
    }

    /// Verify `signature` over `data` in constant time.
    pub fn verify(&self, data: &[u8], signature: &[u8]) -> bool {
        self.association_type
            .hash()
            .verify_hmac(&self.secret, data, signature)
    }

    /// Serialize to JSON for persistence.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Restore from [`Association::to_json`] output.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

impl fmt::Debug for Association {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Association")
            .field("handle", &self.handle)
            .field("association_type", &self.association_type)
            .field("issued", &self.issued)
            .field("lifetime", &self.lifetime)
            .finish_non_exhaustive()
    }
}

/// `{HMAC-SHA1}{1714564800}{q2Xb7w==}`: type, issue time, random tag.
fn generate_handle(association_type: AssociationType, issued: DateTime<Utc>) -> String {
    let mut uniq = [0u8; HANDLE_RANDOM_BYTES];
    OsRng.fill_bytes(&mut uniq);
    format!(
        "{{{}}}{{{}}}{{{}}}",
        association_type.name(),
        issued.timestamp(),
        BASE64.encode(uniq)
    )
}

/// Persisted form of an [`Association`].
#[derive(Serialize, Deserialize)]
struct AssociationRecord {
    handle: String,
    assoc_type: String,
    secret: String,
    issued: i64,
    lifetime_secs: u64,
}

impl From<Association> for AssociationRecord {
    fn from(association: Association) -> Self {
        Self {
            assoc_type: association.association_type.name().to_string(),
            secret: BASE64.encode(association.secret.as_slice()),
            issued: association.issued.timestamp(),
            lifetime_secs: association.lifetime.as_secs(),
            handle: association.handle,
        }
    }
}

impl TryFrom<AssociationRecord> for Association {
    type Error = KeyExchangeError;

    fn try_from(record: AssociationRecord) -> Result<Self, Self::Error> {
        let association_type = record.assoc_type.parse()?;
        let secret = Zeroizing::new(
            BASE64
                .decode(&record.secret)
                .map_err(|_| KeyExchangeError::InvalidParameters("secret is not base64".into()))?,
        );
        let issued = DateTime::from_timestamp(record.issued, 0)
            .ok_or_else(|| KeyExchangeError::InvalidParameters("issue time out of range".into()))?;
        Association::new(
            record.handle,
            secret.to_vec(),
            association_type,
            issued,
            Duration::from_secs(record.lifetime_secs),
        )
    }
}
