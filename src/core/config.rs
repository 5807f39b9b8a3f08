//! Security settings shared by channels, stores, and association negotiation.

use std::time::Duration;

use chrono::Duration as ChronoDuration;

use super::constants::{
    DEFAULT_MAX_AUTHENTICATION_TIME, DEFAULT_MAX_CLOCK_SKEW, DEFAULT_MAX_HASH_BIT_LENGTH,
    DEFAULT_MAX_MESSAGE_AGE, DEFAULT_MIN_HASH_BIT_LENGTH, DEFAULT_NONCE_LENGTH,
    DEFAULT_PRIMALITY_ROUNDS, DEFAULT_PRIME_GENERATION_ATTEMPTS,
    DEFAULT_SMART_ASSOCIATION_LIFETIME,
};
use super::error::ProtocolError;

/// Security settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecuritySettings {
    /// Maximum age of an incoming message, excluding clock skew.
    pub max_message_age: Duration,

    /// Tolerated clock difference between the parties.
    pub max_clock_skew: Duration,

    /// Upper bound on one authentication. Lifetime of private (dumb)
    /// associations and the least remaining life worth reusing a smart one for.
    pub max_authentication_time: Duration,

    /// Lifetime of shared (smart) associations issued by a provider.
    pub smart_association_lifetime: Duration,

    /// Weakest association hash accepted.
    pub min_hash_bit_length: usize,

    /// Strongest association hash accepted.
    pub max_hash_bit_length: usize,

    /// Characters in generated replay-protection nonces.
    pub nonce_length: usize,

    /// Miller-Rabin rounds for validating a supplied modulus.
    pub primality_rounds: u32,

    /// Candidates tried before prime generation gives up.
    pub prime_generation_attempts: u32,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            max_message_age: DEFAULT_MAX_MESSAGE_AGE,
            max_clock_skew: DEFAULT_MAX_CLOCK_SKEW,
            max_authentication_time: DEFAULT_MAX_AUTHENTICATION_TIME,
            smart_association_lifetime: DEFAULT_SMART_ASSOCIATION_LIFETIME,
            min_hash_bit_length: DEFAULT_MIN_HASH_BIT_LENGTH,
            max_hash_bit_length: DEFAULT_MAX_HASH_BIT_LENGTH,
            nonce_length: DEFAULT_NONCE_LENGTH,
            primality_rounds: DEFAULT_PRIMALITY_ROUNDS,
            prime_generation_attempts: DEFAULT_PRIME_GENERATION_ATTEMPTS,
        }
    }
}

impl SecuritySettings {
    /// Start a builder from the defaults.
    pub fn builder() -> SecuritySettingsBuilder {
        SecuritySettingsBuilder::new()
    }

    /// Age beyond which an incoming message is expired (message age + skew).
    ///
    /// Also the nonce retention window: nonces older than this are rejected by
    /// the expiration element anyway.
    pub fn max_message_age_with_skew(&self) -> ChronoDuration {
        to_chrono(self.max_message_age + self.max_clock_skew)
    }

    /// Least remaining lifetime for an association to be worth using.
    pub fn min_useful_association_lifetime(&self) -> ChronoDuration {
        to_chrono(self.max_authentication_time)
    }

    /// Check if an association hash size lies within the permitted range.
    pub fn is_hash_length_permitted(&self, bits: usize) -> bool {
        bits >= self.min_hash_bit_length && bits <= self.max_hash_bit_length
    }

    /// Reject inconsistent settings.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.min_hash_bit_length > self.max_hash_bit_length {
            return Err(ProtocolError::Config(format!(
                "min_hash_bit_length ({}) exceeds max_hash_bit_length ({})",
                self.min_hash_bit_length, self.max_hash_bit_length
            )));
        }
        if self.max_message_age.is_zero() {
            return Err(ProtocolError::Config("max_message_age must be non-zero".into()));
        }
        if self.max_authentication_time.is_zero() {
            return Err(ProtocolError::Config(
                "max_authentication_time must be non-zero".into(),
            ));
        }
        if self.nonce_length == 0 {
            return Err(ProtocolError::Config("nonce_length must be non-zero".into()));
        }
        if self.primality_rounds == 0 {
            return Err(ProtocolError::Config("primality_rounds must be non-zero".into()));
        }
        if self.prime_generation_attempts == 0 {
            return Err(ProtocolError::Config(
                "prime_generation_attempts must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Saturating conversion; every configured duration fits comfortably.
pub(crate) fn to_chrono(duration: Duration) -> ChronoDuration {
    ChronoDuration::from_std(duration).unwrap_or(ChronoDuration::MAX)
}

/// Builder for [`SecuritySettings`].
#[derive(Debug, Default)]
pub struct SecuritySettingsBuilder {
    settings: SecuritySettings,
}

impl SecuritySettingsBuilder {
    /// Create a builder holding the default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum message age.
    pub fn max_message_age(mut self, age: Duration) -> Self {
        self.settings.max_message_age = age;
        self
    }

    /// Set the tolerated clock skew.
    pub fn max_clock_skew(mut self, skew: Duration) -> Self {
        self.settings.max_clock_skew = skew;
        self
    }

    /// Set the maximum authentication time.
    pub fn max_authentication_time(mut self, time: Duration) -> Self {
        self.settings.max_authentication_time = time;
        self
    }

    /// Set the smart association lifetime.
    pub fn smart_association_lifetime(mut self, lifetime: Duration) -> Self {
        self.settings.smart_association_lifetime = lifetime;
        self
    }

    /// Set the permitted association hash range, in bits.
    pub fn hash_bit_length(mut self, min: usize, max: usize) -> Self {
        self.settings.min_hash_bit_length = min;
        self.settings.max_hash_bit_length = max;
        self
    }

    /// Set the generated nonce length.
    pub fn nonce_length(mut self, length: usize) -> Self {
        self.settings.nonce_length = length;
        self
    }

    /// Set the Miller-Rabin round count.
    pub fn primality_rounds(mut self, rounds: u32) -> Self {
        self.settings.primality_rounds = rounds;
        self
    }

    /// Set the prime generation attempt budget.
    pub fn prime_generation_attempts(mut self, attempts: u32) -> Self {
        self.settings.prime_generation_attempts = attempts;
        self
    }

    /// Validate and return the settings.
    pub fn build(self) -> Result<SecuritySettings, ProtocolError> {
        self.settings.validate()?;
        Ok(self.settings)
    }
}
