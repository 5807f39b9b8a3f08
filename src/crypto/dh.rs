//! Diffie-Hellman key exchange for association establishment.
//!
//! Establishes an association secret over a channel without transport
//! confidentiality. The provider masks its MAC key with the hash of the shared
//! value: `enc_mac_key = mac_key XOR H(btwoc(g^(xy) mod p))`. XOR-ing again with
//! the same hash recovers the key on the relying party's side.

use std::fmt;
use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use num_bigint::{BigUint, RandBigInt};
use num_traits::One;
use rand::rngs::OsRng;

use super::hash::HashAlgorithm;
use super::prime::{generate_prime, is_probable_prime};
use crate::core::{
    DH_DEFAULT_GENERATOR, DH_DEFAULT_MODULUS_HEX, DH_MODP_2048_HEX, KeyExchangeError,
    SESSION_DH_SHA1, SESSION_DH_SHA256, SESSION_NO_ENCRYPTION,
};

/// How the MAC key travels in an associate response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionType {
    /// Diffie-Hellman, shared value hashed with SHA-1.
    DhSha1,
    /// Diffie-Hellman, shared value hashed with SHA-256.
    DhSha256,
    /// Plaintext MAC key; only acceptable over HTTPS.
    NoEncryption,
}

impl SessionType {
    /// Diffie-Hellman sessions, strongest first.
    pub const DH_STRONGEST_FIRST: [SessionType; 2] = [SessionType::DhSha256, SessionType::DhSha1];

    /// Protocol name (`session_type`).
    pub fn name(self) -> &'static str {
        match self {
            SessionType::DhSha1 => SESSION_DH_SHA1,
            SessionType::DhSha256 => SESSION_DH_SHA256,
            SessionType::NoEncryption => SESSION_NO_ENCRYPTION,
        }
    }

    /// Hash applied to the shared value, `None` for unencrypted sessions.
    pub fn hash(self) -> Option<HashAlgorithm> {
        match self {
            SessionType::DhSha1 => Some(HashAlgorithm::Sha1),
            SessionType::DhSha256 => Some(HashAlgorithm::Sha256),
            SessionType::NoEncryption => None,
        }
    }

    /// Check if the MAC key is encrypted in transit.
    pub fn is_encrypted(self) -> bool {
        self.hash().is_some()
    }

    /// Diffie-Hellman session whose hash matches a secret of `secret_len` bytes.
    pub fn for_secret_len(secret_len: usize) -> Option<SessionType> {
        Self::DH_STRONGEST_FIRST
            .into_iter()
            .find(|s| s.hash().is_some_and(|h| h.output_len() == secret_len))
    }
}

impl FromStr for SessionType {
    type Err = KeyExchangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            SESSION_DH_SHA1 => Ok(SessionType::DhSha1),
            SESSION_DH_SHA256 => Ok(SessionType::DhSha256),
            SESSION_NO_ENCRYPTION => Ok(SessionType::NoEncryption),
            other => Err(KeyExchangeError::UnknownSessionType(other.to_string())),
        }
    }
}

impl fmt::Display for SessionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// Big-endian moduli of the built-in groups, decoded while compiling.
const DEFAULT_MODULUS: [u8; 128] = decode_hex(DH_DEFAULT_MODULUS_HEX);
const MODP_2048_MODULUS: [u8; 256] = decode_hex(DH_MODP_2048_HEX);

const fn decode_hex<const N: usize>(hex: &str) -> [u8; N] {
    let hex = hex.as_bytes();
    assert!(hex.len() == 2 * N, "hex constant has the wrong length");
    let mut out = [0u8; N];
    let mut i = 0;
    while i < N {
        out[i] = (hex_digit(hex[2 * i]) << 4) | hex_digit(hex[2 * i + 1]);
        i += 1;
    }
    out
}

const fn hex_digit(c: u8) -> u8 {
    match c {
        b'0'..=b'9' => c - b'0',
        b'a'..=b'f' => c - b'a' + 10,
        b'A'..=b'F' => c - b'A' + 10,
        _ => panic!("invalid hex digit in constant"),
    }
}

/// Modulus and generator of a Diffie-Hellman group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhGroup {
    modulus: BigUint,
    generator: BigUint,
}

impl DhGroup {
    /// The well-known OpenID group (1024-bit modulus, generator 2).
    pub fn openid_default() -> Self {
        Self::well_known(&DEFAULT_MODULUS)
    }

    /// RFC 3526 group 14 (2048-bit safe prime, generator 2).
    pub fn modp_2048() -> Self {
        Self::well_known(&MODP_2048_MODULUS)
    }

    fn well_known(modulus: &[u8]) -> Self {
        Self {
            modulus: BigUint::from_bytes_be(modulus),
            generator: BigUint::from(DH_DEFAULT_GENERATOR),
        }
    }

    /// Check if `modulus` is one of the built-in moduli.
    pub fn is_well_known_modulus(modulus: &BigUint) -> bool {
        *modulus == Self::openid_default().modulus || *modulus == Self::modp_2048().modulus
    }

    /// Accept supplied parameters after validation.
    ///
    /// `p` must be a probable prime (well-known moduli skip the test) and
    /// `2 <= g <= p-2`.
    pub fn from_parameters(modulus: BigUint, generator: BigUint, rounds: u32) -> Result<Self, KeyExchangeError> {
        let two = BigUint::from(2u32);
        if modulus < BigUint::from(5u32) {
            return Err(KeyExchangeError::InvalidParameters("modulus too small".into()));
        }
        if generator < two || generator > &modulus - &two {
            return Err(KeyExchangeError::InvalidParameters(
                "generator outside [2, p-2]".into(),
            ));
        }
        if !Self::is_well_known_modulus(&modulus) && !is_probable_prime(&modulus, rounds, &mut OsRng) {
            return Err(KeyExchangeError::InvalidParameters("modulus is not prime".into()));
        }
        Ok(Self { modulus, generator })
    }

    /// Fresh group with a random `bits`-bit probable prime and generator 2.
    pub fn generate(bits: u64, rounds: u32, attempts: u32) -> Result<Self, KeyExchangeError> {
        let modulus = generate_prime(bits, rounds, attempts, &mut OsRng)?;
        Self::from_parameters(modulus, BigUint::from(DH_DEFAULT_GENERATOR), rounds)
    }

    /// Modulus `p`.
    pub fn modulus(&self) -> &BigUint {
        &self.modulus
    }

    /// Generator `g`.
    pub fn generator(&self) -> &BigUint {
        &self.generator
    }

    /// Check if this is the group assumed when a request names none.
    pub fn is_openid_default(&self) -> bool {
        *self == Self::openid_default()
    }
}

impl Default for DhGroup {
    fn default() -> Self {
        Self::openid_default()
    }
}

/// Ephemeral exchange state. Created per attempt and dropped after deriving
/// the shared value; never persisted.
pub struct DhKeyPair {
    group: DhGroup,
    private: BigUint,
    public: BigUint,
}

impl DhKeyPair {
    /// Draw `x` uniformly from `[1, p-2]` and compute `g^x mod p`.
    pub fn generate(group: &DhGroup) -> Self {
        let upper = &group.modulus - BigUint::one();
        let private = OsRng.gen_biguint_range(&BigUint::one(), &upper);
        let public = group.generator.modpow(&private, &group.modulus);
        Self {
            group: group.clone(),
            private,
            public,
        }
    }

    /// Group in use.
    pub fn group(&self) -> &DhGroup {
        &self.group
    }

    /// Public value `g^x mod p`.
    pub fn public(&self) -> &BigUint {
        &self.public
    }

    /// Shared value `remote^x mod p`.
    ///
    /// Remote values outside `[2, p-2]` are rejected.
    pub fn shared_value(&self, remote_public: &BigUint) -> Result<BigUint, KeyExchangeError> {
        let two = BigUint::from(2u32);
        if *remote_public < two || *remote_public > &self.group.modulus - &two {
            return Err(KeyExchangeError::InvalidParameters(
                "remote public value outside [2, p-2]".into(),
            ));
        }
        Ok(remote_public.modpow(&self.private, &self.group.modulus))
    }

    /// Mask or unmask `secret` with `H(btwoc(shared value))`.
    pub fn xor_secret(
        &self,
        session: SessionType,
        remote_public: &BigUint,
        secret: &[u8],
    ) -> Result<Vec<u8>, KeyExchangeError> {
        let shared = self.shared_value(remote_public)?;
        xor_secret(session, &shared, secret)
    }
}

impl fmt::Debug for DhKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DhKeyPair")
            .field("group", &self.group)
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

/// XOR `secret` with the session hash of `btwoc(shared)`.
///
/// The hash must be exactly as long as the secret.
pub fn xor_secret(session: SessionType, shared: &BigUint, secret: &[u8]) -> Result<Vec<u8>, KeyExchangeError> {
    let hash = session.hash().ok_or_else(|| KeyExchangeError::IncompatibleSessionType {
        association_type: format!("{}-byte secret", secret.len()),
        session_type: session.name().to_string(),
    })?;
    let mask = hash.digest(&btwoc(shared));
    if mask.len() != secret.len() {
        return Err(KeyExchangeError::AlgorithmMismatch {
            secret_len: secret.len(),
            hash_len: mask.len(),
        });
    }
    Ok(secret.iter().zip(mask).map(|(s, m)| s ^ m).collect())
}

/// Big-endian two's-complement bytes: a leading zero byte is added when the
/// high bit is set.
pub fn btwoc(value: &BigUint) -> Vec<u8> {
    let bytes = value.to_bytes_be();
    match bytes.first() {
        Some(first) if first & 0x80 != 0 => {
            let mut out = Vec::with_capacity(bytes.len() + 1);
            out.push(0);
            out.extend_from_slice(&bytes);
            out
        }
        _ => bytes,
    }
}

/// Base64 of `btwoc(value)`, as carried in `dh_*` parts.
pub fn encode_btwoc_base64(value: &BigUint) -> String {
    BASE64.encode(btwoc(value))
}

/// Inverse of [`encode_btwoc_base64`].
pub fn decode_btwoc_base64(encoded: &str) -> Result<BigUint, KeyExchangeError> {
    let bytes = BASE64
        .decode(encoded)
        .map_err(|_| KeyExchangeError::InvalidParameters("value is not base64".into()))?;
    Ok(BigUint::from_bytes_be(&bytes))
}
