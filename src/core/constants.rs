//! Protocol constants from the OpenID 2.0 and OAuth 1.0 specifications.
//!
//! Part names and literal values are fixed by the protocols and MUST NOT be changed.

use std::time::Duration;

// =============================================================================
// OPENID NAMESPACE AND MODES
// =============================================================================

/// OpenID 2.0 namespace URI carried in `openid.ns`.
pub const OPENID_NS_20: &str = "http://specs.openid.net/auth/2.0";

/// Prefix shared by every OpenID indirect/request part.
pub const OPENID_PREFIX: &str = "openid.";

/// `openid.mode` value of an association request.
pub const MODE_ASSOCIATE: &str = "associate";

/// `openid.mode` value of an interactive authentication request.
pub const MODE_CHECKID_SETUP: &str = "checkid_setup";

/// `openid.mode` value of a non-interactive authentication request.
pub const MODE_CHECKID_IMMEDIATE: &str = "checkid_immediate";

/// `openid.mode` value of a positive assertion.
pub const MODE_ID_RES: &str = "id_res";

/// `openid.mode` value of a dumb-mode verification request.
pub const MODE_CHECK_AUTHENTICATION: &str = "check_authentication";

// =============================================================================
// OPENID PART NAMES
// =============================================================================

/// Namespace part (requests and indirect responses).
pub const PART_NS: &str = "openid.ns";
/// Mode part.
pub const PART_MODE: &str = "openid.mode";
/// Association type requested by the relying party.
pub const PART_ASSOC_TYPE: &str = "openid.assoc_type";
/// Session type requested by the relying party.
pub const PART_SESSION_TYPE: &str = "openid.session_type";
/// Diffie-Hellman modulus (base64 btwoc).
pub const PART_DH_MODULUS: &str = "openid.dh_modulus";
/// Diffie-Hellman generator (base64 btwoc).
pub const PART_DH_GEN: &str = "openid.dh_gen";
/// Relying party's Diffie-Hellman public value (base64 btwoc).
pub const PART_DH_CONSUMER_PUBLIC: &str = "openid.dh_consumer_public";
/// Association handle used to sign an indirect message.
pub const PART_ASSOC_HANDLE: &str = "openid.assoc_handle";
/// Handle the relying party should forget.
pub const PART_INVALIDATE_HANDLE: &str = "openid.invalidate_handle";
/// Comma separated list of signed fields (without prefix).
pub const PART_SIGNED: &str = "openid.signed";
/// Base64 signature.
pub const PART_SIG: &str = "openid.sig";
/// Timestamped single-use nonce of a positive assertion.
pub const PART_RESPONSE_NONCE: &str = "openid.response_nonce";
/// Provider endpoint that issued a positive assertion.
pub const PART_OP_ENDPOINT: &str = "openid.op_endpoint";
/// Relying party URL the assertion is delivered to.
pub const PART_RETURN_TO: &str = "openid.return_to";
/// Realm the user is asked to trust.
pub const PART_REALM: &str = "openid.realm";
/// Claimed identifier.
pub const PART_CLAIMED_ID: &str = "openid.claimed_id";
/// OP-local identifier.
pub const PART_IDENTITY: &str = "openid.identity";

// Direct (key-value form) response part names carry no prefix.

/// Namespace of a direct response.
pub const KV_NS: &str = "ns";
/// Association handle of an associate response.
pub const KV_ASSOC_HANDLE: &str = "assoc_handle";
/// Association type of an associate response.
pub const KV_ASSOC_TYPE: &str = "assoc_type";
/// Session type of an associate response.
pub const KV_SESSION_TYPE: &str = "session_type";
/// Association lifetime in seconds.
pub const KV_EXPIRES_IN: &str = "expires_in";
/// Plaintext MAC key (no-encryption sessions only).
pub const KV_MAC_KEY: &str = "mac_key";
/// Provider's Diffie-Hellman public value.
pub const KV_DH_SERVER_PUBLIC: &str = "dh_server_public";
/// MAC key XOR-ed with the hashed shared value.
pub const KV_ENC_MAC_KEY: &str = "enc_mac_key";
/// Human readable error.
pub const KV_ERROR: &str = "error";
/// Machine readable error code.
pub const KV_ERROR_CODE: &str = "error_code";
/// Result of a check_authentication request.
pub const KV_IS_VALID: &str = "is_valid";
/// Handle invalidated by the provider.
pub const KV_INVALIDATE_HANDLE: &str = "invalidate_handle";

/// `error_code` of an unsuccessful associate response.
pub const ERROR_CODE_UNSUPPORTED_TYPE: &str = "unsupported-type";

// =============================================================================
// ASSOCIATION AND SESSION TYPES
// =============================================================================

/// HMAC-SHA1 association type name.
pub const ASSOC_HMAC_SHA1: &str = "HMAC-SHA1";
/// HMAC-SHA256 association type name.
pub const ASSOC_HMAC_SHA256: &str = "HMAC-SHA256";

/// Diffie-Hellman session hashing the shared value with SHA-1.
pub const SESSION_DH_SHA1: &str = "DH-SHA1";
/// Diffie-Hellman session hashing the shared value with SHA-256.
pub const SESSION_DH_SHA256: &str = "DH-SHA256";
/// Plaintext MAC key session (only over HTTPS).
pub const SESSION_NO_ENCRYPTION: &str = "no-encryption";

/// HMAC-SHA1 secret size.
pub const SHA1_SECRET_SIZE: usize = 20;
/// HMAC-SHA256 secret size.
pub const SHA256_SECRET_SIZE: usize = 32;

// =============================================================================
// OAUTH PART NAMES
// =============================================================================

/// Consumer key.
pub const OAUTH_CONSUMER_KEY: &str = "oauth_consumer_key";
/// Access or request token.
pub const OAUTH_TOKEN: &str = "oauth_token";
/// Token secret returned by the service provider.
pub const OAUTH_TOKEN_SECRET: &str = "oauth_token_secret";
/// Signature method.
pub const OAUTH_SIGNATURE_METHOD: &str = "oauth_signature_method";
/// Signature.
pub const OAUTH_SIGNATURE: &str = "oauth_signature";
/// Issue time in seconds since the Unix epoch.
pub const OAUTH_TIMESTAMP: &str = "oauth_timestamp";
/// Single-use nonce.
pub const OAUTH_NONCE: &str = "oauth_nonce";
/// Protocol version.
pub const OAUTH_VERSION: &str = "oauth_version";
/// Callback URL.
pub const OAUTH_CALLBACK: &str = "oauth_callback";
/// Verifier code.
pub const OAUTH_VERIFIER: &str = "oauth_verifier";

/// `oauth_signature_method` for HMAC-SHA1.
pub const OAUTH_HMAC_SHA1: &str = "HMAC-SHA1";
/// `oauth_signature_method` for HMAC-SHA256.
pub const OAUTH_HMAC_SHA256: &str = "HMAC-SHA256";

// =============================================================================
// DEFAULTS
// =============================================================================

/// Maximum age of a message, excluding clock skew.
pub const DEFAULT_MAX_MESSAGE_AGE: Duration = Duration::from_secs(3 * 60);

/// Tolerated clock difference between parties.
pub const DEFAULT_MAX_CLOCK_SKEW: Duration = Duration::from_secs(10 * 60);

/// Upper bound on a user's authentication; also the dumb association lifetime.
pub const DEFAULT_MAX_AUTHENTICATION_TIME: Duration = Duration::from_secs(5 * 60);

/// Lifetime of a smart (shared) association.
pub const DEFAULT_SMART_ASSOCIATION_LIFETIME: Duration = Duration::from_secs(14 * 24 * 60 * 60);

/// Weakest accepted association hash.
pub const DEFAULT_MIN_HASH_BIT_LENGTH: usize = 160;

/// Strongest accepted association hash.
pub const DEFAULT_MAX_HASH_BIT_LENGTH: usize = 256;

/// Characters in a generated replay-protection nonce.
pub const DEFAULT_NONCE_LENGTH: usize = 8;

/// Alphabet of generated replay-protection nonces.
pub const NONCE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Miller-Rabin rounds used to validate a supplied modulus.
pub const DEFAULT_PRIMALITY_ROUNDS: u32 = 16;

/// Candidates tried before prime generation gives up.
pub const DEFAULT_PRIME_GENERATION_ATTEMPTS: u32 = 1000;

/// Random bytes in a provider-generated association handle.
pub const HANDLE_RANDOM_BYTES: usize = 4;

/// Nonce store inserts between opportunistic purges.
pub const NONCE_PURGE_INTERVAL: usize = 1024;

/// Association store inserts between opportunistic purges of expired entries.
pub const ASSOCIATION_PURGE_INTERVAL: usize = 256;

/// Associate retries after an unsuccessful response.
pub const ASSOCIATE_RENEGOTIATE_RETRIES: u32 = 1;

// =============================================================================
// DIFFIE-HELLMAN GROUPS
// =============================================================================

/// Default OpenID Diffie-Hellman modulus (1024 bits, hex).
pub const DH_DEFAULT_MODULUS_HEX: &str = concat!(
    "DCF93A0B883972EC0E19989AC5A2CE310E1D37717E8D9571BB7623731866E61E",
    "F75A2E27898B057F9891C2E27A639C3F29B60814581CD3B2CA3986D268370557",
    "7D45C2E7E52DC81C7A171876E5CEA74B1448BFDFAF18828EFD2519F14E45E382",
    "6634AF1949E5B535CC829A483B8A76223E5D490A257F05BDFF16F2FB22C583AB",
);

/// RFC 3526 group 14 modulus (2048-bit safe prime, hex).
pub const DH_MODP_2048_HEX: &str = concat!(
    "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD129024E088A67CC74",
    "020BBEA63B139B22514A08798E3404DDEF9519B3CD3A431B302B0A6DF25F1437",
    "4FE1356D6D51C245E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED",
    "EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3DC2007CB8A163BF05",
    "98DA48361C55D39A69163FA8FD24CF5F83655D23DCA3AD961C62F356208552BB",
    "9ED529077096966D670C354E4ABC9804F1746C08CA18217C32905E462E36CE3B",
    "E39E772C180E86039B2783A2EC07A28FB5C55DF06F4C52C9DE2BCBF695581718",
    "3995497CEA956AE515D2261898FA051015728E5A8AACAA68FFFFFFFFFFFFFFFF",
);

/// Generator of both well-known groups.
pub const DH_DEFAULT_GENERATOR: u32 = 2;
