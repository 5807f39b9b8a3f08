//! Cryptographic layer.
//!
//! - Associations and their HMAC algorithms
//! - Diffie-Hellman association establishment
//! - Miller-Rabin primality testing
//! - HMAC signing with constant-time verification

mod association;
mod dh;
mod hash;
mod prime;

pub use association::*;
pub use dh::*;
pub use hash::*;
pub use prime::*;
