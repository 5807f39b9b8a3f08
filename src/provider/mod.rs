//! Provider API.
//!
//! Answers associate and check_authentication requests and signs positive
//! assertions.

mod endpoint;

pub use endpoint::*;
