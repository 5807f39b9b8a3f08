//! Channel layer: the binding pipeline between messages and transports.
//!
//! - Binding elements (expiration, replay protection, signing)
//! - Signature construction for OpenID and OAuth
//! - [`Channel`] and its builder

mod binding;
#[allow(clippy::module_inception)]
mod channel;
mod signing;

pub use binding::*;
pub use channel::*;
pub use signing::*;
