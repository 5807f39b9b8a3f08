//! # openauth-protocol
//!
//! Message channel for OpenID 2.0 and OAuth 1.0 style protocols.
//!
//! Every outgoing message passes a pipeline of binding elements that stamp an
//! issue time, attach a single-use nonce, and sign it; every incoming message
//! is checked by the same elements in reverse. Relying parties and providers
//! share signing secrets ("associations") negotiated over Diffie-Hellman, and
//! a relying party without an association falls back to asking the provider
//! directly ("dumb mode").
//!
//! ## Feature Flags
//!
//! - `relying-party` (default): association negotiation with providers
//! - `provider` (default): associate and check_authentication handling
//!
//! ## Modules
//!
//! - [`core`]: constants, errors, settings, and collaborator traits
//! - [`message`]: message schemas and wire encodings
//! - [`crypto`]: associations, HMAC, Diffie-Hellman, primality
//! - [`store`]: association and nonce stores
//! - [`channel`]: binding elements and the channel
//!
//! ## Example Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use openauth_protocol::prelude::*;
//!
//! struct Secrets;
//!
//! impl TokenSecrets for Secrets {
//!     fn consumer_secret(&self, consumer_key: &str) -> Option<String> {
//!         (consumer_key == "photos-app").then(|| "kd94hf93k423kf44".to_string())
//!     }
//!
//!     fn token_secret(&self, _token: &str) -> Option<String> {
//!         None
//!     }
//! }
//!
//! let channel = Channel::builder()
//!     .token_secrets(Arc::new(Secrets))
//!     .build()
//!     .unwrap();
//!
//! let mut request = Message::new(MessageKind::OAuthSignedRequest);
//! request.set(OAUTH_CONSUMER_KEY, "photos-app");
//! request.set_recipient(url::Url::parse("https://photos.example/photos").unwrap());
//!
//! let applied = channel.prepare_outgoing(&mut request).unwrap();
//! assert_eq!(applied, Protections::ALL);
//!
//! let verified = channel.process_incoming(request).unwrap();
//! assert_eq!(verified.protections(), Protections::ALL);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Core module (always included)
pub mod core;

pub mod channel;
pub mod crypto;
pub mod message;
pub mod store;

// Relying party API (feature-gated)
#[cfg(feature = "relying-party")]
#[cfg_attr(docsrs, doc(cfg(feature = "relying-party")))]
pub mod relying_party;

// Provider API (feature-gated)
#[cfg(feature = "provider")]
#[cfg_attr(docsrs, doc(cfg(feature = "provider")))]
pub mod provider;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::core::*;

    pub use crate::channel::{AssociationRole, BindingElement, Channel, ChannelBuilder, VerifiedMessage};
    pub use crate::crypto::{Association, AssociationType, DhGroup, SessionType};
    pub use crate::message::{Message, MessageKind};
    pub use crate::store::{AssociationStore, AssociationUse, NonceStore};

    #[cfg(feature = "relying-party")]
    pub use crate::relying_party::AssociationManager;

    #[cfg(feature = "provider")]
    pub use crate::provider::ProviderEndpoint;
}

// Re-export commonly used items at crate root
pub use channel::{Channel, ChannelBuilder};
pub use core::{MessageError, ProtocolError, ProtocolResult, Protections, SecuritySettings};
pub use message::{Message, MessageKind};
