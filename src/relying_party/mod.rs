//! Relying party API.
//!
//! Association negotiation with OpenID providers. Verification of incoming
//! assertions goes through a [`Channel`](crate::channel::Channel) built with
//! [`ChannelBuilder::relying_party`](crate::channel::ChannelBuilder::relying_party).

mod manager;

pub use manager::*;
