//! Core constants, errors, traits, and configuration.
//!
//! This module has no dependency on the message model or the stores and
//! defines the vocabulary the rest of the crate is written in.

mod config;
mod constants;
mod error;
mod flags;
mod traits;

pub use config::*;
pub use constants::*;
pub use error::*;
pub use flags::*;
pub use traits::*;
