//! Message model and wire encodings.
//!
//! - [`MessageKind`]: the closed set of message types and their schemas
//! - [`Message`]: parts, recipient, and validation against the schema
//! - Key-value form and form-urlencoded codecs

mod encoding;
#[allow(clippy::module_inception)]
mod message;
mod schema;

pub use encoding::*;
pub use message::*;
pub use schema::*;
