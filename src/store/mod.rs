//! Shared mutable state: association tables and the nonce store.
//!
//! Both are process-scoped objects owned by whoever builds the channel and
//! passed in by `Arc`; each guards its contents with a single mutex.

mod association;
mod nonce;

pub use association::*;
pub use nonce::*;
