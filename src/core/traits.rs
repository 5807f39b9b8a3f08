//! Collaborator traits at the edge of the protocol core.
//!
//! The core performs no I/O of its own. Hosts plug in a clock, a direct
//! transport for server-to-server calls, and OAuth secret lookup.

use std::fmt;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;

use super::error::TransportError;

/// How a message travels between the parties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// Server-to-server request or response body.
    Direct,
    /// Carried through the user agent by redirect or form POST.
    Indirect,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Direct => f.write_str("direct"),
            TransportKind::Indirect => f.write_str("indirect"),
        }
    }
}

/// Source of the current time.
pub trait Clock: Send + Sync {
    /// Current UTC time.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Create a clock frozen at `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: ChronoDuration) {
        let mut now = self.now.lock();
        *now += by;
    }

    /// Jump to an absolute time.
    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Server-to-server HTTP exchange, provided by the host.
///
/// Association establishment and dumb-mode verification are the only
/// operations that call out; everything else is pure computation.
pub trait DirectTransport: Send + Sync {
    /// POST `body` (form-urlencoded) to `endpoint` and return the response body.
    fn post(&self, endpoint: &str, body: &[u8]) -> Result<Vec<u8>, TransportError>;
}

/// OAuth consumer and token secret lookup.
///
/// On a consumer this returns the consumer's own secrets; on a service
/// provider it looks up what was issued.
pub trait TokenSecrets: Send + Sync {
    /// Secret shared with the consumer identified by `consumer_key`.
    fn consumer_secret(&self, consumer_key: &str) -> Option<String>;

    /// Secret belonging to `token`.
    fn token_secret(&self, token: &str) -> Option<String>;
}
