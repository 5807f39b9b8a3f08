//! Replay-protection nonce store.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use tracing::debug;

use crate::core::{Clock, NONCE_PURGE_INTERVAL, SecuritySettings, SystemClock};

#[derive(Debug, Default)]
struct NonceTable {
    /// Nonce value -> timestamp it was presented with.
    seen: HashMap<String, DateTime<Utc>>,
    inserts_since_purge: usize,
}

impl NonceTable {
    fn purge(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.seen.len();
        self.seen.retain(|_, ts| *ts >= cutoff);
        self.inserts_since_purge = 0;
        before - self.seen.len()
    }
}

/// Single-use nonce tracking within a bounded time window.
///
/// The window is the maximum message age plus clock skew. A nonce whose
/// timestamp falls outside it is refused outright, so records older than the
/// window can be forgotten without reopening a replay.
pub struct NonceStore {
    table: Mutex<NonceTable>,
    window: ChronoDuration,
    clock: Arc<dyn Clock>,
}

impl NonceStore {
    /// Create a store whose window follows `settings`.
    pub fn new(settings: &SecuritySettings, clock: Arc<dyn Clock>) -> Self {
        Self::with_window(settings.max_message_age_with_skew(), clock)
    }

    /// Create a store with an explicit retention window.
    pub fn with_window(window: ChronoDuration, clock: Arc<dyn Clock>) -> Self {
        Self {
            table: Mutex::new(NonceTable::default()),
            window,
            clock,
        }
    }

    /// Retention window.
    pub fn window(&self) -> ChronoDuration {
        self.window
    }

    /// Atomically check and mark `value` as used.
    ///
    /// Returns `true` the first time `value` is presented with a timestamp inside
    /// the window, `false` on every later presentation and for out-of-window
    /// timestamps.
    pub fn use_nonce(&self, value: &str, timestamp: DateTime<Utc>) -> bool {
        let now = self.clock.now();
        let cutoff = now - self.window;
        if timestamp < cutoff || timestamp > now + self.window {
            debug!(nonce = value, %timestamp, "nonce timestamp outside retention window");
            return false;
        }

        let mut table = self.table.lock();
        if table.inserts_since_purge >= NONCE_PURGE_INTERVAL {
            table.purge(cutoff);
        }
        if table.seen.contains_key(value) {
            return false;
        }
        table.seen.insert(value.to_string(), timestamp);
        table.inserts_since_purge += 1;
        true
    }

    /// Forget nonces older than the window, returning how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let cutoff = self.clock.now() - self.window;
        self.table.lock().purge(cutoff)
    }

    /// Number of remembered nonces.
    pub fn len(&self) -> usize {
        self.table.lock().seen.len()
    }

    /// Check if no nonce is remembered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for NonceStore {
    fn default() -> Self {
        Self::new(&SecuritySettings::default(), Arc::new(SystemClock))
    }
}

impl std::fmt::Debug for NonceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NonceStore")
            .field("window", &self.window)
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ManualClock;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn store() -> (Arc<ManualClock>, NonceStore) {
        let clock = Arc::new(ManualClock::new(start()));
        let store = NonceStore::new(&SecuritySettings::default(), clock.clone());
        (clock, store)
    }

    #[test]
    fn test_nonce_single_use() {
        let (_, store) = store();
        assert!(store.use_nonce("abc123", start()));
        assert!(!store.use_nonce("abc123", start()));
        assert!(!store.use_nonce("abc123", start() + ChronoDuration::seconds(5)));
        assert!(store.use_nonce("abc124", start()));
    }

    #[test]
    fn test_timestamp_outside_window_rejected() {
        let (_, store) = store();
        assert!(!store.use_nonce("old", start() - ChronoDuration::minutes(14)));
        assert!(!store.use_nonce("future", start() + ChronoDuration::minutes(14)));
        assert!(store.use_nonce("edge", start() - ChronoDuration::minutes(13)));
        assert!(!store.is_empty());
    }

    #[test]
    fn test_purge_expired() {
        let (clock, store) = store();
        assert!(store.use_nonce("n1", start()));
        clock.advance(ChronoDuration::minutes(10));
        assert!(store.use_nonce("n2", clock.now()));

        clock.advance(ChronoDuration::minutes(4));
        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 1);
        // Once forgotten, the old nonce is still refused by its timestamp.
        assert!(!store.use_nonce("n1", start()));
    }

    #[test]
    fn test_opportunistic_purge() {
        let (clock, store) = store();
        for i in 0..NONCE_PURGE_INTERVAL {
            assert!(store.use_nonce(&format!("n{i}"), start()));
        }
        clock.advance(ChronoDuration::minutes(14));
        assert!(store.use_nonce("fresh", clock.now()));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_single_use() {
        let (_, store) = store();
        let store = Arc::new(store);

        let mut tasks = Vec::new();
        for _ in 0..64 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move { store.use_nonce("contended", start()) }));
        }
        let mut accepted = 0;
        for task in tasks {
            if task.await.unwrap() {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 1);
    }

    proptest! {
        #[test]
        fn prop_nonce_accepted_once(value in "[A-Za-z0-9]{1,16}", offset in -780i64..=780, repeats in 1usize..5) {
            let (_, store) = store();
            let ts = start() + ChronoDuration::seconds(offset);
            prop_assert!(store.use_nonce(&value, ts));
            for _ in 0..repeats {
                prop_assert!(!store.use_nonce(&value, ts));
            }
        }
    }
}
