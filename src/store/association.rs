//! Per-endpoint association tables.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::debug;

use crate::core::{ASSOCIATION_PURGE_INTERVAL, Clock, SystemClock};
use crate::crypto::Association;

/// Associations shared with one remote endpoint, keyed by handle.
#[derive(Debug, Clone, Default)]
pub struct EndpointAssociations {
    by_handle: HashMap<String, Association>,
}

impl EndpointAssociations {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace by handle.
    pub fn insert(&mut self, association: Association) {
        self.by_handle
            .insert(association.handle().to_string(), association);
    }

    /// Non-expired association with the greatest remaining lifetime.
    pub fn best(&self, now: DateTime<Utc>) -> Option<&Association> {
        self.best_matching(now, |_| true)
    }

    /// Like [`EndpointAssociations::best`], considering only associations
    /// accepted by `filter`.
    pub fn best_matching<F>(&self, now: DateTime<Utc>, filter: F) -> Option<&Association>
    where
        F: Fn(&Association) -> bool,
    {
        self.by_handle
            .values()
            .filter(|a| !a.is_expired(now) && filter(a))
            .max_by(|a, b| {
                a.expires()
                    .cmp(&b.expires())
                    .then_with(|| b.handle().cmp(a.handle()))
            })
    }

    /// Non-expired association named `handle`.
    pub fn get(&self, handle: &str, now: DateTime<Utc>) -> Option<&Association> {
        self.by_handle.get(handle).filter(|a| !a.is_expired(now))
    }

    /// Remove by handle, reporting whether it was present.
    pub fn remove(&mut self, handle: &str) -> bool {
        self.by_handle.remove(handle).is_some()
    }

    /// Drop expired associations, returning how many were dropped.
    pub fn clear_expired(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.by_handle.len();
        self.by_handle.retain(|_, a| !a.is_expired(now));
        before - self.by_handle.len()
    }

    /// Number of stored associations, expired ones included.
    pub fn len(&self) -> usize {
        self.by_handle.len()
    }

    /// Check if the table is empty.
    pub fn is_empty(&self) -> bool {
        self.by_handle.is_empty()
    }
}

struct AssociationTables<K> {
    by_endpoint: HashMap<K, EndpointAssociations>,
    inserts_since_purge: usize,
}

impl<K: Eq + Hash> AssociationTables<K> {
    fn purge(&mut self, now: DateTime<Utc>) -> usize {
        let dropped = self
            .by_endpoint
            .values_mut()
            .map(|table| table.clear_expired(now))
            .sum();
        self.by_endpoint.retain(|_, table| !table.is_empty());
        self.inserts_since_purge = 0;
        dropped
    }
}

/// Associations of many endpoints.
///
/// One coarse mutex guards every table; contention is low and each critical
/// section only copies a result out. Readers receive clones, so a stored
/// association is visible entirely or not at all.
///
/// Every [`ASSOCIATION_PURGE_INTERVAL`] inserts, expired associations are
/// dropped before the next one is stored.
pub struct AssociationStore<K = String> {
    tables: Mutex<AssociationTables<K>>,
    clock: Arc<dyn Clock>,
}

impl<K> AssociationStore<K>
where
    K: Eq + Hash,
{
    /// Create an empty store reading time from `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            tables: Mutex::new(AssociationTables {
                by_endpoint: HashMap::new(),
                inserts_since_purge: 0,
            }),
            clock,
        }
    }

    /// Current time according to the store's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Insert or replace an association, creating the endpoint's table on first use.
    pub fn store_association(&self, endpoint: K, association: Association) {
        debug!(handle = association.handle(), "storing association");
        let mut tables = self.tables.lock();
        if tables.inserts_since_purge >= ASSOCIATION_PURGE_INTERVAL {
            let dropped = tables.purge(self.clock.now());
            if dropped > 0 {
                debug!(dropped, "purged expired associations");
            }
        }
        tables.by_endpoint.entry(endpoint).or_default().insert(association);
        tables.inserts_since_purge += 1;
    }

    /// Best association for `endpoint`, or `None` when every one has expired.
    pub fn get_association<Q>(&self, endpoint: &Q) -> Option<Association>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.get_association_matching(endpoint, |_| true)
    }

    /// Best association for `endpoint` among those accepted by `filter`.
    pub fn get_association_matching<Q, F>(&self, endpoint: &Q, filter: F) -> Option<Association>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
        F: Fn(&Association) -> bool,
    {
        let now = self.clock.now();
        self.tables
            .lock()
            .by_endpoint
            .get(endpoint)
            .and_then(|table| table.best_matching(now, filter).cloned())
    }

    /// Association `handle` of `endpoint`; `None` when absent or expired.
    pub fn get_association_by_handle<Q>(&self, endpoint: &Q, handle: &str) -> Option<Association>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let now = self.clock.now();
        self.tables
            .lock()
            .by_endpoint
            .get(endpoint)
            .and_then(|table| table.get(handle, now).cloned())
    }

    /// Remove association `handle` of `endpoint`, reporting whether it existed.
    pub fn remove_association<Q>(&self, endpoint: &Q, handle: &str) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let removed = self
            .tables
            .lock()
            .by_endpoint
            .get_mut(endpoint)
            .is_some_and(|table| table.remove(handle));
        if removed {
            debug!(handle, "removed association");
        }
        removed
    }

    /// Drop expired associations of every endpoint, returning how many were dropped.
    pub fn clear_expired(&self) -> usize {
        let now = self.clock.now();
        self.tables.lock().purge(now)
    }

    /// Number of endpoints with at least one stored association.
    pub fn endpoint_count(&self) -> usize {
        self.tables.lock().by_endpoint.len()
    }

    /// Number of stored associations across every endpoint, expired ones included.
    pub fn len(&self) -> usize {
        self.tables
            .lock()
            .by_endpoint
            .values()
            .map(EndpointAssociations::len)
            .sum()
    }

    /// Check if no association is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K: Eq + Hash> Default for AssociationStore<K> {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl<K> std::fmt::Debug for AssociationStore<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssociationStore")
            .field("endpoints", &self.tables.lock().by_endpoint.len())
            .finish_non_exhaustive()
    }
}

/// Provider-side partition of associations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssociationUse {
    /// Shared with relying parties through associate requests.
    Smart,
    /// Private to the provider; verified through check_authentication.
    Dumb,
}
