//! Entity contract and record metadata.
//!
//! # Responsibility
//! - Define the metadata every persisted record carries (id + timestamps +
//!   soft-delete marker).
//! - Provide the process-wide monotonic timestamp source used for writes.
//!
//! # Invariants
//! - `id` is immutable once assigned; repositories only populate unassigned ids.
//! - `deleted_at.is_some()` is the single source of truth for tombstone state.
//! - Timestamps produced by `now_millis()` strictly increase within a process.

use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Display};
use std::hash::Hash;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static LAST_TIMESTAMP_MS: AtomicI64 = AtomicI64::new(0);

/// Returns epoch milliseconds, strictly greater than any previous return value
/// in this process.
pub fn now_millis() -> i64 {
    let wall = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0);

    let mut last = LAST_TIMESTAMP_MS.load(Ordering::Relaxed);
    loop {
        let next = wall.max(last.saturating_add(1));
        match LAST_TIMESTAMP_MS.compare_exchange_weak(
            last,
            next,
            Ordering::AcqRel,
            Ordering::Relaxed,
        ) {
            Ok(_) => return next,
            Err(observed) => last = observed,
        }
    }
}

/// Key contract shared by every entity identifier type.
pub trait EntityKey: Clone + Eq + Hash + Debug + Display + Send + Sync + 'static {}

impl<T> EntityKey for T where T: Clone + Eq + Hash + Debug + Display + Send + Sync + 'static {}

/// Identity and lifecycle columns carried by every record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMeta<K> {
    /// Stable identifier. An "unassigned" value is replaced on create.
    pub id: K,
    /// Epoch milliseconds of insertion.
    pub created_at: i64,
    /// Epoch milliseconds of the last write; also the optimistic-concurrency
    /// token checked by updates.
    pub updated_at: i64,
    /// Soft-delete tombstone timestamp.
    pub deleted_at: Option<i64>,
}

impl<K> RecordMeta<K> {
    /// Metadata for a record that has not been persisted yet.
    pub fn new(id: K) -> Self {
        Self {
            id,
            created_at: 0,
            updated_at: 0,
            deleted_at: None,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Returns whether this record is visible to default reads.
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }
}

impl<K: Default> Default for RecordMeta<K> {
    fn default() -> Self {
        Self::new(K::default())
    }
}

/// A domain record managed by a repository.
///
/// Implementors expose their metadata; everything else about the record is
/// opaque to the generic layers.
pub trait Entity: Clone + Send + Sync + 'static {
    type Key: EntityKey;

    /// Human-readable entity name used in errors and logs, e.g. `widget`.
    const NAME: &'static str;

    fn meta(&self) -> &RecordMeta<Self::Key>;
    fn meta_mut(&mut self) -> &mut RecordMeta<Self::Key>;

    fn id(&self) -> &Self::Key {
        &self.meta().id
    }
}

#[cfg(test)]
mod tests {
    use super::{now_millis, RecordMeta};
    use std::collections::HashSet;
    use std::thread;

    #[test]
    fn now_millis_is_strictly_increasing() {
        let mut previous = now_millis();
        for _ in 0..1_000 {
            let current = now_millis();
            assert!(current > previous);
            previous = current;
        }
    }

    #[test]
    fn now_millis_never_repeats_across_threads() {
        let handles: Vec<_> = (0..4)
            .map(|_| thread::spawn(|| (0..250).map(|_| now_millis()).collect::<Vec<_>>()))
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for value in handle.join().unwrap() {
                assert!(seen.insert(value), "duplicate timestamp {value}");
            }
        }
    }

    #[test]
    fn fresh_meta_is_active() {
        let meta = RecordMeta::new(7_i64);
        assert!(meta.is_active());
        assert!(!meta.is_deleted());
        assert_eq!(meta.created_at, 0);
    }
}
