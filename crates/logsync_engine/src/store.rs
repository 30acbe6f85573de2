//! Buffer of log records awaiting delivery.

use crate::config::{OverflowPolicy, StoreConfig};
use crate::error::{SyncError, SyncResult};
use crate::record::{LogRecord, RecordId};
use bytes::Bytes;
use logsync_protocol::BucketId;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Counters describing the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Records accepted by `append` since creation.
    pub appended: u64,
    /// Records currently pending (not in any bucket).
    pub pending: usize,
    /// Records currently owned by a bucket.
    pub bucketed: usize,
    /// Records discarded by the drop-oldest overflow policy.
    pub discarded: u64,
    /// Records removed after a terminal bucket outcome.
    pub purged: u64,
}

struct StoreInner {
    next_id: u64,
    pending: BTreeMap<RecordId, LogRecord>,
    bucketed: BTreeMap<RecordId, (BucketId, LogRecord)>,
    appended: u64,
    discarded: u64,
    purged: u64,
}

/// Append-only buffer of not-yet-delivered log records.
///
/// Every record is either *pending* (visible to [`drain`](Self::drain)) or
/// *bucketed* (owned by exactly one bucket). Pending records are kept in
/// sequence order, so releasing records restores their original position.
///
/// # Thread Safety
///
/// `append` may be called from any number of threads while the sync side
/// calls `drain`/`commit`/`release`/`purge`. A single mutex guards both
/// partitions, so each call is atomic with respect to the others.
pub struct RecordStore {
    config: StoreConfig,
    inner: Mutex<StoreInner>,
}

impl RecordStore {
    /// Creates an empty store.
    pub fn new(config: StoreConfig) -> SyncResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            inner: Mutex::new(StoreInner {
                next_id: 1,
                pending: BTreeMap::new(),
                bucketed: BTreeMap::new(),
                appended: 0,
                discarded: 0,
                purged: 0,
            }),
        })
    }

    /// Returns the store configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Appends a record and returns its sequence number.
    ///
    /// When the store is full, the overflow policy applies: `Reject` fails
    /// with `CapacityExceeded`; `DropOldest` discards the oldest pending
    /// record and counts it. If every held record is bucketed there is
    /// nothing to discard and the append fails under either policy.
    pub fn append(&self, payload: impl Into<Bytes>) -> SyncResult<RecordId> {
        let mut inner = self.inner.lock();

        if inner.pending.len() + inner.bucketed.len() >= self.config.capacity {
            let evicted = match self.config.overflow {
                OverflowPolicy::Reject => None,
                OverflowPolicy::DropOldest => inner.pending.pop_first(),
            };
            match evicted {
                Some((id, _)) => {
                    inner.discarded += 1;
                    warn!(record = %id, discarded = inner.discarded, "store full, discarded oldest pending record");
                }
                None => {
                    return Err(SyncError::CapacityExceeded {
                        capacity: self.config.capacity,
                    })
                }
            }
        }

        let id = RecordId::new(inner.next_id);
        inner.next_id += 1;
        inner.appended += 1;
        inner.pending.insert(id, LogRecord::new(id, payload.into()));
        Ok(id)
    }

    /// Returns up to `limit` pending records in sequence order without
    /// removing them.
    pub fn drain(&self, limit: usize) -> Vec<LogRecord> {
        self.drain_bounded(limit, None)
    }

    /// Like [`drain`](Self::drain), also stopping before the payload total
    /// would exceed `max_bytes`. The first record is always returned so that
    /// an oversized record still makes progress.
    pub fn drain_bounded(&self, limit: usize, max_bytes: Option<usize>) -> Vec<LogRecord> {
        let inner = self.inner.lock();
        let mut selected = Vec::new();
        let mut total = 0usize;

        for record in inner.pending.values().take(limit) {
            if let Some(max) = max_bytes {
                if !selected.is_empty() && total + record.len() > max {
                    break;
                }
            }
            total += record.len();
            selected.push(record.clone());
        }
        selected
    }

    /// Moves `record_ids` from pending to owned by `bucket_id`.
    ///
    /// All-or-nothing: if any id is not pending (for example because the
    /// overflow policy discarded it since `drain`), nothing changes.
    pub fn commit(&self, bucket_id: BucketId, record_ids: &[RecordId]) -> SyncResult<()> {
        let mut inner = self.inner.lock();

        if let Some(missing) = record_ids.iter().find(|&&id| !inner.pending.contains_key(&id)) {
            return Err(SyncError::UnknownRecord {
                record_id: missing.get(),
            });
        }

        for id in record_ids {
            if let Some(record) = inner.pending.remove(id) {
                inner.bucketed.insert(*id, (bucket_id, record));
            }
        }
        debug!(bucket = %bucket_id, records = record_ids.len(), "committed records to bucket");
        Ok(())
    }

    /// Returns bucketed records to the pending view at their original
    /// position. All-or-nothing, like [`commit`](Self::commit).
    pub fn release(&self, record_ids: &[RecordId]) -> SyncResult<()> {
        let mut inner = self.inner.lock();

        if let Some(missing) = record_ids.iter().find(|&&id| !inner.bucketed.contains_key(&id)) {
            return Err(SyncError::UnknownRecord {
                record_id: missing.get(),
            });
        }

        for id in record_ids {
            if let Some((_, record)) = inner.bucketed.remove(id) {
                inner.pending.insert(*id, record);
            }
        }
        Ok(())
    }

    /// Permanently removes bucketed records after a terminal outcome.
    ///
    /// Returns the number of records removed; ids that are not bucketed are
    /// skipped, so purging twice is harmless.
    pub fn purge(&self, record_ids: &[RecordId]) -> usize {
        let mut inner = self.inner.lock();
        let removed = record_ids
            .iter()
            .filter(|&&id| inner.bucketed.remove(&id).is_some())
            .count();
        inner.purged += removed as u64;
        removed
    }

    /// Bucket owning `record_id`, if it is bucketed.
    pub fn bucket_of(&self, record_id: RecordId) -> Option<BucketId> {
        self.inner.lock().bucketed.get(&record_id).map(|(b, _)| *b)
    }

    /// Returns true if `record_id` is pending.
    pub fn is_pending(&self, record_id: RecordId) -> bool {
        self.inner.lock().pending.contains_key(&record_id)
    }

    /// Number of pending records.
    pub fn pending_len(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Number of records held, pending and bucketed.
    pub fn len(&self) -> usize {
        let inner = self.inner.lock();
        inner.pending.len() + inner.bucketed.len()
    }

    /// Returns true if the store holds no record.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> StoreStats {
        let inner = self.inner.lock();
        StoreStats {
            appended: inner.appended,
            pending: inner.pending.len(),
            bucketed: inner.bucketed.len(),
            discarded: inner.discarded,
            purged: inner.purged,
        }
    }
}

impl std::fmt::Debug for RecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStore")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn store(capacity: usize, overflow: OverflowPolicy) -> RecordStore {
        RecordStore::new(StoreConfig::new(capacity, overflow).unwrap()).unwrap()
    }

    fn ids(records: &[LogRecord]) -> Vec<RecordId> {
        records.iter().map(LogRecord::id).collect()
    }

    #[test]
    fn append_assigns_increasing_ids() {
        let store = store(10, OverflowPolicy::Reject);
        let a = store.append(&b"a"[..]).unwrap();
        let b = store.append(&b"b"[..]).unwrap();
        assert!(a < b);
        assert_eq!(store.pending_len(), 2);
    }

    #[test]
    fn drain_is_fifo_and_non_destructive() {
        let store = store(10, OverflowPolicy::Reject);
        for p in ["a", "b", "c"] {
            store.append(p.as_bytes().to_vec()).unwrap();
        }

        let first = store.drain(2);
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].payload().as_ref(), b"a");
        assert_eq!(first[1].payload().as_ref(), b"b");
        assert_eq!(store.drain(2), first);
        assert_eq!(store.pending_len(), 3);
    }

    #[test]
    fn drain_bounded_by_bytes() {
        let store = store(10, OverflowPolicy::Reject);
        store.append(vec![0u8; 6]).unwrap();
        store.append(vec![0u8; 6]).unwrap();
        store.append(vec![0u8; 1]).unwrap();

        assert_eq!(store.drain_bounded(10, Some(10)).len(), 1);
        assert_eq!(store.drain_bounded(10, Some(12)).len(), 2);
        assert_eq!(store.drain_bounded(10, Some(2)).len(), 1);
    }

    #[test]
    fn commit_hides_records_from_drain() {
        let store = store(10, OverflowPolicy::Reject);
        for p in ["a", "b", "c"] {
            store.append(p.as_bytes().to_vec()).unwrap();
        }
        let batch = store.drain(2);
        store.commit(BucketId::new(1), &ids(&batch)).unwrap();

        let rest = store.drain(10);
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].payload().as_ref(), b"c");
        assert_eq!(store.bucket_of(batch[0].id()), Some(BucketId::new(1)));
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn commit_is_all_or_nothing() {
        let store = store(10, OverflowPolicy::Reject);
        let a = store.append(&b"a"[..]).unwrap();
        let err = store
            .commit(BucketId::new(1), &[a, RecordId::new(99)])
            .unwrap_err();
        assert!(matches!(err, SyncError::UnknownRecord { record_id: 99 }));
        assert!(store.is_pending(a));
    }

    #[test]
    fn release_restores_original_order() {
        let store = store(10, OverflowPolicy::Reject);
        let a = store.append(&b"a"[..]).unwrap();
        let b = store.append(&b"b"[..]).unwrap();
        let c = store.append(&b"c"[..]).unwrap();

        store.commit(BucketId::new(1), &[a, b]).unwrap();
        store.release(&[a, b]).unwrap();

        assert_eq!(ids(&store.drain(10)), vec![a, b, c]);
        let err = store.release(&[a]).unwrap_err();
        assert!(matches!(err, SyncError::UnknownRecord { record_id } if record_id == a.get()));
        assert_eq!(
            err.to_string(),
            format!("record {} is not in the expected store partition", a.get())
        );
    }

    #[test]
    fn purge_removes_bucketed_only_once() {
        let store = store(10, OverflowPolicy::Reject);
        let a = store.append(&b"a"[..]).unwrap();
        let b = store.append(&b"b"[..]).unwrap();
        store.commit(BucketId::new(1), &[a]).unwrap();

        assert_eq!(store.purge(&[a, b]), 1);
        assert_eq!(store.purge(&[a]), 0);
        assert!(store.is_pending(b));
        assert_eq!(store.stats().purged, 1);
    }

    #[test]
    fn reject_policy_fails_when_full() {
        let store = store(2, OverflowPolicy::Reject);
        store.append(&b"a"[..]).unwrap();
        store.append(&b"b"[..]).unwrap();
        let err = store.append(&b"c"[..]).unwrap_err();
        assert!(matches!(err, SyncError::CapacityExceeded { capacity: 2 }));
        assert_eq!(store.stats().discarded, 0);
    }

    #[test]
    fn drop_oldest_discards_and_counts() {
        let store = store(2, OverflowPolicy::DropOldest);
        let a = store.append(&b"a"[..]).unwrap();
        let b = store.append(&b"b"[..]).unwrap();
        let c = store.append(&b"c"[..]).unwrap();

        assert!(!store.is_pending(a));
        assert_eq!(ids(&store.drain(10)), vec![b, c]);
        let stats = store.stats();
        assert_eq!(stats.discarded, 1);
        assert_eq!(stats.appended, 3);
    }

    #[test]
    fn drop_oldest_never_touches_bucketed_records() {
        let store = store(2, OverflowPolicy::DropOldest);
        let a = store.append(&b"a"[..]).unwrap();
        let b = store.append(&b"b"[..]).unwrap();
        store.commit(BucketId::new(1), &[a, b]).unwrap();

        assert!(matches!(
            store.append(&b"c"[..]),
            Err(SyncError::CapacityExceeded { .. })
        ));
        assert_eq!(store.bucket_of(a), Some(BucketId::new(1)));
    }

    #[test]
    fn concurrent_appends() {
        let store = Arc::new(store(10_000, OverflowPolicy::Reject));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for i in 0..250u32 {
                        store.append(vec![t as u8, i as u8]).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let stats = store.stats();
        assert_eq!(stats.appended, 1000);
        assert_eq!(stats.pending, 1000);
    }
}
