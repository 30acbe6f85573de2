//! Buckets and their delivery state machine.

use crate::record::{LogRecord, RecordId};
use logsync_protocol::{BucketId, LogBucket};
use std::time::Instant;

/// Delivery state of a bucket.
///
/// ```text
/// Pending ──send──▶ InFlight ──▶ Delivered
///    ▲                 │
///    └──── requeue ── Failed ──▶ Dropped
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BucketState {
    /// Records selected, waiting for a sync opportunity.
    Pending,
    /// Included in the request currently awaiting a response.
    InFlight,
    /// Acknowledged by the collector.
    Delivered,
    /// Rejected or unresolved; about to be requeued or dropped.
    Failed,
    /// Retry ceiling exhausted; records were discarded.
    Dropped,
}

impl BucketState {
    /// Returns true for states a bucket never leaves.
    pub fn is_terminal(&self) -> bool {
        matches!(self, BucketState::Delivered | BucketState::Dropped)
    }

    /// Returns true if `self → next` is a legal transition.
    pub fn can_transition_to(&self, next: BucketState) -> bool {
        use BucketState::*;
        matches!(
            (self, next),
            (Pending, InFlight)
                | (InFlight, Delivered)
                | (InFlight, Failed)
                | (Failed, Pending)
                | (Failed, Dropped)
        )
    }
}

/// An immutable set of records with a stable id and a delivery state.
///
/// The record set is fixed at creation; resends carry the same id and the
/// same records.
#[derive(Debug, Clone)]
pub struct Bucket {
    id: BucketId,
    records: Vec<LogRecord>,
    state: BucketState,
    created_at: Instant,
    eligible_at: Instant,
    attempts: u32,
    failures: u32,
}

impl Bucket {
    pub(crate) fn new(id: BucketId, records: Vec<LogRecord>, now: Instant) -> Self {
        Self {
            id,
            records,
            state: BucketState::Pending,
            created_at: now,
            eligible_at: now,
            attempts: 0,
            failures: 0,
        }
    }

    /// Bucket id.
    pub fn id(&self) -> BucketId {
        self.id
    }

    /// Records, in sequence order.
    pub fn records(&self) -> &[LogRecord] {
        &self.records
    }

    /// Sequence numbers of the records.
    pub fn record_ids(&self) -> Vec<RecordId> {
        self.records.iter().map(LogRecord::id).collect()
    }

    /// Current state.
    pub fn state(&self) -> BucketState {
        self.state
    }

    /// When the bucket was created.
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Earliest instant at which a pending bucket may be sent.
    pub fn eligible_at(&self) -> Instant {
        self.eligible_at
    }

    /// Number of times the bucket was sent.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Number of failed attempts (the retry counter).
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Returns true if the bucket is pending and its backoff has elapsed.
    pub fn is_ready(&self, now: Instant) -> bool {
        self.state == BucketState::Pending && self.eligible_at <= now
    }

    /// Wire form of the bucket.
    pub fn to_wire(&self) -> LogBucket {
        LogBucket::new(
            self.id,
            self.records.iter().map(|r| r.payload().clone()).collect(),
        )
    }

    pub(crate) fn mark_in_flight(&mut self) {
        self.transition(BucketState::InFlight);
        self.attempts += 1;
    }

    pub(crate) fn mark_delivered(&mut self) {
        self.transition(BucketState::Delivered);
    }

    pub(crate) fn mark_failed(&mut self) {
        self.transition(BucketState::Failed);
        self.failures += 1;
    }

    pub(crate) fn requeue(&mut self, eligible_at: Instant) {
        self.transition(BucketState::Pending);
        self.eligible_at = eligible_at;
    }

    pub(crate) fn mark_dropped(&mut self) {
        self.transition(BucketState::Dropped);
    }

    fn transition(&mut self, next: BucketState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal bucket transition {:?} -> {:?}",
            self.state,
            next
        );
        self.state = next;
    }
}
