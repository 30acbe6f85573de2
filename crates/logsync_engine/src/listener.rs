//! Delivery notifications for the application.

use crate::record::RecordId;
use logsync_protocol::BucketId;

/// A bucket that exhausted its retry ceiling.
///
/// Reported exactly once per bucket; its records have been removed from the
/// store and will not be sent again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryDropped {
    /// The dropped bucket.
    pub bucket_id: BucketId,
    /// Sequence numbers of the lost records.
    pub record_ids: Vec<RecordId>,
    /// How many times the bucket was sent.
    pub attempts: u32,
}

/// Observer of bucket outcomes.
///
/// Called synchronously from the sync-driving context; implementations
/// should return quickly.
pub trait DeliveryListener: Send + Sync {
    /// The collector acknowledged a bucket.
    fn on_delivered(&self, _bucket_id: BucketId, _record_count: usize) {}

    /// A bucket failed and was requeued; `retry` is its retry counter.
    fn on_failed(&self, _bucket_id: BucketId, _retry: u32) {}

    /// A bucket was dropped.
    fn on_dropped(&self, _event: &DeliveryDropped) {}
}
