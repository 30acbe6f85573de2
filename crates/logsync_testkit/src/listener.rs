//! A delivery listener that records every event.

use logsync_engine::{DeliveryDropped, DeliveryListener};
use logsync_protocol::BucketId;
use parking_lot::Mutex;
use std::sync::Arc;

/// One listener callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerEvent {
    /// A bucket was acknowledged.
    Delivered {
        /// Bucket id.
        bucket_id: BucketId,
        /// Records it carried.
        record_count: usize,
    },
    /// A bucket was requeued.
    Failed {
        /// Bucket id.
        bucket_id: BucketId,
        /// Retry counter after the failure.
        retry: u32,
    },
    /// A bucket ran out of retries.
    Dropped(DeliveryDropped),
}

/// Records listener callbacks in order.
#[derive(Debug, Default)]
pub struct RecordingListener {
    events: Mutex<Vec<ListenerEvent>>,
}

impl RecordingListener {
    /// Creates a shareable listener.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// All events so far.
    pub fn events(&self) -> Vec<ListenerEvent> {
        self.events.lock().clone()
    }

    /// Delivered bucket ids, in order.
    pub fn delivered(&self) -> Vec<BucketId> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                ListenerEvent::Delivered { bucket_id, .. } => Some(*bucket_id),
                _ => None,
            })
            .collect()
    }

    /// Records reported delivered.
    pub fn delivered_records(&self) -> usize {
        self.events
            .lock()
            .iter()
            .map(|e| match e {
                ListenerEvent::Delivered { record_count, .. } => *record_count,
                _ => 0,
            })
            .sum()
    }

    /// Drop events, in order.
    pub fn dropped(&self) -> Vec<DeliveryDropped> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                ListenerEvent::Dropped(event) => Some(event.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of requeues.
    pub fn failures(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| matches!(e, ListenerEvent::Failed { .. }))
            .count()
    }
}

impl DeliveryListener for RecordingListener {
    fn on_delivered(&self, bucket_id: BucketId, record_count: usize) {
        self.events.lock().push(ListenerEvent::Delivered {
            bucket_id,
            record_count,
        });
    }

    fn on_failed(&self, bucket_id: BucketId, retry: u32) {
        self.events
            .lock()
            .push(ListenerEvent::Failed { bucket_id, retry });
    }

    fn on_dropped(&self, event: &DeliveryDropped) {
        self.events.lock().push(ListenerEvent::Dropped(event.clone()));
    }
}
