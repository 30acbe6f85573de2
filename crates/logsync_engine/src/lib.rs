//! # Logsync Engine
//!
//! Bucketed, at-least-once delivery of endpoint log records.
//!
//! This crate provides:
//! - `RecordStore`, the bounded buffer producers append to
//! - `DeliveryProcessor`, the bucket state machine
//!   (pending → in flight → delivered, or failed → pending / dropped)
//! - `LogTransport`, the log family's `SyncTransport`
//! - `SyncCoordinator`, a reference driver with channel failover
//! - `EndpointStatus` persistence
//!
//! ## Delivery model
//!
//! Records are cut into buckets when a request is built. A bucket keeps
//! its id and its records across every resend, so the server can
//! deduplicate. Exactly one request is in flight at a time; a channel
//! failure or a lost response sends the whole in-flight set down the
//! resend path. Nothing is removed from the store until the server
//! acknowledges it or its bucket runs out of retries.
//!
//! ## Key Invariants
//!
//! - A record is delivered at least once or reported as dropped
//! - Bucket ids only grow and survive retries unchanged
//! - At most one request is outstanding per transport
//! - Applying the same response twice is a no-op the second time
//!
//! ```
//! use std::sync::Arc;
//! use logsync_engine::{DeliveryConfig, DeliveryProcessor, OverflowPolicy, RecordStore, StoreConfig};
//! use logsync_protocol::{BucketId, BucketResult, LogSyncResponse};
//!
//! let store = Arc::new(RecordStore::new(StoreConfig::new(64, OverflowPolicy::Reject)?)?);
//! store.append(&b"boot ok"[..])?;
//!
//! let mut processor = DeliveryProcessor::new(Arc::clone(&store), DeliveryConfig::new(16, 3)?)?;
//! let request = processor.build_request()?.expect("one pending record");
//! assert_eq!(request.bucket_ids(), vec![BucketId::new(1)]);
//!
//! processor.apply_response(&LogSyncResponse::new(vec![BucketResult::delivered(BucketId::new(1))]))?;
//! assert!(store.is_empty());
//! # Ok::<(), logsync_engine::SyncError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod bucket;
mod clock;
mod config;
mod coordinator;
mod error;
mod listener;
mod processor;
mod record;
mod status;
mod store;
mod transport;

pub use bucket::{Bucket, BucketState};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    DeliveryConfig, EngineConfig, OverflowPolicy, RawBackoff, RawDeliveryConfig, RetryBackoff,
    StoreConfig,
};
pub use coordinator::{CoordinatorStats, SyncChannel, SyncCoordinator, SyncReport};
pub use error::{SyncError, SyncResult};
pub use listener::{DeliveryDropped, DeliveryListener};
pub use processor::{DeliveryProcessor, DeliveryStats, ResponseSummary};
pub use record::{LogRecord, RecordId};
pub use status::{
    Digest, EndpointStatus, FileStatusStorage, MemoryStatusStorage, StatusStorage, DIGEST_LEN,
};
pub use store::{RecordStore, StoreStats};
pub use transport::{BindError, LogTransport, SyncTransport};
