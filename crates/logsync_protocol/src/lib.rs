//! # Logsync Protocol
//!
//! Wire types and CBOR codecs for endpoint log synchronization.
//!
//! This crate provides:
//! - `LogSyncRequest` / `LogSyncResponse` for the log data family
//! - `DeliveryConfigUpdate`, the server-pushed batching parameters
//! - `SyncFrame` for multiplexing several data families into one exchange
//!
//! This is a pure protocol crate with no I/O operations.
//!
//! ## Decoding rules
//!
//! Every message is a CBOR map with text keys. Decoding is strict: a
//! missing field, a field of the wrong type, an unknown code or trailing
//! bytes rejects the whole message. Unknown keys are ignored so that newer
//! servers can add fields.
//!
//! ```
//! use bytes::Bytes;
//! use logsync_protocol::{BucketId, LogBucket, LogSyncRequest};
//!
//! let request = LogSyncRequest::new(vec![LogBucket::new(
//!     BucketId::new(1),
//!     vec![Bytes::from_static(b"boot ok")],
//! )]);
//! let bytes = request.encode().unwrap();
//! assert_eq!(LogSyncRequest::decode(&bytes).unwrap(), request);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config_update;
mod error;
mod frame;
mod messages;
mod value;

pub use config_update::DeliveryConfigUpdate;
pub use error::{ProtocolError, ProtocolResult};
pub use frame::{DataFamily, FrameSection, SyncFrame};
pub use messages::{BucketId, BucketResult, DeliveryOutcome, LogBucket, LogSyncRequest, LogSyncResponse};
