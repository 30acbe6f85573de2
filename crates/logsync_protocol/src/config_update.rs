//! Server-pushed delivery configuration block.

use crate::error::ProtocolResult;
use crate::value::{from_cbor, int, text, to_cbor, Fields};
use ciborium::value::Value;

/// New batching limits sent by the collector.
///
/// Fields are signed so that a non-positive value survives decoding and is
/// rejected by configuration validation instead. Absent fields leave the
/// current setting unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryConfigUpdate {
    /// Maximum number of records per bucket.
    pub max_bucket_size: Option<i64>,
    /// Maximum payload bytes per bucket.
    pub max_bucket_bytes: Option<i64>,
    /// Maximum number of buckets per request.
    pub max_in_flight_buckets: Option<i64>,
    /// Number of resends allowed before a bucket is dropped.
    pub retry_ceiling: Option<i64>,
}

impl DeliveryConfigUpdate {
    /// Returns true if the update changes nothing.
    pub fn is_empty(&self) -> bool {
        self.max_bucket_size.is_none()
            && self.max_bucket_bytes.is_none()
            && self.max_in_flight_buckets.is_none()
            && self.retry_ceiling.is_none()
    }

    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        let fields = [
            ("max_bucket_size", self.max_bucket_size),
            ("max_bucket_bytes", self.max_bucket_bytes),
            ("max_in_flight_buckets", self.max_in_flight_buckets),
            ("retry_ceiling", self.retry_ceiling),
        ];
        let pairs = fields
            .iter()
            .filter_map(|(name, v)| v.map(|v| (text(name), int(v))))
            .collect();
        to_cbor(&Value::Map(pairs))
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        let value = from_cbor(bytes)?;
        let fields = Fields::of(&value, "config update")?;

        Ok(Self {
            max_bucket_size: fields.optional_i64("max_bucket_size")?,
            max_bucket_bytes: fields.optional_i64("max_bucket_bytes")?,
            max_in_flight_buckets: fields.optional_i64("max_in_flight_buckets")?,
            retry_ceiling: fields.optional_i64("retry_ceiling")?,
        })
    }
}
