//! Log data-family messages.

use crate::error::{ProtocolError, ProtocolResult};
use crate::value::{code, from_cbor, text, to_cbor, uint, Fields};
use bytes::Bytes;
use ciborium::value::Value;
use std::collections::HashSet;
use std::fmt;

/// Identifier of a bucket of log records.
///
/// Assigned once by the delivery processor and never reused; a resend of a
/// failed bucket carries the same id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BucketId(u64);

impl BucketId {
    /// Creates a bucket id from its raw value.
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw value.
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Returns the id following this one.
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for BucketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u64> for BucketId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// A bucket as it travels on the wire: its id and the opaque record payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogBucket {
    /// Bucket id.
    pub bucket_id: BucketId,
    /// Record payloads, in append order.
    pub records: Vec<Bytes>,
}

impl LogBucket {
    /// Creates a new wire bucket.
    pub fn new(bucket_id: BucketId, records: Vec<Bytes>) -> Self {
        Self { bucket_id, records }
    }

    /// Total payload size in bytes.
    pub fn payload_len(&self) -> usize {
        self.records.iter().map(Bytes::len).sum()
    }

    fn to_value(&self) -> Value {
        let records = self
            .records
            .iter()
            .map(|r| Value::Bytes(r.to_vec()))
            .collect();
        Value::Map(vec![
            (text("bucket_id"), uint(self.bucket_id.get())),
            (text("records"), Value::Array(records)),
        ])
    }

    fn from_value(value: &Value) -> ProtocolResult<Self> {
        let fields = Fields::of(value, "bucket")?;
        let bucket_id = BucketId::new(fields.u64("bucket_id")?);
        let records = fields
            .array("records")?
            .iter()
            .map(|v| {
                v.as_bytes()
                    .map(|b| Bytes::copy_from_slice(b))
                    .ok_or_else(|| ProtocolError::invalid_structure("bucket: record is not bytes"))
            })
            .collect::<ProtocolResult<Vec<_>>>()?;
        Ok(Self { bucket_id, records })
    }
}

/// Outbound log sync request: every bucket in the current in-flight set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogSyncRequest {
    /// Buckets, in ascending id order as built by the processor.
    pub buckets: Vec<LogBucket>,
}

impl LogSyncRequest {
    /// Creates a new request.
    pub fn new(buckets: Vec<LogBucket>) -> Self {
        Self { buckets }
    }

    /// Returns true if the request carries no bucket.
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Ids of the buckets carried by this request.
    pub fn bucket_ids(&self) -> Vec<BucketId> {
        self.buckets.iter().map(|b| b.bucket_id).collect()
    }

    /// Total number of records across all buckets.
    pub fn record_count(&self) -> usize {
        self.buckets.iter().map(|b| b.records.len()).sum()
    }

    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        let buckets = self.buckets.iter().map(LogBucket::to_value).collect();
        to_cbor(&Value::Map(vec![(text("buckets"), Value::Array(buckets))]))
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        let value = from_cbor(bytes)?;
        let fields = Fields::of(&value, "log request")?;

        let buckets = fields
            .array("buckets")?
            .iter()
            .map(LogBucket::from_value)
            .collect::<ProtocolResult<Vec<_>>>()?;
        ensure_unique(buckets.iter().map(|b| b.bucket_id))?;

        Ok(Self { buckets })
    }
}

/// Server verdict for one bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryOutcome {
    /// The collector stored every record of the bucket.
    Delivered,
    /// The collector could not store the bucket; it should be resent.
    Failed,
}

impl DeliveryOutcome {
    /// Converts to a numeric code for CBOR encoding.
    pub fn to_code(&self) -> u8 {
        match self {
            DeliveryOutcome::Delivered => 0,
            DeliveryOutcome::Failed => 1,
        }
    }

    /// Converts from a numeric code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(DeliveryOutcome::Delivered),
            1 => Some(DeliveryOutcome::Failed),
            _ => None,
        }
    }
}

/// Per-bucket entry of a [`LogSyncResponse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketResult {
    /// Bucket the verdict applies to.
    pub bucket_id: BucketId,
    /// The verdict.
    pub outcome: DeliveryOutcome,
}

impl BucketResult {
    /// A delivered verdict.
    pub fn delivered(bucket_id: BucketId) -> Self {
        Self {
            bucket_id,
            outcome: DeliveryOutcome::Delivered,
        }
    }

    /// A failed verdict.
    pub fn failed(bucket_id: BucketId) -> Self {
        Self {
            bucket_id,
            outcome: DeliveryOutcome::Failed,
        }
    }

    fn to_value(self) -> Value {
        Value::Map(vec![
            (text("bucket_id"), uint(self.bucket_id.get())),
            (text("outcome"), uint(u64::from(self.outcome.to_code()))),
        ])
    }

    fn from_value(value: &Value) -> ProtocolResult<Self> {
        let fields = Fields::of(value, "bucket result")?;
        let bucket_id = BucketId::new(fields.u64("bucket_id")?);
        let raw = code(fields.required("outcome")?, "outcome")?;
        let outcome = u8::try_from(raw)
            .ok()
            .and_then(DeliveryOutcome::from_code)
            .ok_or(ProtocolError::UnknownCode {
                kind: "outcome",
                code: raw,
            })?;
        Ok(Self { bucket_id, outcome })
    }
}

/// Server reply to a [`LogSyncRequest`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogSyncResponse {
    /// Verdicts, in the order the server produced them.
    pub results: Vec<BucketResult>,
    /// Opaque delivery configuration block, handed to the processor as is.
    pub config_update: Option<Vec<u8>>,
}

impl LogSyncResponse {
    /// Creates a response without a configuration block.
    pub fn new(results: Vec<BucketResult>) -> Self {
        Self {
            results,
            config_update: None,
        }
    }

    /// Attaches an opaque configuration block.
    pub fn with_config_update(mut self, block: Vec<u8>) -> Self {
        self.config_update = Some(block);
        self
    }

    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        let results = self.results.iter().map(|r| r.to_value()).collect();
        let mut pairs = vec![(text("results"), Value::Array(results))];
        if let Some(ref block) = self.config_update {
            pairs.push((text("config"), Value::Bytes(block.clone())));
        }
        to_cbor(&Value::Map(pairs))
    }

    /// Decodes from CBOR.
    ///
    /// A bucket that appears twice rejects the whole response.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        let value = from_cbor(bytes)?;
        let fields = Fields::of(&value, "log response")?;

        let results = fields
            .array("results")?
            .iter()
            .map(BucketResult::from_value)
            .collect::<ProtocolResult<Vec<_>>>()?;
        ensure_unique(results.iter().map(|r| r.bucket_id))?;

        let config_update = fields.optional_bytes("config")?.map(<[u8]>::to_vec);

        Ok(Self {
            results,
            config_update,
        })
    }

    /// Checks the in-memory form for repeated bucket ids.
    pub fn validate(&self) -> ProtocolResult<()> {
        ensure_unique(self.results.iter().map(|r| r.bucket_id))
    }
}

fn ensure_unique(ids: impl Iterator<Item = BucketId>) -> ProtocolResult<()> {
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(id) {
            return Err(ProtocolError::DuplicateBucket {
                bucket_id: id.get(),
            });
        }
    }
    Ok(())
}
