//! Log records as held by the record store.

use bytes::Bytes;
use std::fmt;

/// Local sequence number of a record, assigned on append.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordId(u64);

impl RecordId {
    /// Creates a record id from its raw value.
    pub const fn new(seq: u64) -> Self {
        Self(seq)
    }

    /// Returns the raw sequence number.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// An immutable log record: opaque payload plus its sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    id: RecordId,
    payload: Bytes,
}

impl LogRecord {
    pub(crate) fn new(id: RecordId, payload: Bytes) -> Self {
        Self { id, payload }
    }

    /// Sequence number.
    pub fn id(&self) -> RecordId {
        self.id
    }

    /// Opaque payload.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Payload size in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Returns true if the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}
