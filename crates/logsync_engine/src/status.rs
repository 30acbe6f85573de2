//! Persistent endpoint status.
//!
//! A small block of identity and bookkeeping state that survives restarts:
//! registration flags, key and profile digests, the access token, and the
//! event sequence number. Stored as CBOR through a [`StatusStorage`].

use crate::error::{SyncError, SyncResult};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Length of a SHA-1 digest.
pub const DIGEST_LEN: usize = 20;

/// A SHA-1 digest as stored in the status block.
pub type Digest = [u8; DIGEST_LEN];

/// Endpoint identity and bookkeeping state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointStatus {
    /// Whether the server has registered this endpoint.
    pub registered: bool,
    /// Whether the endpoint is attached to a user.
    pub attached_to_user: bool,
    event_sequence_number: u32,
    /// Digest of the endpoint's public key.
    pub endpoint_key_hash: Digest,
    /// Digest of the last profile sent.
    pub profile_hash: Digest,
    /// Access token issued to the endpoint.
    pub access_token: Option<String>,
}

impl EndpointStatus {
    /// Creates a default status: unregistered, zero digests, no token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current event sequence number.
    pub fn event_sequence_number(&self) -> u32 {
        self.event_sequence_number
    }

    /// Moves the event sequence number forward to `value`.
    ///
    /// The number never decreases; a smaller value is a `Status` error and
    /// leaves the status unchanged.
    pub fn set_event_sequence_number(&mut self, value: u32) -> SyncResult<()> {
        if value < self.event_sequence_number {
            return Err(SyncError::Status(format!(
                "event sequence number may not go back from {} to {value}",
                self.event_sequence_number
            )));
        }
        self.event_sequence_number = value;
        Ok(())
    }

    /// Reserves and returns the next event sequence number.
    pub fn next_event_sequence_number(&mut self) -> SyncResult<u32> {
        let next = self
            .event_sequence_number
            .checked_add(1)
            .ok_or_else(|| SyncError::Status("event sequence number exhausted".into()))?;
        self.event_sequence_number = next;
        Ok(next)
    }

    /// Encodes to CBOR.
    pub fn encode(&self) -> SyncResult<Vec<u8>> {
        let mut bytes = Vec::new();
        ciborium::ser::into_writer(self, &mut bytes)
            .map_err(|e| SyncError::Status(format!("encoding status: {e}")))?;
        Ok(bytes)
    }

    /// Decodes from CBOR. Fails on any malformed input.
    pub fn decode(bytes: &[u8]) -> SyncResult<Self> {
        ciborium::de::from_reader(bytes)
            .map_err(|e| SyncError::Status(format!("decoding status: {e}")))
    }

    /// Loads from `storage`.
    ///
    /// A missing, empty or unreadable blob yields the default status; only
    /// a storage failure is an error.
    pub fn load(storage: &dyn StatusStorage) -> SyncResult<Self> {
        let Some(bytes) = storage.read()? else {
            debug!("no stored endpoint status, starting from defaults");
            return Ok(Self::default());
        };
        if bytes.is_empty() {
            return Ok(Self::default());
        }
        match Self::decode(&bytes) {
            Ok(status) => Ok(status),
            Err(e) => {
                warn!(error = %e, len = bytes.len(), "stored endpoint status unreadable, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Saves to `storage`.
    pub fn save(&self, storage: &dyn StatusStorage) -> SyncResult<()> {
        storage.write(&self.encode()?)
    }
}

/// Where the encoded status block lives.
pub trait StatusStorage: Send + Sync {
    /// Reads the stored blob, or `None` if nothing was ever written.
    fn read(&self) -> SyncResult<Option<Vec<u8>>>;

    /// Replaces the stored blob.
    fn write(&self, bytes: &[u8]) -> SyncResult<()>;
}

/// Status storage held in memory.
#[derive(Debug, Default)]
pub struct MemoryStatusStorage {
    blob: RwLock<Option<Vec<u8>>>,
}

impl MemoryStatusStorage {
    /// Creates empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates storage holding `bytes`, for recovery tests.
    pub fn with_data(bytes: Vec<u8>) -> Self {
        Self {
            blob: RwLock::new(Some(bytes)),
        }
    }

    /// Copy of the stored blob.
    pub fn data(&self) -> Option<Vec<u8>> {
        self.blob.read().clone()
    }
}

impl StatusStorage for MemoryStatusStorage {
    fn read(&self) -> SyncResult<Option<Vec<u8>>> {
        Ok(self.blob.read().clone())
    }

    fn write(&self, bytes: &[u8]) -> SyncResult<()> {
        *self.blob.write() = Some(bytes.to_vec());
        Ok(())
    }
}

/// Status storage in a single file, replaced atomically on write.
#[derive(Debug, Clone)]
pub struct FileStatusStorage {
    path: PathBuf,
}

impl FileStatusStorage {
    /// Uses the file at `path`. The file need not exist yet.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the status file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl StatusStorage for FileStatusStorage {
    fn read(&self) -> SyncResult<Option<Vec<u8>>> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, bytes: &[u8]) -> SyncResult<()> {
        let temp_path = self.temp_path();
        let mut file = File::create(&temp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, &self.path)?;
        Ok(())
    }
}
