//! In-memory log collector standing in for the server.

use bytes::Bytes;
use logsync_engine::{SyncChannel, SyncError, SyncResult};
use logsync_protocol::{
    BucketId, BucketResult, DataFamily, DeliveryConfigUpdate, LogSyncRequest, LogSyncResponse,
    SyncFrame,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

/// What the collector does with one log request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Accept every bucket and acknowledge it.
    Deliver,
    /// Reject every bucket.
    Fail,
    /// Accept every bucket, then lose the reply.
    LoseResponse,
    /// Lose the request before the collector sees it.
    LoseRequest,
    /// Accept the request and reply with no results.
    Ignore,
}

#[derive(Debug, Default)]
struct CollectorState {
    script: VecDeque<Verdict>,
    accepted: BTreeMap<BucketId, Vec<Bytes>>,
    acceptances: u64,
    requests: u64,
    pending_update: Option<DeliveryConfigUpdate>,
}

/// A collector that records what it accepted.
///
/// Verdicts are taken from a script, one per request; once the script is
/// exhausted every request is delivered.
#[derive(Debug, Default)]
pub struct MemoryCollector {
    state: Mutex<CollectorState>,
}

impl MemoryCollector {
    /// Creates a collector that delivers everything.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Creates a collector that follows `script` first.
    pub fn scripted(script: impl IntoIterator<Item = Verdict>) -> Arc<Self> {
        let collector = Self::default();
        collector.state.lock().script.extend(script);
        Arc::new(collector)
    }

    /// Appends verdicts to the script.
    pub fn push_verdicts(&self, verdicts: impl IntoIterator<Item = Verdict>) {
        self.state.lock().script.extend(verdicts);
    }

    /// Attaches `update` to the next reply that reaches the endpoint.
    pub fn push_config(&self, update: DeliveryConfigUpdate) {
        self.state.lock().pending_update = Some(update);
    }

    /// Handles a log request. `None` models a lost request or reply.
    pub fn handle(&self, request: &LogSyncRequest) -> Option<LogSyncResponse> {
        let mut state = self.state.lock();
        let verdict = state.script.pop_front().unwrap_or(Verdict::Deliver);
        if verdict == Verdict::LoseRequest {
            return None;
        }
        state.requests += 1;

        let results = match verdict {
            Verdict::Deliver | Verdict::LoseResponse => {
                for bucket in &request.buckets {
                    state.acceptances += 1;
                    state
                        .accepted
                        .entry(bucket.bucket_id)
                        .or_insert_with(|| bucket.records.clone());
                }
                request
                    .buckets
                    .iter()
                    .map(|b| BucketResult::delivered(b.bucket_id))
                    .collect()
            }
            Verdict::Fail => request
                .buckets
                .iter()
                .map(|b| BucketResult::failed(b.bucket_id))
                .collect(),
            Verdict::Ignore | Verdict::LoseRequest => Vec::new(),
        };

        if verdict == Verdict::LoseResponse {
            return None;
        }

        let mut response = LogSyncResponse::new(results);
        if let Some(update) = state.pending_update.take() {
            response = response.with_config_update(update.encode().expect("encode config update"));
        }
        Some(response)
    }

    /// Requests that reached the collector.
    pub fn requests(&self) -> u64 {
        self.state.lock().requests
    }

    /// Distinct buckets accepted, in id order.
    pub fn accepted(&self) -> Vec<(BucketId, Vec<Bytes>)> {
        self.state
            .lock()
            .accepted
            .iter()
            .map(|(id, records)| (*id, records.clone()))
            .collect()
    }

    /// Every accepted payload, in bucket order, without duplicates.
    pub fn payloads(&self) -> Vec<Bytes> {
        self.state
            .lock()
            .accepted
            .values()
            .flat_map(|records| records.iter().cloned())
            .collect()
    }

    /// Buckets accepted more than once.
    pub fn duplicate_acceptances(&self) -> u64 {
        let state = self.state.lock();
        state.acceptances - state.accepted.len() as u64
    }

    /// A channel that delivers frames to this collector.
    pub fn channel(self: &Arc<Self>, name: &str) -> CollectorChannel {
        CollectorChannel {
            name: name.to_string(),
            collector: Arc::clone(self),
        }
    }
}

/// [`SyncChannel`] backed by a [`MemoryCollector`].
///
/// Answers the log section of each frame; other families get no reply.
#[derive(Debug, Clone)]
pub struct CollectorChannel {
    name: String,
    collector: Arc<MemoryCollector>,
}

impl SyncChannel for CollectorChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn exchange(&self, frame: &SyncFrame) -> SyncResult<SyncFrame> {
        let mut reply = SyncFrame::new();
        let Some(payload) = frame.section(DataFamily::Logging) else {
            return Ok(reply);
        };
        let request = LogSyncRequest::decode(payload)?;
        let response = self
            .collector
            .handle(&request)
            .ok_or_else(|| SyncError::channel_retryable(format!("{}: exchange lost", self.name)))?;
        reply.push(DataFamily::Logging, response.encode()?)?;
        Ok(reply)
    }
}
