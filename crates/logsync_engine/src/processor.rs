//! Delivery processor: bucket lifecycle, retries and response reconciliation.

use crate::bucket::{Bucket, BucketState};
use crate::clock::{Clock, SystemClock};
use crate::config::DeliveryConfig;
use crate::error::{SyncError, SyncResult};
use crate::listener::{DeliveryDropped, DeliveryListener};
use crate::record::RecordId;
use crate::store::RecordStore;
use logsync_protocol::{
    BucketId, BucketResult, DeliveryConfigUpdate, DeliveryOutcome, LogSyncRequest,
    LogSyncResponse,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// How often a bucket build is retried when the overflow policy discards
/// drained records before they could be committed.
const COMMIT_ATTEMPTS: usize = 3;

/// Counters describing the processor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    /// Requests built.
    pub requests_built: u64,
    /// Buckets created from pending records.
    pub buckets_created: u64,
    /// Buckets acknowledged by the collector.
    pub buckets_delivered: u64,
    /// Failed attempts, whether requeued or dropped.
    pub bucket_failures: u64,
    /// Buckets dropped after exhausting the retry ceiling.
    pub buckets_dropped: u64,
    /// Records acknowledged by the collector.
    pub records_delivered: u64,
    /// Records lost to dropped buckets.
    pub records_dropped: u64,
    /// Channel failures that hit an in-flight request.
    pub channel_failures: u64,
    /// In-flight requests expired by the delivery timeout.
    pub timeouts: u64,
    /// Configuration replacements.
    pub config_updates: u64,
}

/// What a single [`DeliveryProcessor::apply_response`] call did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResponseSummary {
    /// Buckets moved to `Delivered`.
    pub delivered: usize,
    /// Buckets requeued for another attempt.
    pub requeued: usize,
    /// Buckets moved to `Dropped`.
    pub dropped: usize,
    /// Results ignored because their bucket was not in flight.
    pub stale: usize,
    /// Whether the delivery configuration was replaced.
    pub config_updated: bool,
}

/// Owner of all delivery state.
///
/// The processor turns pending records into buckets, keeps exactly one set
/// of buckets in flight, and reconciles server verdicts and channel
/// failures into bucket states. It is the only code that mutates bucket
/// state; callers serialize its operations (it takes `&mut self`).
///
/// # Invariants
///
/// - A bucket's record set never changes after creation
/// - At most one request is in flight
/// - Bucket ids increase and are never reused; a resend keeps its id
/// - Every record is pending in the store, owned by a live bucket, or gone
///   because it was delivered, dropped or discarded by the overflow policy
pub struct DeliveryProcessor {
    store: Arc<RecordStore>,
    config: DeliveryConfig,
    buckets: BTreeMap<BucketId, Bucket>,
    in_flight: Vec<BucketId>,
    in_flight_since: Option<Instant>,
    next_bucket_id: BucketId,
    clock: Arc<dyn Clock>,
    listeners: Vec<Arc<dyn DeliveryListener>>,
    stats: DeliveryStats,
}

impl DeliveryProcessor {
    /// Creates a processor over `store`. Fails with `InvalidConfiguration`
    /// before any bucket exists if `config` is out of range.
    pub fn new(store: Arc<RecordStore>, config: DeliveryConfig) -> SyncResult<Self> {
        config.validate()?;
        Ok(Self {
            store,
            config,
            buckets: BTreeMap::new(),
            in_flight: Vec::new(),
            in_flight_since: None,
            next_bucket_id: BucketId::new(1),
            clock: Arc::new(SystemClock),
            listeners: Vec::new(),
            stats: DeliveryStats::default(),
        })
    }

    /// Replaces the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Registers a listener for bucket outcomes.
    pub fn add_listener(&mut self, listener: Arc<dyn DeliveryListener>) {
        self.listeners.push(listener);
    }

    /// The record store this processor drains.
    pub fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    /// Current delivery configuration.
    pub fn config(&self) -> &DeliveryConfig {
        &self.config
    }

    /// Replaces the delivery configuration after validating it.
    ///
    /// Existing buckets keep their records; the new limits apply to buckets
    /// built afterwards. The retry ceiling applies to the next failure.
    pub fn set_config(&mut self, config: DeliveryConfig) -> SyncResult<()> {
        config.validate()?;
        info!(
            max_bucket_size = config.max_bucket_size,
            max_in_flight = config.max_in_flight_buckets,
            retry_ceiling = config.retry_ceiling,
            "delivery configuration replaced"
        );
        self.config = config;
        self.stats.config_updates += 1;
        Ok(())
    }

    /// Counter snapshot.
    pub fn stats(&self) -> DeliveryStats {
        self.stats.clone()
    }

    /// Returns true while a request awaits its response.
    pub fn is_in_flight(&self) -> bool {
        !self.in_flight.is_empty()
    }

    /// Ids of the in-flight buckets.
    pub fn in_flight(&self) -> &[BucketId] {
        &self.in_flight
    }

    /// Looks up a live (non-terminal) bucket.
    pub fn bucket(&self, id: BucketId) -> Option<&Bucket> {
        self.buckets.get(&id)
    }

    /// Live buckets in id order.
    pub fn buckets(&self) -> impl Iterator<Item = &Bucket> {
        self.buckets.values()
    }

    /// Id the next new bucket will receive.
    pub fn next_bucket_id(&self) -> BucketId {
        self.next_bucket_id
    }

    /// Builds the next request.
    ///
    /// Returns `None` if a request is already in flight, or if there is no
    /// retry-eligible bucket and no pending record. Otherwise fills up to
    /// `max_in_flight_buckets` slots, retries first (oldest id first), then
    /// new buckets cut from the store, and marks them all in flight.
    ///
    /// An in-flight request older than the delivery timeout is failed first.
    pub fn build_request(&mut self) -> SyncResult<Option<LogSyncRequest>> {
        let now = self.clock.now();
        self.expire_in_flight(now);

        if self.is_in_flight() {
            debug!(in_flight = self.in_flight.len(), "request already in flight");
            return Ok(None);
        }

        let slots = self.config.max_in_flight_buckets as usize;
        let mut selected: Vec<BucketId> = self
            .buckets
            .values()
            .filter(|b| b.is_ready(now))
            .map(Bucket::id)
            .take(slots)
            .collect();

        while selected.len() < slots {
            match self.open_bucket(now)? {
                Some(id) => selected.push(id),
                None => break,
            }
        }

        if selected.is_empty() {
            return Ok(None);
        }

        let mut wire = Vec::with_capacity(selected.len());
        for id in &selected {
            if let Some(bucket) = self.buckets.get_mut(id) {
                bucket.mark_in_flight();
                debug!(bucket = %id, attempt = bucket.attempts(), records = bucket.records().len(), "bucket in flight");
                wire.push(bucket.to_wire());
            }
        }

        self.in_flight = selected;
        self.in_flight_since = Some(now);
        self.stats.requests_built += 1;
        Ok(Some(LogSyncRequest::new(wire)))
    }

    /// Reconciles a server response with the in-flight set.
    ///
    /// The response is checked as a whole before anything changes: repeated
    /// bucket ids, an undecodable configuration block or an out-of-range
    /// configuration value reject it and leave every bucket untouched.
    ///
    /// Results for buckets that are not in flight are stale and ignored. If
    /// no result matches, the in-flight set keeps waiting; a response with
    /// no results at all may still carry a configuration block, while one
    /// whose results are all stale is ignored entirely. Otherwise the
    /// in-flight set is resolved: matched buckets take their outcome,
    /// unmentioned ones take the resend path. Applying the same response
    /// twice therefore changes nothing the second time.
    pub fn apply_response(&mut self, response: &LogSyncResponse) -> SyncResult<ResponseSummary> {
        response.validate()?;
        let next_config = match response.config_update.as_deref() {
            Some(block) => {
                let update = DeliveryConfigUpdate::decode(block)?;
                Some(self.config.apply_update(&update)?)
            }
            None => None,
        };

        let mut summary = ResponseSummary::default();
        let (matched, stale): (Vec<&BucketResult>, Vec<&BucketResult>) = response
            .results
            .iter()
            .partition(|r| self.in_flight.contains(&r.bucket_id));

        for result in &stale {
            warn!(error = %SyncError::StaleResponse { bucket_id: result.bucket_id }, "ignoring result");
        }
        summary.stale = stale.len();

        if matched.is_empty() {
            if response.results.is_empty() {
                summary.config_updated = self.replace_config(next_config)?;
            }
            return Ok(summary);
        }

        let now = self.clock.now();
        let in_flight = std::mem::take(&mut self.in_flight);
        self.in_flight_since = None;

        for id in in_flight {
            let outcome = matched
                .iter()
                .find(|r| r.bucket_id == id)
                .map(|r| r.outcome);
            match outcome {
                Some(DeliveryOutcome::Delivered) => {
                    self.finish_delivered(id);
                    summary.delivered += 1;
                }
                Some(DeliveryOutcome::Failed) => {
                    let state = self.fail_bucket(id, now);
                    tally(state, &mut summary);
                }
                None => {
                    debug!(bucket = %id, "bucket missing from response, resending");
                    let state = self.fail_bucket(id, now);
                    tally(state, &mut summary);
                }
            }
        }

        summary.config_updated = self.replace_config(next_config)?;
        Ok(summary)
    }

    /// Treats the in-flight request as failed.
    ///
    /// The channel cannot tell a lost request from a lost response, so every
    /// in-flight bucket takes the resend path.
    pub fn on_channel_failure(&mut self) {
        if !self.is_in_flight() {
            debug!("channel failure with nothing in flight");
            return;
        }
        self.stats.channel_failures += 1;
        let now = self.clock.now();
        self.fail_in_flight(now);
    }

    /// Gives pending buckets' records back to the store so that another
    /// processor can bucket them. Fails while a request is in flight.
    ///
    /// Returns the number of records released.
    pub fn release_pending(&mut self) -> SyncResult<usize> {
        if self.is_in_flight() {
            return Err(SyncError::RebindWhileInFlight {
                in_flight: self.in_flight.len(),
            });
        }

        let mut released = 0;
        for bucket in std::mem::take(&mut self.buckets).into_values() {
            let ids = bucket.record_ids();
            self.store.release(&ids)?;
            released += ids.len();
        }
        Ok(released)
    }

    /// Installs a server-pushed configuration unless it matches the current
    /// one, so that a replayed response leaves the counters alone.
    fn replace_config(&mut self, config: Option<DeliveryConfig>) -> SyncResult<bool> {
        match config {
            Some(config) if config != self.config => {
                self.set_config(config)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn open_bucket(&mut self, now: Instant) -> SyncResult<Option<BucketId>> {
        self.open_bucket_with(now, |_| {})
    }

    /// Drains and commits one bucket. `before_commit` runs between the two
    /// steps, where concurrent producers may discard drained records.
    fn open_bucket_with(
        &mut self,
        now: Instant,
        mut before_commit: impl FnMut(&RecordStore),
    ) -> SyncResult<Option<BucketId>> {
        for _ in 0..COMMIT_ATTEMPTS {
            let records = self.store.drain_bounded(
                self.config.max_bucket_size as usize,
                self.config.max_bucket_bytes,
            );
            if records.is_empty() {
                return Ok(None);
            }

            let id = self.next_bucket_id;
            let ids: Vec<RecordId> = records.iter().map(|r| r.id()).collect();
            before_commit(&self.store);
            match self.store.commit(id, &ids) {
                Ok(()) => {
                    self.next_bucket_id = id.next();
                    self.buckets.insert(id, Bucket::new(id, records, now));
                    self.stats.buckets_created += 1;
                    debug!(bucket = %id, records = ids.len(), "bucket created");
                    return Ok(Some(id));
                }
                Err(SyncError::UnknownRecord { record_id }) => {
                    debug!(record = record_id, "drained record discarded before commit, rebuilding bucket");
                }
                Err(e) => return Err(e),
            }
        }
        warn!(attempts = COMMIT_ATTEMPTS, "records kept disappearing before commit, no bucket built");
        Ok(None)
    }

    fn expire_in_flight(&mut self, now: Instant) {
        let (Some(timeout), Some(since)) = (self.config.delivery_timeout, self.in_flight_since)
        else {
            return;
        };
        if now.saturating_duration_since(since) >= timeout {
            warn!(
                in_flight = self.in_flight.len(),
                timeout_ms = timeout.as_millis() as u64,
                "no response within delivery timeout, resending"
            );
            self.stats.timeouts += 1;
            self.fail_in_flight(now);
        }
    }

    fn fail_in_flight(&mut self, now: Instant) {
        self.in_flight_since = None;
        for id in std::mem::take(&mut self.in_flight) {
            self.fail_bucket(id, now);
        }
    }

    fn finish_delivered(&mut self, id: BucketId) {
        let Some(mut bucket) = self.buckets.remove(&id) else {
            return;
        };
        bucket.mark_delivered();
        let ids = bucket.record_ids();
        self.store.purge(&ids);

        self.stats.buckets_delivered += 1;
        self.stats.records_delivered += ids.len() as u64;
        debug!(bucket = %id, records = ids.len(), attempts = bucket.attempts(), "bucket delivered");
        for listener in &self.listeners {
            listener.on_delivered(id, ids.len());
        }
    }

    /// Moves an in-flight bucket through `Failed` to `Pending` or `Dropped`.
    fn fail_bucket(&mut self, id: BucketId, now: Instant) -> Option<BucketState> {
        let ceiling = self.config.retry_ceiling;
        let bucket = self.buckets.get_mut(&id)?;
        bucket.mark_failed();
        self.stats.bucket_failures += 1;
        let failures = bucket.failures();

        if failures <= ceiling {
            let delay = self.config.backoff.delay_for_retry(failures);
            bucket.requeue(now + delay);
            debug!(bucket = %id, retry = failures, delay_ms = delay.as_millis() as u64, "bucket requeued");
            for listener in &self.listeners {
                listener.on_failed(id, failures);
            }
            return Some(BucketState::Pending);
        }

        let mut bucket = self.buckets.remove(&id)?;
        bucket.mark_dropped();
        let event = DeliveryDropped {
            bucket_id: id,
            record_ids: bucket.record_ids(),
            attempts: bucket.attempts(),
        };
        self.store.purge(&event.record_ids);

        self.stats.buckets_dropped += 1;
        self.stats.records_dropped += event.record_ids.len() as u64;
        warn!(
            bucket = %id,
            records = event.record_ids.len(),
            attempts = event.attempts,
            "retry ceiling exhausted, bucket dropped"
        );
        for listener in &self.listeners {
            listener.on_dropped(&event);
        }
        Some(BucketState::Dropped)
    }
}

fn tally(state: Option<BucketState>, summary: &mut ResponseSummary) {
    match state {
        Some(BucketState::Pending) => summary.requeued += 1,
        Some(BucketState::Dropped) => summary.dropped += 1,
        _ => {}
    }
}

impl std::fmt::Debug for DeliveryProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryProcessor")
            .field("config", &self.config)
            .field("buckets", &self.buckets.len())
            .field("in_flight", &self.in_flight)
            .field("next_bucket_id", &self.next_bucket_id)
            .field("stats", &self.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::{OverflowPolicy, RetryBackoff, StoreConfig};
    use parking_lot::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Events {
        delivered: Mutex<Vec<BucketId>>,
        failed: Mutex<Vec<(BucketId, u32)>>,
        dropped: Mutex<Vec<DeliveryDropped>>,
    }

    impl DeliveryListener for Events {
        fn on_delivered(&self, bucket_id: BucketId, _record_count: usize) {
            self.delivered.lock().push(bucket_id);
        }

        fn on_failed(&self, bucket_id: BucketId, retry: u32) {
            self.failed.lock().push((bucket_id, retry));
        }

        fn on_dropped(&self, event: &DeliveryDropped) {
            self.dropped.lock().push(event.clone());
        }
    }

    fn setup(bucket_size: u32, retry_ceiling: u32) -> (Arc<RecordStore>, DeliveryProcessor) {
        let store = Arc::new(
            RecordStore::new(StoreConfig::new(100, OverflowPolicy::Reject).unwrap()).unwrap(),
        );
        let config = DeliveryConfig::new(bucket_size, retry_ceiling).unwrap();
        let processor = DeliveryProcessor::new(Arc::clone(&store), config).unwrap();
        (store, processor)
    }

    fn payloads(request: &LogSyncRequest) -> Vec<Vec<&[u8]>> {
        request
            .buckets
            .iter()
            .map(|b| b.records.iter().map(|r| r.as_ref()).collect())
            .collect()
    }

    fn respond(results: Vec<BucketResult>) -> LogSyncResponse {
        LogSyncResponse::new(results)
    }

    #[test]
    fn invalid_config_rejected_at_construction() {
        let store = Arc::new(
            RecordStore::new(StoreConfig::new(10, OverflowPolicy::Reject).unwrap()).unwrap(),
        );
        let mut config = DeliveryConfig::new(1, 1).unwrap();
        config.max_bucket_size = 0;
        let err = DeliveryProcessor::new(Arc::clone(&store), config).unwrap_err();
        assert!(matches!(err, SyncError::InvalidConfiguration(_)));
    }

    #[test]
    fn empty_store_builds_nothing() {
        let (_store, mut processor) = setup(2, 1);
        assert!(processor.build_request().unwrap().is_none());
        assert_eq!(processor.next_bucket_id(), BucketId::new(1));
    }

    #[test]
    fn deliver_then_next_bucket() {
        let (store, mut processor) = setup(2, 1);
        for p in ["A", "B", "C"] {
            store.append(p.as_bytes().to_vec()).unwrap();
        }

        let request = processor.build_request().unwrap().unwrap();
        assert_eq!(request.bucket_ids(), vec![BucketId::new(1)]);
        assert_eq!(payloads(&request), vec![vec![&b"A"[..], &b"B"[..]]]);

        let summary = processor
            .apply_response(&respond(vec![BucketResult::delivered(BucketId::new(1))]))
            .unwrap();
        assert_eq!(summary.delivered, 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.pending_len(), 1);

        let request = processor.build_request().unwrap().unwrap();
        assert_eq!(request.bucket_ids(), vec![BucketId::new(2)]);
        assert_eq!(payloads(&request), vec![vec![&b"C"[..]]]);
    }

    #[test]
    fn single_flight() {
        let (store, mut processor) = setup(1, 1);
        store.append(&b"a"[..]).unwrap();
        store.append(&b"b"[..]).unwrap();

        assert!(processor.build_request().unwrap().is_some());
        assert!(processor.build_request().unwrap().is_none());
        assert_eq!(processor.in_flight(), &[BucketId::new(1)]);
    }

    #[test]
    fn channel_failure_resends_same_bucket() {
        let (store, mut processor) = setup(2, 3);
        for p in ["A", "B", "C"] {
            store.append(p.as_bytes().to_vec()).unwrap();
        }

        let first = processor.build_request().unwrap().unwrap();
        processor.on_channel_failure();

        let bucket = processor.bucket(BucketId::new(1)).unwrap();
        assert_eq!(bucket.state(), BucketState::Pending);
        assert_eq!(bucket.failures(), 1);

        let second = processor.build_request().unwrap().unwrap();
        assert_eq!(second, first);
        assert_eq!(processor.stats().channel_failures, 1);
    }

    #[test]
    fn retry_ceiling_drops_exactly_once() {
        let (store, mut processor) = setup(2, 1);
        let events = Arc::new(Events::default());
        processor.add_listener(events.clone());
        let a = store.append(&b"A"[..]).unwrap();
        let b = store.append(&b"B"[..]).unwrap();

        processor.build_request().unwrap().unwrap();
        let fail = respond(vec![BucketResult::failed(BucketId::new(1))]);
        let summary = processor.apply_response(&fail).unwrap();
        assert_eq!(summary.requeued, 1);

        processor.build_request().unwrap().unwrap();
        let summary = processor.apply_response(&fail).unwrap();
        assert_eq!(summary.dropped, 1);

        let summary = processor.apply_response(&fail).unwrap();
        assert_eq!(summary.dropped, 0);
        assert_eq!(summary.stale, 1);

        let dropped = events.dropped.lock();
        assert_eq!(dropped.len(), 1);
        assert_eq!(dropped[0].bucket_id, BucketId::new(1));
        assert_eq!(dropped[0].record_ids, vec![a, b]);
        assert_eq!(dropped[0].attempts, 2);
        assert!(store.is_empty());
        assert!(processor.bucket(BucketId::new(1)).is_none());
        assert_eq!(processor.stats().records_dropped, 2);
    }

    #[test]
    fn zero_retry_ceiling_fails_fast() {
        let (store, mut processor) = setup(5, 0);
        store.append(&b"x"[..]).unwrap();
        processor.build_request().unwrap().unwrap();
        processor.on_channel_failure();

        assert_eq!(processor.stats().buckets_dropped, 1);
        assert!(store.is_empty());
        assert!(processor.build_request().unwrap().is_none());
    }

    #[test]
    fn duplicate_response_is_idempotent() {
        let (store, mut processor) = setup(1, 2);
        store.append(&b"a"[..]).unwrap();
        store.append(&b"b"[..]).unwrap();

        processor.build_request().unwrap().unwrap();
        let response = respond(vec![BucketResult::delivered(BucketId::new(1))]);
        processor.apply_response(&response).unwrap();
        let stats = processor.stats();
        let len = store.len();

        let summary = processor.apply_response(&response).unwrap();
        assert_eq!(summary.delivered, 0);
        assert_eq!(processor.stats(), stats);
        assert_eq!(store.len(), len);
    }

    #[test]
    fn stale_response_keeps_current_request_in_flight() {
        let (store, mut processor) = setup(1, 2);
        store.append(&b"a"[..]).unwrap();
        store.append(&b"b"[..]).unwrap();

        processor.build_request().unwrap().unwrap();
        processor
            .apply_response(&respond(vec![BucketResult::delivered(BucketId::new(1))]))
            .unwrap();
        processor.build_request().unwrap().unwrap();

        let late = respond(vec![BucketResult::delivered(BucketId::new(1))]);
        let summary = processor.apply_response(&late).unwrap();
        assert_eq!(summary.stale, 1);
        assert_eq!(processor.in_flight(), &[BucketId::new(2)]);
    }

    #[test]
    fn unmentioned_in_flight_bucket_is_resent() {
        let (store, mut processor) = setup(1, 2);
        processor
            .set_config(processor.config().clone().with_max_in_flight_buckets(2))
            .unwrap();
        store.append(&b"a"[..]).unwrap();
        store.append(&b"b"[..]).unwrap();

        let request = processor.build_request().unwrap().unwrap();
        assert_eq!(request.bucket_ids(), vec![BucketId::new(1), BucketId::new(2)]);

        let summary = processor
            .apply_response(&respond(vec![BucketResult::delivered(BucketId::new(2))]))
            .unwrap();
        assert_eq!(summary.delivered, 1);
        assert_eq!(summary.requeued, 1);

        let request = processor.build_request().unwrap().unwrap();
        assert_eq!(request.bucket_ids(), vec![BucketId::new(1)]);
    }

    #[test]
    fn duplicate_results_reject_whole_response() {
        let (store, mut processor) = setup(1, 2);
        store.append(&b"a"[..]).unwrap();
        processor.build_request().unwrap().unwrap();

        let response = respond(vec![
            BucketResult::delivered(BucketId::new(1)),
            BucketResult::failed(BucketId::new(1)),
        ]);
        assert!(matches!(
            processor.apply_response(&response),
            Err(SyncError::Protocol(_))
        ));
        assert_eq!(processor.in_flight(), &[BucketId::new(1)]);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn empty_results_keep_waiting() {
        let (store, mut processor) = setup(1, 2);
        store.append(&b"a"[..]).unwrap();
        processor.build_request().unwrap().unwrap();

        let update = DeliveryConfigUpdate {
            retry_ceiling: Some(5),
            ..Default::default()
        };
        let response = respond(Vec::new()).with_config_update(update.encode().unwrap());
        let summary = processor.apply_response(&response).unwrap();
        assert!(summary.config_updated);
        assert_eq!(processor.config().retry_ceiling, 5);
        assert_eq!(processor.in_flight(), &[BucketId::new(1)]);
        assert_eq!(processor.bucket(BucketId::new(1)).unwrap().failures(), 0);
    }

    #[test]
    fn config_only_response_replay_is_a_no_op() {
        let (store, mut processor) = setup(1, 2);
        store.append(&b"a"[..]).unwrap();
        processor.build_request().unwrap().unwrap();

        let update = DeliveryConfigUpdate {
            retry_ceiling: Some(5),
            ..Default::default()
        };
        let response = respond(Vec::new()).with_config_update(update.encode().unwrap());

        assert!(processor.apply_response(&response).unwrap().config_updated);
        let once = processor.stats();
        assert_eq!(once.config_updates, 1);

        let summary = processor.apply_response(&response).unwrap();
        assert!(!summary.config_updated);
        assert_eq!(processor.stats(), once);
        assert_eq!(processor.config().retry_ceiling, 5);
        assert_eq!(processor.in_flight(), &[BucketId::new(1)]);
    }

    fn drop_oldest_setup() -> (Arc<RecordStore>, DeliveryProcessor) {
        let store = Arc::new(
            RecordStore::new(StoreConfig::new(3, OverflowPolicy::DropOldest).unwrap()).unwrap(),
        );
        for p in ["a", "b", "c"] {
            store.append(p.as_bytes().to_vec()).unwrap();
        }
        let config = DeliveryConfig::new(2, 2).unwrap();
        let processor = DeliveryProcessor::new(Arc::clone(&store), config).unwrap();
        (store, processor)
    }

    #[test]
    fn bucket_rebuilt_when_drained_record_is_discarded() {
        let (store, mut processor) = drop_oldest_setup();
        let now = processor.clock.now();

        let mut appended = false;
        let id = processor
            .open_bucket_with(now, |store| {
                if !appended {
                    appended = true;
                    store.append(&b"d"[..]).unwrap();
                }
            })
            .unwrap();

        assert_eq!(id, Some(BucketId::new(1)));
        assert_eq!(processor.next_bucket_id(), BucketId::new(2));
        assert_eq!(
            processor.bucket(BucketId::new(1)).unwrap().record_ids(),
            vec![RecordId::new(2), RecordId::new(3)]
        );
        assert_eq!(processor.stats().buckets_created, 1);
        assert_eq!(store.stats().discarded, 1);
        assert!(store.is_pending(RecordId::new(4)));
    }

    #[test]
    fn bucket_build_gives_up_after_repeated_discards() {
        let (store, mut processor) = drop_oldest_setup();
        let now = processor.clock.now();

        let id = processor
            .open_bucket_with(now, |store| {
                store.append(&b"x"[..]).unwrap();
            })
            .unwrap();

        assert_eq!(id, None);
        assert!(processor.buckets().next().is_none());
        assert_eq!(processor.next_bucket_id(), BucketId::new(1));
        assert_eq!(processor.stats().buckets_created, 0);
        assert_eq!(store.stats().discarded, COMMIT_ATTEMPTS as u64);
        assert_eq!(store.pending_len(), 3);
    }

    #[test]
    fn config_update_applied_between_buckets() {
        let (store, mut processor) = setup(1, 2);
        for p in ["a", "b", "c", "d"] {
            store.append(p.as_bytes().to_vec()).unwrap();
        }
        processor.build_request().unwrap().unwrap();

        let update = DeliveryConfigUpdate {
            max_bucket_size: Some(3),
            ..Default::default()
        };
        let response = respond(vec![BucketResult::delivered(BucketId::new(1))])
            .with_config_update(update.encode().unwrap());
        let summary = processor.apply_response(&response).unwrap();
        assert!(summary.config_updated);
        assert_eq!(processor.config().max_bucket_size, 3);

        let request = processor.build_request().unwrap().unwrap();
        assert_eq!(request.record_count(), 3);
    }

    #[test]
    fn invalid_config_update_rejects_response() {
        let (store, mut processor) = setup(1, 2);
        store.append(&b"a"[..]).unwrap();
        processor.build_request().unwrap().unwrap();

        let update = DeliveryConfigUpdate {
            retry_ceiling: Some(-1),
            ..Default::default()
        };
        let response = respond(vec![BucketResult::delivered(BucketId::new(1))])
            .with_config_update(update.encode().unwrap());
        assert!(matches!(
            processor.apply_response(&response),
            Err(SyncError::InvalidConfiguration(_))
        ));
        assert!(processor.is_in_flight());
        assert_eq!(processor.config().retry_ceiling, 2);
    }

    #[test]
    fn backoff_delays_retry_but_not_new_buckets() {
        let clock = Arc::new(ManualClock::new());
        let (store, processor) = setup(1, 5);
        let mut processor = processor.with_clock(clock.clone());
        processor
            .set_config(
                processor.config().clone().with_backoff(
                    RetryBackoff::exponential(Duration::from_secs(10), Duration::from_secs(60))
                        .with_jitter(false),
                ),
            )
            .unwrap();
        store.append(&b"a"[..]).unwrap();

        processor.build_request().unwrap().unwrap();
        processor.on_channel_failure();
        assert!(processor.build_request().unwrap().is_none());

        store.append(&b"b"[..]).unwrap();
        let request = processor.build_request().unwrap().unwrap();
        assert_eq!(request.bucket_ids(), vec![BucketId::new(2)]);
        processor
            .apply_response(&respond(vec![BucketResult::delivered(BucketId::new(2))]))
            .unwrap();

        clock.advance(Duration::from_secs(10));
        let request = processor.build_request().unwrap().unwrap();
        assert_eq!(request.bucket_ids(), vec![BucketId::new(1)]);
    }

    #[test]
    fn delivery_timeout_expires_in_flight() {
        let clock = Arc::new(ManualClock::new());
        let (store, processor) = setup(2, 3);
        let mut processor = processor.with_clock(clock.clone());
        processor
            .set_config(
                processor
                    .config()
                    .clone()
                    .with_delivery_timeout(Duration::from_secs(30)),
            )
            .unwrap();
        store.append(&b"a"[..]).unwrap();

        let first = processor.build_request().unwrap().unwrap();
        clock.advance(Duration::from_secs(29));
        assert!(processor.build_request().unwrap().is_none());

        clock.advance(Duration::from_secs(1));
        let second = processor.build_request().unwrap().unwrap();
        assert_eq!(second, first);
        assert_eq!(processor.stats().timeouts, 1);
        assert_eq!(processor.bucket(BucketId::new(1)).unwrap().attempts(), 2);
    }

    #[test]
    fn byte_budget_limits_new_buckets() {
        let (store, mut processor) = setup(10, 1);
        processor
            .set_config(processor.config().clone().with_max_bucket_bytes(8))
            .unwrap();
        store.append(vec![1u8; 5]).unwrap();
        store.append(vec![2u8; 5]).unwrap();

        let request = processor.build_request().unwrap().unwrap();
        assert_eq!(request.record_count(), 1);
    }

    #[test]
    fn release_pending_returns_records() {
        let (store, mut processor) = setup(2, 3);
        store.append(&b"a"[..]).unwrap();
        store.append(&b"b"[..]).unwrap();
        processor.build_request().unwrap().unwrap();

        assert!(matches!(
            processor.release_pending(),
            Err(SyncError::RebindWhileInFlight { in_flight: 1 })
        ));

        processor.on_channel_failure();
        assert_eq!(processor.release_pending().unwrap(), 2);
        assert_eq!(store.pending_len(), 2);
        assert_eq!(processor.buckets().count(), 0);
        assert_eq!(processor.next_bucket_id(), BucketId::new(2));
    }

    #[test]
    fn listener_sees_requeue_and_delivery() {
        let (store, mut processor) = setup(1, 2);
        let events = Arc::new(Events::default());
        processor.add_listener(events.clone());
        store.append(&b"a"[..]).unwrap();

        processor.build_request().unwrap().unwrap();
        processor.on_channel_failure();
        processor.build_request().unwrap().unwrap();
        processor
            .apply_response(&respond(vec![BucketResult::delivered(BucketId::new(1))]))
            .unwrap();

        assert_eq!(*events.failed.lock(), vec![(BucketId::new(1), 1)]);
        assert_eq!(*events.delivered.lock(), vec![BucketId::new(1)]);
        assert!(events.dropped.lock().is_empty());
    }
}
