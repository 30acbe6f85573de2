//! Integration tests for the delivery pipeline against an in-memory collector.

use bytes::Bytes;
use logsync_engine::{
    DeliveryConfig, DeliveryProcessor, LogTransport, OverflowPolicy, RecordStore, StoreConfig,
    SyncTransport,
};
use logsync_protocol::{BucketId, BucketResult, DeliveryConfigUpdate, LogSyncRequest, LogSyncResponse};
use logsync_testkit::prelude::*;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn payloads(items: &[&'static str]) -> Vec<Bytes> {
    items.iter().map(|s| Bytes::from_static(s.as_bytes())).collect()
}

#[test]
fn buckets_follow_append_order() {
    let mut engine = TestEngine::new(DeliveryConfig::new(2, 1).unwrap(), MemoryCollector::new());
    engine.log(["A", "B", "C"]);

    assert_eq!(engine.run(10), 2);

    let accepted = engine.collector.accepted();
    assert_eq!(accepted.len(), 2);
    assert_eq!(accepted[0], (BucketId::new(1), payloads(&["A", "B"])));
    assert_eq!(accepted[1], (BucketId::new(2), payloads(&["C"])));
    assert!(engine.store.is_empty());
    assert_eq!(engine.listener.delivered(), vec![BucketId::new(1), BucketId::new(2)]);
}

#[test]
fn lost_response_resends_same_bucket() {
    let collector = MemoryCollector::scripted([Verdict::LoseResponse]);
    let mut engine = TestEngine::new(DeliveryConfig::new(4, 3).unwrap(), collector);
    engine.log(["boot", "ready"]);

    engine.run(10);

    assert_eq!(engine.collector.requests(), 2);
    assert_eq!(engine.collector.duplicate_acceptances(), 1);
    assert_eq!(engine.collector.accepted().len(), 1);
    assert_eq!(engine.collector.accepted()[0].0, BucketId::new(1));
    assert!(engine.store.is_empty());
}

#[test]
fn lost_request_is_resent() {
    let collector = MemoryCollector::scripted([Verdict::LoseRequest, Verdict::LoseRequest]);
    let mut engine = TestEngine::new(DeliveryConfig::new(4, 3).unwrap(), collector);
    engine.log(["x"]);

    engine.run(10);

    assert_eq!(engine.collector.payloads(), payloads(&["x"]));
    assert_eq!(engine.collector.duplicate_acceptances(), 0);
    assert_eq!(engine.listener.failures(), 2);
}

#[test]
fn retry_ceiling_drops_bucket_once() {
    let collector = MemoryCollector::scripted([Verdict::Fail, Verdict::Fail, Verdict::Fail]);
    let mut engine = TestEngine::new(DeliveryConfig::new(4, 1).unwrap(), collector);
    engine.log(["a", "b"]);
    engine.log(["c"]);

    engine.run(10);

    let dropped = engine.listener.dropped();
    assert_eq!(dropped.len(), 1);
    assert_eq!(dropped[0].bucket_id, BucketId::new(1));
    assert_eq!(dropped[0].record_ids.len(), 3);
    assert_eq!(dropped[0].attempts, 2);
    assert!(engine.store.is_empty());
    assert!(engine.collector.payloads().is_empty());
}

#[test]
fn failover_to_backup_channel() {
    let collector = MemoryCollector::new();
    let channels: Vec<Box<dyn logsync_engine::SyncChannel>> = vec![
        Box::new(ScriptedChannel::down("primary")),
        Box::new(collector.channel("backup")),
    ];
    let mut engine =
        TestEngine::with_channels(DeliveryConfig::new(8, 2).unwrap(), collector, channels);
    engine.log(["a", "b", "c"]);

    engine.run(10);

    assert_eq!(engine.collector.payloads(), payloads(&["a", "b", "c"]));
    assert_eq!(engine.collector.accepted()[0].0, BucketId::new(1));
    let stats = engine.coordinator.stats();
    assert_eq!(stats.channel_failures, 1);
    assert_eq!(stats.failovers, 1);
    assert_eq!(engine.coordinator.active_channel(), Some("backup"));
}

#[test]
fn server_config_update_applies_to_next_bucket() {
    let collector = MemoryCollector::new();
    collector.push_config(DeliveryConfigUpdate {
        max_bucket_size: Some(1),
        ..Default::default()
    });
    let mut engine = TestEngine::new(DeliveryConfig::new(2, 1).unwrap(), collector);
    engine.log(["a", "b", "c", "d"]);

    engine.run(10);

    let sizes: Vec<usize> = engine
        .collector
        .accepted()
        .iter()
        .map(|(_, records)| records.len())
        .collect();
    assert_eq!(sizes, vec![2, 1, 1]);
}

#[test]
fn invalid_server_config_takes_resend_path() {
    let collector = MemoryCollector::new();
    collector.push_config(DeliveryConfigUpdate {
        max_bucket_size: Some(0),
        ..Default::default()
    });
    let mut engine = TestEngine::new(DeliveryConfig::new(2, 3).unwrap(), collector);
    engine.log(["a"]);

    let report = engine.coordinator.sync_once().unwrap();
    assert!(!report.is_clean());
    assert_eq!(engine.coordinator.stats().rejected_sections, 1);
    assert_eq!(engine.listener.failures(), 1);

    engine.run(10);
    assert!(engine.store.is_empty());
    assert_eq!(engine.collector.duplicate_acceptances(), 1);
}

#[test]
fn delivery_timeout_recovers_unanswered_request() {
    let collector = MemoryCollector::scripted([Verdict::Ignore]);
    let config = DeliveryConfig::new(4, 3)
        .unwrap()
        .with_delivery_timeout(Duration::from_secs(10));
    let mut engine = TestEngine::new(config, collector);
    engine.log(["a"]);

    assert_eq!(engine.run(10), 1);
    assert_eq!(engine.store.len(), 1);

    engine.clock.advance(Duration::from_secs(10));
    assert_eq!(engine.run(10), 1);
    assert!(engine.store.is_empty());
    assert_eq!(engine.collector.duplicate_acceptances(), 0);
}

#[test]
fn concurrent_producers_lose_nothing() {
    let mut engine = TestEngine::new(
        DeliveryConfig::new(16, 0).unwrap().with_max_in_flight_buckets(2),
        MemoryCollector::new(),
    );

    let producers: Vec<_> = (0..4)
        .map(|t| {
            let store = Arc::clone(&engine.store);
            thread::spawn(move || {
                for i in 0..100 {
                    store.append(format!("{t}-{i}").into_bytes()).unwrap();
                }
            })
        })
        .collect();

    for _ in 0..50 {
        engine.coordinator.sync_once().unwrap();
    }
    for producer in producers {
        producer.join().unwrap();
    }
    engine.run(100);

    assert!(engine.store.is_empty());
    assert_eq!(engine.collector.payloads().len(), 400);
    assert_eq!(engine.listener.delivered_records(), 400);
}

#[test]
fn rebind_carries_pending_records() {
    let store = test_store(16);
    fill_store(&store, ["a", "b", "c"]);
    let first = DeliveryProcessor::new(Arc::clone(&store), DeliveryConfig::new(2, 1).unwrap())
        .unwrap();
    let mut transport = LogTransport::with_processor(first);

    let request = transport.create_log_request().unwrap().unwrap();
    assert_eq!(request.bucket_ids(), vec![BucketId::new(1)]);
    transport.on_channel_failure();

    let mut old = transport.unbind().unwrap().unwrap();
    assert_eq!(old.release_pending().unwrap(), 2);
    assert_eq!(store.pending_len(), 3);

    let second = DeliveryProcessor::new(Arc::clone(&store), DeliveryConfig::new(8, 1).unwrap())
        .unwrap();
    assert!(transport.bind(second).unwrap().is_none());

    let request = transport.create_log_request().unwrap().unwrap();
    assert_eq!(request.record_count(), 3);
    let bucket = request.buckets[0].bucket_id;
    transport
        .on_log_response(&LogSyncResponse::new(vec![BucketResult::delivered(bucket)]))
        .unwrap();
    assert!(store.is_empty());
}

#[test]
fn encoded_request_matches_processor_view() {
    let store = Arc::new(
        RecordStore::new(StoreConfig::new(8, OverflowPolicy::DropOldest).unwrap()).unwrap(),
    );
    fill_store(&store, ["one", "two"]);
    let processor =
        DeliveryProcessor::new(Arc::clone(&store), DeliveryConfig::new(8, 1).unwrap()).unwrap();
    let mut transport = LogTransport::with_processor(processor);

    let bytes = transport.create_request().unwrap().unwrap();
    let request = LogSyncRequest::decode(&bytes).unwrap();
    let bucket = transport.processor().unwrap().bucket(BucketId::new(1)).unwrap();
    assert_eq!(request.buckets[0], bucket.to_wire());
    assert_eq!(store.bucket_of(bucket.records()[0].id()), Some(BucketId::new(1)));
}
