//! Test fixtures and engine helpers.
//!
//! Provides ready-wired stores, processors and coordinators for common
//! test scenarios.

use crate::collector::MemoryCollector;
use crate::listener::RecordingListener;
use logsync_engine::{
    DeliveryConfig, DeliveryProcessor, LogTransport, ManualClock, OverflowPolicy, RecordStore,
    StoreConfig, SyncChannel, SyncCoordinator,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// A store that rejects appends beyond `capacity`.
pub fn test_store(capacity: usize) -> Arc<RecordStore> {
    let config = StoreConfig::new(capacity, OverflowPolicy::Reject).expect("valid store config");
    Arc::new(RecordStore::new(config).expect("store"))
}

/// Appends `payloads` in order.
pub fn fill_store<I, P>(store: &RecordStore, payloads: I)
where
    I: IntoIterator<Item = P>,
    P: AsRef<[u8]>,
{
    for payload in payloads {
        store
            .append(payload.as_ref().to_vec())
            .expect("append within capacity");
    }
}

/// A logging engine wired to an in-memory collector.
///
/// The processor runs on a manual clock and reports to a recording
/// listener.
pub struct TestEngine {
    /// The record store producers append to.
    pub store: Arc<RecordStore>,
    /// The collector acting as the server.
    pub collector: Arc<MemoryCollector>,
    /// Every listener event.
    pub listener: Arc<RecordingListener>,
    /// Time source of the processor.
    pub clock: Arc<ManualClock>,
    /// Coordinator driving the log transport.
    pub coordinator: SyncCoordinator,
}

impl TestEngine {
    /// Wires an engine with `config`, delivering to `collector` over a
    /// single channel.
    pub fn new(config: DeliveryConfig, collector: Arc<MemoryCollector>) -> Self {
        let channel = collector.channel("memory");
        Self::with_channels(config, collector, vec![Box::new(channel)])
    }

    /// Wires an engine whose coordinator rotates through `channels`.
    pub fn with_channels(
        config: DeliveryConfig,
        collector: Arc<MemoryCollector>,
        channels: Vec<Box<dyn SyncChannel>>,
    ) -> Self {
        let store = test_store(1024);
        let clock = Arc::new(ManualClock::new());
        let listener = RecordingListener::new();

        let mut processor = DeliveryProcessor::new(Arc::clone(&store), config)
            .expect("valid delivery config")
            .with_clock(clock.clone());
        processor.add_listener(listener.clone());

        let mut coordinator = SyncCoordinator::new();
        coordinator
            .add_transport(Box::new(LogTransport::with_processor(processor)))
            .expect("first transport");
        for channel in channels {
            coordinator.add_channel(channel);
        }

        Self {
            store,
            collector,
            listener,
            clock,
            coordinator,
        }
    }

    /// Appends `payloads` to the store.
    pub fn log<I, P>(&self, payloads: I)
    where
        I: IntoIterator<Item = P>,
        P: AsRef<[u8]>,
    {
        fill_store(&self.store, payloads);
    }

    /// Runs sync opportunities until nothing is sent or `max_rounds` pass.
    pub fn run(&mut self, max_rounds: usize) -> usize {
        self.coordinator
            .sync_until_idle(max_rounds)
            .expect("channel configured")
            .len()
    }
}

/// A temporary directory holding configuration or status files.
pub struct TestDir {
    dir: TempDir,
}

impl TestDir {
    /// Creates an empty directory.
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// Root of the directory.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Writes `contents` to `name` and returns its path.
    pub fn write(&self, name: &str, contents: &[u8]) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, contents).expect("write test file");
        path
    }

    /// Writes `value` as JSON to `name` and returns its path.
    pub fn write_json(&self, name: &str, value: &serde_json::Value) -> PathBuf {
        let text = serde_json::to_vec_pretty(value).expect("serialize json");
        self.write(name, &text)
    }
}

impl Default for TestDir {
    fn default() -> Self {
        Self::new()
    }
}

/// A complete, valid engine configuration document.
pub fn sample_engine_config() -> serde_json::Value {
    serde_json::json!({
        "delivery": {
            "max_bucket_size": 16,
            "max_in_flight_buckets": 1,
            "retry_ceiling": 3,
            "backoff": {
                "initial_delay_ms": 500,
                "max_delay_ms": 30000,
                "multiplier": 2.0,
                "jitter": true
            },
            "delivery_timeout_ms": 60000
        },
        "store": {
            "capacity": 4096,
            "overflow": "drop_oldest"
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use logsync_engine::EngineConfig;

    #[test]
    fn sample_config_loads() {
        let dir = TestDir::new();
        let path = dir.write_json("engine.json", &sample_engine_config());
        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.delivery.max_bucket_size, 16);
        assert_eq!(config.store.overflow, OverflowPolicy::DropOldest);
    }

    #[test]
    fn engine_delivers_everything() {
        let mut engine = TestEngine::new(
            DeliveryConfig::new(2, 1).unwrap(),
            MemoryCollector::new(),
        );
        engine.log(["a", "b", "c"]);
        assert_eq!(engine.run(10), 2);
        assert!(engine.store.is_empty());
        assert_eq!(engine.collector.payloads().len(), 3);
        assert_eq!(engine.listener.delivered_records(), 3);
    }
}
