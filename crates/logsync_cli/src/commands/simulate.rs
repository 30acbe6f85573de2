//! Simulate command implementation.

use logsync_engine::{
    DeliveryConfig, DeliveryProcessor, EngineConfig, LogTransport, OverflowPolicy, RecordStore,
    StoreConfig, SyncChannel, SyncCoordinator,
};
use logsync_testkit::{FlakyChannel, MemoryCollector, RecordingListener, Verdict};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

/// Opportunities allowed after the last record is logged.
const DRAIN_ROUNDS: usize = 10_000;

/// Parameters of one simulation run.
#[derive(Debug, Clone)]
pub struct SimulateOptions {
    /// Engine configuration file overriding the sizing flags.
    pub config: Option<PathBuf>,
    /// Records to log.
    pub records: usize,
    /// Maximum records per bucket.
    pub bucket_size: u32,
    /// Retry ceiling.
    pub retry_ceiling: u32,
    /// Buckets per request.
    pub in_flight: u32,
    /// Channels in the failover rotation.
    pub channels: usize,
    /// Per-exchange channel failure probability.
    pub channel_failure_rate: f64,
    /// Per-request collector rejection probability.
    pub server_failure_rate: f64,
    /// Records appended between opportunities.
    pub burst: usize,
    /// Random seed.
    pub seed: u64,
}

/// Simulation outcome.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct SimulationReport {
    /// Records offered to the store.
    pub records_logged: usize,
    /// Records the store refused or discarded on overflow.
    pub records_discarded: u64,
    /// Records acknowledged to the endpoint.
    pub records_delivered: usize,
    /// Records in dropped buckets.
    pub records_dropped: usize,
    /// Distinct records the collector holds.
    pub records_collected: usize,
    /// Buckets the collector accepted more than once.
    pub duplicate_buckets: u64,
    /// Requests that reached the collector.
    pub collector_requests: u64,
    /// Sync opportunities that sent a frame.
    pub exchanges: u64,
    /// Exchanges lost to channel errors.
    pub channel_failures: u64,
    /// Channel switches.
    pub failovers: u64,
    /// Records still held when the run ended.
    pub records_left: usize,
}

impl SimulationReport {
    fn is_balanced(&self) -> bool {
        self.records_left == 0
            && self.records_delivered + self.records_dropped + self.records_discarded as usize
                == self.records_logged
    }
}

/// Runs the simulate command.
pub fn run(options: &SimulateOptions, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let report = simulate(options)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        _ => print_report(&report),
    }

    if report.is_balanced() {
        Ok(())
    } else {
        Err("Simulation ended with unaccounted records".into())
    }
}

/// Runs a simulation and returns its report.
pub fn simulate(options: &SimulateOptions) -> Result<SimulationReport, Box<dyn std::error::Error>> {
    let (delivery, store_config) = match &options.config {
        Some(path) => {
            let config = EngineConfig::load(path)?;
            (config.delivery, config.store)
        }
        None => (
            DeliveryConfig::new(options.bucket_size, options.retry_ceiling)?
                .with_max_in_flight_buckets(options.in_flight),
            StoreConfig::new(options.records.max(1), OverflowPolicy::Reject)?,
        ),
    };
    if !(0.0..=1.0).contains(&options.channel_failure_rate)
        || !(0.0..=1.0).contains(&options.server_failure_rate)
    {
        return Err("failure rates must be between 0 and 1".into());
    }

    let mut rng = StdRng::seed_from_u64(options.seed);
    let script: Vec<Verdict> = (0..options.records.max(1) * 4)
        .map(|_| {
            if rng.gen_bool(options.server_failure_rate) {
                Verdict::Fail
            } else {
                Verdict::Deliver
            }
        })
        .collect();
    let collector = MemoryCollector::scripted(script);

    let store = Arc::new(RecordStore::new(store_config)?);
    let listener = RecordingListener::new();
    let mut processor = DeliveryProcessor::new(Arc::clone(&store), delivery)?;
    processor.add_listener(listener.clone());

    let mut coordinator = SyncCoordinator::new();
    coordinator.add_transport(Box::new(LogTransport::with_processor(processor)))?;
    for index in 0..options.channels.max(1) {
        let name = format!("channel-{index}");
        let channel: Box<dyn SyncChannel> = Box::new(FlakyChannel::new(
            &name,
            collector.channel(&name),
            options.channel_failure_rate,
            options.seed.wrapping_add(index as u64 + 1),
        ));
        coordinator.add_channel(channel);
    }

    let mut logged = 0;
    let mut refused = 0u64;
    while logged < options.records {
        let burst = options.burst.max(1).min(options.records - logged);
        for _ in 0..burst {
            let payload = format!("record-{logged}:{:08x}", rng.gen::<u32>());
            if store.append(payload.into_bytes()).is_err() {
                refused += 1;
            }
            logged += 1;
        }
        coordinator.sync_once()?;
    }
    let drain_rounds = coordinator.sync_until_idle(DRAIN_ROUNDS)?.len();
    tracing::info!(logged, refused, drain_rounds, "simulation finished");

    let store_stats = store.stats();
    let coordinator_stats = coordinator.stats();
    let dropped: usize = listener
        .dropped()
        .iter()
        .map(|d| d.record_ids.len())
        .sum();

    Ok(SimulationReport {
        records_logged: logged,
        records_discarded: refused + store_stats.discarded,
        records_delivered: listener.delivered_records(),
        records_dropped: dropped,
        records_collected: collector.payloads().len(),
        duplicate_buckets: collector.duplicate_acceptances(),
        collector_requests: collector.requests(),
        exchanges: coordinator_stats.exchanges,
        channel_failures: coordinator_stats.channel_failures,
        failovers: coordinator_stats.failovers,
        records_left: store.len(),
    })
}

fn print_report(report: &SimulationReport) {
    println!("Simulation");
    println!("==========");
    println!();
    println!("Records:");
    println!("  Logged:            {}", report.records_logged);
    println!("  Discarded:         {}", report.records_discarded);
    println!("  Delivered:         {}", report.records_delivered);
    println!("  Dropped:           {}", report.records_dropped);
    println!("  Collected:         {}", report.records_collected);
    println!("  Left in store:     {}", report.records_left);
    println!();
    println!("Exchanges:");
    println!("  Sent:              {}", report.exchanges);
    println!("  Channel failures:  {}", report.channel_failures);
    println!("  Failovers:         {}", report.failovers);
    println!("  Collector requests: {}", report.collector_requests);
    println!("  Duplicate buckets: {}", report.duplicate_buckets);
    println!();
    if report.is_balanced() {
        println!("✓ Every record delivered, dropped or discarded");
    } else {
        println!("✗ Records unaccounted for");
    }
}
