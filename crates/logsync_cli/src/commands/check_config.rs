//! Check-config command implementation.

use logsync_engine::{EngineConfig, RawDeliveryConfig, StoreConfig};
use serde::Serialize;
use std::path::Path;

/// Normalized view of a valid configuration.
#[derive(Debug, Serialize)]
pub struct ConfigSummary {
    /// Delivery limits with defaults filled in.
    pub delivery: RawDeliveryConfig,
    /// Store limits.
    pub store: StoreConfig,
}

impl From<&EngineConfig> for ConfigSummary {
    fn from(config: &EngineConfig) -> Self {
        Self {
            delivery: RawDeliveryConfig::from(&config.delivery),
            store: config.store,
        }
    }
}

/// Runs the check-config command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = match EngineConfig::load(path) {
        Ok(config) => config,
        Err(e) => {
            println!("✗ {}: {}", path.display(), e);
            return Err("Configuration check failed".into());
        }
    };
    let summary = ConfigSummary::from(&config);

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        _ => print_summary(path, &config),
    }
    Ok(())
}

fn print_summary(path: &Path, config: &EngineConfig) {
    let delivery = &config.delivery;
    println!("Configuration: {}", path.display());
    println!();
    println!("Delivery:");
    println!("  Max bucket size:   {} records", delivery.max_bucket_size);
    match delivery.max_bucket_bytes {
        Some(bytes) => println!("  Max bucket bytes:  {bytes}"),
        None => println!("  Max bucket bytes:  unlimited"),
    }
    println!("  Buckets in flight: {}", delivery.max_in_flight_buckets);
    println!("  Retry ceiling:     {}", delivery.retry_ceiling);
    println!(
        "  Backoff:           {:?} .. {:?} (x{}{})",
        delivery.backoff.initial_delay,
        delivery.backoff.max_delay,
        delivery.backoff.multiplier,
        if delivery.backoff.jitter { ", jitter" } else { "" }
    );
    match delivery.delivery_timeout {
        Some(timeout) => println!("  Delivery timeout:  {timeout:?}"),
        None => println!("  Delivery timeout:  none"),
    }
    println!();
    println!("Store:");
    println!("  Capacity:          {} records", config.store.capacity);
    println!("  Overflow:          {:?}", config.store.overflow);
    println!();
    println!("✓ Configuration valid");
}
