//! Logsync CLI
//!
//! Command-line tools for endpoint log delivery.
//!
//! # Commands
//!
//! - `simulate` - Drive the delivery pipeline against an in-memory collector
//! - `check-config` - Validate an engine configuration file
//! - `status` - Inspect a persisted endpoint status file

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Endpoint log delivery tools.
#[derive(Parser)]
#[command(name = "logsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Simulate delivery over unreliable channels
    Simulate {
        /// Engine configuration file (JSON); overrides the sizing flags
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Number of records to log
        #[arg(short, long, default_value = "1000")]
        records: usize,

        /// Maximum records per bucket
        #[arg(long, default_value = "32")]
        bucket_size: u32,

        /// Failed attempts tolerated before a bucket is dropped
        #[arg(long, default_value = "3")]
        retry_ceiling: u32,

        /// Buckets carried per request
        #[arg(long, default_value = "1")]
        in_flight: u32,

        /// Number of channels to rotate through
        #[arg(long, default_value = "2")]
        channels: usize,

        /// Probability that an exchange fails on the channel
        #[arg(long, default_value = "0.2")]
        channel_failure_rate: f64,

        /// Probability that the collector rejects a request
        #[arg(long, default_value = "0.1")]
        server_failure_rate: f64,

        /// Records appended between sync opportunities
        #[arg(long, default_value = "50")]
        burst: usize,

        /// Random seed
        #[arg(long, default_value = "1")]
        seed: u64,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Validate an engine configuration file
    CheckConfig {
        /// Configuration file (JSON)
        file: PathBuf,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show a persisted endpoint status
    Status {
        /// Status file
        file: PathBuf,

        /// Reserve the next event sequence number and save
        #[arg(long)]
        next_sequence: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("error"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Simulate {
            config,
            records,
            bucket_size,
            retry_ceiling,
            in_flight,
            channels,
            channel_failure_rate,
            server_failure_rate,
            burst,
            seed,
            format,
        } => {
            let options = commands::simulate::SimulateOptions {
                config,
                records,
                bucket_size,
                retry_ceiling,
                in_flight,
                channels,
                channel_failure_rate,
                server_failure_rate,
                burst,
                seed,
            };
            commands::simulate::run(&options, &format)?;
        }
        Commands::CheckConfig { file, format } => {
            commands::check_config::run(&file, &format)?;
        }
        Commands::Status {
            file,
            next_sequence,
            format,
        } => {
            commands::status::run(&file, next_sequence, &format)?;
        }
        Commands::Version => {
            println!("logsync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
