//! # Logsync Testkit
//!
//! Test utilities for logsync.
//!
//! This crate provides:
//! - `MemoryCollector`, a scripted in-memory server and its channel
//! - `ScriptedChannel` and `FlakyChannel` for injecting channel failures
//! - `RecordingListener` for asserting on delivery events
//! - Property-based test generators using proptest
//! - Fixtures wiring a store, processor and coordinator together
//!
//! ## Usage
//!
//! ```rust
//! use logsync_engine::DeliveryConfig;
//! use logsync_testkit::prelude::*;
//!
//! let collector = MemoryCollector::scripted([Verdict::Fail]);
//! let mut engine = TestEngine::new(DeliveryConfig::new(8, 2).unwrap(), collector);
//! engine.log(["boot", "ready"]);
//! engine.run(10);
//! assert!(engine.store.is_empty());
//! assert_eq!(engine.listener.failures(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod channels;
pub mod collector;
pub mod fixtures;
pub mod generators;
pub mod listener;

pub use logsync_engine::ManualClock;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::channels::*;
    pub use crate::collector::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::listener::*;
    pub use crate::ManualClock;
}

pub use channels::*;
pub use collector::*;
pub use fixtures::*;
pub use generators::*;
pub use listener::*;
