//! Channels with injected failures.

use logsync_engine::{SyncChannel, SyncError, SyncResult};
use logsync_protocol::SyncFrame;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

/// One scripted step of a [`ScriptedChannel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStep {
    /// Forward the frame to the inner channel.
    Pass,
    /// Fail without forwarding.
    Fail,
}

/// Wraps a channel and fails the exchanges a script says to fail.
///
/// Without an inner channel every forwarded exchange fails too, which
/// makes a permanently broken path.
pub struct ScriptedChannel {
    name: String,
    inner: Option<Box<dyn SyncChannel>>,
    script: Mutex<VecDeque<ChannelStep>>,
    exchanges: AtomicU64,
}

impl ScriptedChannel {
    /// Wraps `inner` with an empty script.
    pub fn new(name: &str, inner: impl SyncChannel + 'static) -> Self {
        Self {
            name: name.to_string(),
            inner: Some(Box::new(inner)),
            script: Mutex::new(VecDeque::new()),
            exchanges: AtomicU64::new(0),
        }
    }

    /// A channel on which every exchange fails.
    pub fn down(name: &str) -> Self {
        Self {
            name: name.to_string(),
            inner: None,
            script: Mutex::new(VecDeque::new()),
            exchanges: AtomicU64::new(0),
        }
    }

    /// Appends steps to the script.
    pub fn with_steps(self, steps: impl IntoIterator<Item = ChannelStep>) -> Self {
        self.script.lock().extend(steps);
        self
    }

    /// Exchanges attempted on this channel.
    pub fn exchanges(&self) -> u64 {
        self.exchanges.load(Ordering::SeqCst)
    }
}

impl SyncChannel for ScriptedChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn exchange(&self, frame: &SyncFrame) -> SyncResult<SyncFrame> {
        self.exchanges.fetch_add(1, Ordering::SeqCst);
        let step = self.script.lock().pop_front().unwrap_or(ChannelStep::Pass);
        match (step, &self.inner) {
            (ChannelStep::Pass, Some(inner)) => inner.exchange(frame),
            (ChannelStep::Pass, None) => Err(SyncError::channel_retryable(format!(
                "{}: channel down",
                self.name
            ))),
            (ChannelStep::Fail, _) => Err(SyncError::channel_retryable(format!(
                "{}: scripted failure",
                self.name
            ))),
        }
    }
}

/// Wraps a channel and fails a seeded random share of exchanges.
pub struct FlakyChannel {
    name: String,
    inner: Box<dyn SyncChannel>,
    failure_rate: f64,
    rng: Mutex<StdRng>,
}

impl FlakyChannel {
    /// Fails each exchange with probability `failure_rate`, reproducibly
    /// for a given `seed`. Rates outside `0..=1` are clamped.
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is NaN.
    pub fn new(
        name: &str,
        inner: impl SyncChannel + 'static,
        failure_rate: f64,
        seed: u64,
    ) -> Self {
        assert!(!failure_rate.is_nan(), "failure rate must be a number");
        Self {
            name: name.to_string(),
            inner: Box::new(inner),
            failure_rate: failure_rate.clamp(0.0, 1.0),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl SyncChannel for FlakyChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn exchange(&self, frame: &SyncFrame) -> SyncResult<SyncFrame> {
        if self.rng.lock().gen_bool(self.failure_rate) {
            return Err(SyncError::channel_retryable(format!(
                "{}: injected failure",
                self.name
            )));
        }
        self.inner.exchange(frame)
    }
}
