//! Reference channel coordinator.
//!
//! Drives one sync opportunity at a time: polls every registered transport,
//! sends the combined frame over the active channel, routes the reply back
//! by data family, and fails over to the next channel when an exchange
//! does not complete.

use crate::error::{SyncError, SyncResult};
use crate::transport::SyncTransport;
use logsync_protocol::{DataFamily, SyncFrame};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// A network path to the server.
///
/// One call to [`exchange`](SyncChannel::exchange) carries one frame and
/// must end in a reply or an error, never silence forever.
pub trait SyncChannel: Send + Sync {
    /// Name used in logs and reports.
    fn name(&self) -> &str;

    /// Sends `frame` and waits for the server's reply.
    fn exchange(&self, frame: &SyncFrame) -> SyncResult<SyncFrame>;
}

/// Counters describing the coordinator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoordinatorStats {
    /// Frames sent.
    pub exchanges: u64,
    /// Opportunities where no transport had anything to send.
    pub idle: u64,
    /// Exchanges that ended in a channel error.
    pub channel_failures: u64,
    /// Switches to another channel.
    pub failovers: u64,
    /// Response sections a transport refused.
    pub rejected_sections: u64,
}

/// Outcome of one [`SyncCoordinator::sync_once`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Channel the frame went out on, if one was sent.
    pub channel: Option<String>,
    /// Families that contributed a section.
    pub sent: Vec<DataFamily>,
    /// Families whose response section was applied.
    pub applied: Vec<DataFamily>,
    /// Families that took the resend path: rejected or missing sections.
    pub unresolved: Vec<DataFamily>,
    /// Channel error text, if the exchange failed.
    pub channel_error: Option<String>,
    /// Wall time of the opportunity.
    pub duration: Duration,
}

impl SyncReport {
    /// Returns true if no transport had anything to send.
    pub fn is_idle(&self) -> bool {
        self.sent.is_empty()
    }

    /// Returns true if the frame was exchanged and every section applied.
    pub fn is_clean(&self) -> bool {
        self.channel_error.is_none() && self.unresolved.is_empty()
    }
}

/// Serializes sync opportunities across transports and channels.
pub struct SyncCoordinator {
    transports: Vec<Box<dyn SyncTransport>>,
    channels: Vec<Box<dyn SyncChannel>>,
    active: usize,
    stats: CoordinatorStats,
}

impl SyncCoordinator {
    /// Creates a coordinator with no transports and no channels.
    pub fn new() -> Self {
        Self {
            transports: Vec::new(),
            channels: Vec::new(),
            active: 0,
            stats: CoordinatorStats::default(),
        }
    }

    /// Registers a transport. Fails if its family already has one.
    pub fn add_transport(&mut self, transport: Box<dyn SyncTransport>) -> SyncResult<()> {
        let family = transport.family();
        if self.transports.iter().any(|t| t.family() == family) {
            return Err(SyncError::invalid_config(format!(
                "a {family} transport is already registered"
            )));
        }
        self.transports.push(transport);
        Ok(())
    }

    /// Adds a channel to the failover rotation.
    pub fn add_channel(&mut self, channel: Box<dyn SyncChannel>) {
        self.channels.push(channel);
    }

    /// Name of the channel the next exchange will use.
    pub fn active_channel(&self) -> Option<&str> {
        self.channels.get(self.active).map(|c| c.name())
    }

    /// Families with a registered transport.
    pub fn families(&self) -> Vec<DataFamily> {
        self.transports.iter().map(|t| t.family()).collect()
    }

    /// Counter snapshot.
    pub fn stats(&self) -> CoordinatorStats {
        self.stats.clone()
    }

    /// Runs one sync opportunity.
    ///
    /// Channel failures are absorbed: every participating transport is told
    /// its request went unresolved, the coordinator moves to the next
    /// channel, and the report carries the error text. Only a missing
    /// channel is returned as an error.
    pub fn sync_once(&mut self) -> SyncResult<SyncReport> {
        let started = Instant::now();
        let Some(channel) = self.channels.get(self.active) else {
            return Err(SyncError::channel_fatal("no channel configured"));
        };
        let channel_name = channel.name().to_string();

        let mut report = SyncReport::default();
        let mut frame = SyncFrame::new();
        let mut participants = Vec::new();

        for (index, transport) in self.transports.iter_mut().enumerate() {
            let family = transport.family();
            match transport.create_request() {
                Ok(Some(payload)) => {
                    if let Err(e) = frame.push(family, payload) {
                        warn!(%family, error = %e, "could not add section to frame");
                        transport.on_channel_failure();
                        continue;
                    }
                    participants.push(index);
                    report.sent.push(family);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(%family, error = %e, "transport failed to build request");
                    transport.on_channel_failure();
                }
            }
        }

        if frame.is_empty() {
            self.stats.idle += 1;
            report.duration = started.elapsed();
            return Ok(report);
        }

        report.channel = Some(channel_name.clone());
        self.stats.exchanges += 1;
        debug!(channel = %channel_name, families = ?report.sent, "sending sync frame");

        let reply = match self.channels[self.active].exchange(&frame) {
            Ok(reply) => reply,
            Err(e) => {
                warn!(channel = %channel_name, error = %e, "sync exchange failed");
                self.stats.channel_failures += 1;
                for &index in &participants {
                    self.transports[index].on_channel_failure();
                }
                report.unresolved = report.sent.clone();
                report.channel_error = Some(e.to_string());
                self.fail_over();
                report.duration = started.elapsed();
                return Ok(report);
            }
        };

        for family in reply.families() {
            if !report.sent.contains(&family) {
                debug!(%family, "ignoring reply section for family that sent nothing");
            }
        }

        for &index in &participants {
            let transport = &mut self.transports[index];
            let family = transport.family();
            let result = match reply.section(family) {
                Some(payload) => transport.on_response(payload),
                None => Err(SyncError::channel_retryable(format!(
                    "reply carried no {family} section"
                ))),
            };
            match result {
                Ok(()) => report.applied.push(family),
                Err(e) => {
                    warn!(%family, error = %e, "response section not applied, resending");
                    self.stats.rejected_sections += 1;
                    transport.on_channel_failure();
                    report.unresolved.push(family);
                }
            }
        }

        report.duration = started.elapsed();
        Ok(report)
    }

    /// Runs opportunities until one is idle or `max_rounds` is reached.
    ///
    /// Returns the reports of every round that sent something.
    pub fn sync_until_idle(&mut self, max_rounds: usize) -> SyncResult<Vec<SyncReport>> {
        let mut reports = Vec::new();
        for _ in 0..max_rounds {
            let report = self.sync_once()?;
            if report.is_idle() {
                break;
            }
            reports.push(report);
        }
        Ok(reports)
    }

    fn fail_over(&mut self) {
        if self.channels.len() < 2 {
            return;
        }
        let from = self.active;
        self.active = (self.active + 1) % self.channels.len();
        self.stats.failovers += 1;
        info!(
            from = self.channels[from].name(),
            to = self.channels[self.active].name(),
            "failing over to next channel"
        );
    }
}

impl Default for SyncCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SyncCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncCoordinator")
            .field("families", &self.families())
            .field("channels", &self.channels.len())
            .field("active", &self.active_channel())
            .field("stats", &self.stats)
            .finish()
    }
}
