//! The log data family's participation in a sync exchange.

use crate::error::{SyncError, SyncResult};
use crate::processor::{DeliveryProcessor, ResponseSummary};
use logsync_protocol::{DataFamily, LogSyncRequest, LogSyncResponse};
use std::fmt;
use tracing::{debug, warn};

/// A data family that contributes to, and consumes, sync frames.
///
/// The coordinator calls these methods from one sync loop; implementations
/// need not be internally synchronized.
pub trait SyncTransport: Send {
    /// Family this transport serves.
    fn family(&self) -> DataFamily;

    /// Encoded request section, or `None` if there is nothing to send.
    fn create_request(&mut self) -> SyncResult<Option<Vec<u8>>>;

    /// Consumes this family's section of a server response.
    fn on_response(&mut self, payload: &[u8]) -> SyncResult<()>;

    /// Reports that the last exchange this transport joined did not
    /// complete.
    fn on_channel_failure(&mut self);
}

/// Returned when [`LogTransport::bind`] refuses a processor.
///
/// Hands the rejected processor back so the caller keeps its buckets.
pub struct BindError {
    error: SyncError,
    processor: DeliveryProcessor,
}

impl BindError {
    /// Why the bind was refused.
    pub fn error(&self) -> &SyncError {
        &self.error
    }

    /// Recovers the rejected processor.
    pub fn into_processor(self) -> DeliveryProcessor {
        self.processor
    }
}

impl fmt::Debug for BindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindError")
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for BindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.error.fmt(f)
    }
}

impl std::error::Error for BindError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Sync transport for log records.
///
/// Translates between the log wire messages and a bound
/// [`DeliveryProcessor`]. Without a processor it contributes nothing to
/// requests and rejects responses.
#[derive(Debug, Default)]
pub struct LogTransport {
    processor: Option<DeliveryProcessor>,
}

impl LogTransport {
    /// Creates an unbound transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a transport bound to `processor`.
    pub fn with_processor(processor: DeliveryProcessor) -> Self {
        Self {
            processor: Some(processor),
        }
    }

    /// Binds `processor`, returning the one it replaces.
    ///
    /// Refused while the current processor has a request in flight, since
    /// its response would otherwise reach a processor that never sent it.
    pub fn bind(
        &mut self,
        processor: DeliveryProcessor,
    ) -> Result<Option<DeliveryProcessor>, BindError> {
        if let Some(current) = &self.processor {
            if current.is_in_flight() {
                return Err(BindError {
                    error: SyncError::RebindWhileInFlight {
                        in_flight: current.in_flight().len(),
                    },
                    processor,
                });
            }
        }
        debug!("delivery processor bound");
        Ok(self.processor.replace(processor))
    }

    /// Detaches the processor. Fails while a request is in flight.
    pub fn unbind(&mut self) -> SyncResult<Option<DeliveryProcessor>> {
        if let Some(current) = &self.processor {
            if current.is_in_flight() {
                return Err(SyncError::RebindWhileInFlight {
                    in_flight: current.in_flight().len(),
                });
            }
        }
        Ok(self.processor.take())
    }

    /// Returns true if a processor is bound.
    pub fn is_bound(&self) -> bool {
        self.processor.is_some()
    }

    /// The bound processor.
    pub fn processor(&self) -> Option<&DeliveryProcessor> {
        self.processor.as_ref()
    }

    /// The bound processor, mutably.
    pub fn processor_mut(&mut self) -> Option<&mut DeliveryProcessor> {
        self.processor.as_mut()
    }

    /// Builds the next log request without encoding it.
    pub fn create_log_request(&mut self) -> SyncResult<Option<LogSyncRequest>> {
        match self.processor.as_mut() {
            Some(processor) => processor.build_request(),
            None => Ok(None),
        }
    }

    /// Applies a decoded log response.
    pub fn on_log_response(&mut self, response: &LogSyncResponse) -> SyncResult<ResponseSummary> {
        let processor = self.processor.as_mut().ok_or(SyncError::NotBound)?;
        processor.apply_response(response)
    }
}

impl SyncTransport for LogTransport {
    fn family(&self) -> DataFamily {
        DataFamily::Logging
    }

    fn create_request(&mut self) -> SyncResult<Option<Vec<u8>>> {
        match self.create_log_request()? {
            Some(request) => Ok(Some(request.encode()?)),
            None => Ok(None),
        }
    }

    fn on_response(&mut self, payload: &[u8]) -> SyncResult<()> {
        if !self.is_bound() {
            return Err(SyncError::NotBound);
        }
        let response = LogSyncResponse::decode(payload)?;
        let summary = self.on_log_response(&response)?;
        debug!(
            delivered = summary.delivered,
            requeued = summary.requeued,
            dropped = summary.dropped,
            stale = summary.stale,
            "log response applied"
        );
        Ok(())
    }

    fn on_channel_failure(&mut self) {
        match self.processor.as_mut() {
            Some(processor) => processor.on_channel_failure(),
            None => warn!("channel failure reported to unbound log transport"),
        }
    }
}
