//! Messages pollers send back to the supervisor.

use crate::types::StreamKind;

use super::poller::PollerError;

/// A poller stopped because of an unrecoverable error.
///
/// Sent at most once per poller, on the supervisor's failure channel. Events
/// travel on a separate channel so a burst of events never delays a failure.
#[derive(Debug)]
pub struct StreamFailure {
    /// The stream that failed.
    pub stream: StreamKind,

    /// What went wrong.
    pub error: PollerError,
}

impl std::fmt::Display for StreamFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "failed when processing {}: {}", self.stream, self.error)
    }
}
