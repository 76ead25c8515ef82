//! Error types for control-plane invocation.

use std::io;

use tidepool_protocol::{Status, StatusCode};

use crate::config::ConfigError;
use crate::fault::Fault;

/// Errors that can occur while invoking a control-plane request.
///
/// Per-host failures are stored inside [`HostResponse`](crate::HostResponse)
/// values, so the type is cloneable: the same error may be reported for a
/// host and also returned as the reason a management request gave up.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ControlError {
    /// Neither the request nor the configuration named any host.
    #[error("no hosts to send the request to")]
    NoHosts,

    /// A host address could not be parsed.
    #[error("invalid host address '{addr}': {reason}")]
    InvalidHost { addr: String, reason: String },

    /// The caller built a request that cannot be sent.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The remote server answered with a status instead of a payload.
    #[error(transparent)]
    Status(#[from] Status),

    /// Unclassified transport-level failure (connect, send or receive).
    #[error("transport error: {0}")]
    Transport(String),

    /// A classified connection fault or request timeout.
    #[error(transparent)]
    Fault(#[from] Fault),

    /// The caller canceled the request.
    #[error("request canceled")]
    Canceled,

    /// A single attempt ran out of time.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// The request's max-tries policy was reached.
    #[error("giving up after {tries} tries: {last}")]
    RetriesExhausted { tries: u32, last: Box<ControlError> },

    /// The task talking to a host died before reporting a result.
    #[error("request to {addr} failed: {reason}")]
    TaskFailed { addr: String, reason: String },

    /// The aggregated response is not what the caller asked for.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ControlError {
    /// Returns the remote status, if the server sent one.
    pub fn status(&self) -> Option<&Status> {
        match self {
            ControlError::Status(status) => Some(status),
            _ => None,
        }
    }

    /// Returns the fault, if the error has been classified as one.
    pub fn fault(&self) -> Option<&Fault> {
        match self {
            ControlError::Fault(fault) => Some(fault),
            _ => None,
        }
    }

    /// Returns true if the remote server does not implement the method.
    pub fn is_unimplemented(&self) -> bool {
        matches!(self.status(), Some(s) if s.code == StatusCode::Unimplemented)
    }

    /// Returns true for errors raised before anything went over the wire.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            ControlError::NoHosts
                | ControlError::InvalidHost { .. }
                | ControlError::InvalidRequest(_)
                | ControlError::Config(_)
        )
    }
}

impl From<io::Error> for ControlError {
    fn from(err: io::Error) -> Self {
        ControlError::Transport(err.to_string())
    }
}
