//! Connection fault classification.
//!
//! The transport does not hand us structured errors for connection
//! failures; all we reliably get is the error text. This module is the one
//! place that turns that text into a [`Fault`] with a remediation hint.
//! The substring table below depends on upstream wording (tokio, the OS,
//! and older servers' messages), so it stays here and nowhere else.

use std::fmt;
use std::time::Duration;

use tidepool_protocol::StatusCode;

use crate::error::ControlError;

/// Category of a classified fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultCode {
    ConnectionRefused,
    ConnectionClosed,
    ConnectionNoRoute,
    ConnectionBadHost,
    ConnectionTimedOut,
    RequestTimeout,
}

impl fmt::Display for FaultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FaultCode::ConnectionRefused => "connection refused",
            FaultCode::ConnectionClosed => "connection closed",
            FaultCode::ConnectionNoRoute => "no route to host",
            FaultCode::ConnectionBadHost => "bad host",
            FaultCode::ConnectionTimedOut => "connection timed out",
            FaultCode::RequestTimeout => "request timed out",
        };
        f.write_str(name)
    }
}

/// Lowercased substrings mapped to the fault they indicate. First match wins.
const CONNECTION_PATTERNS: &[(&str, FaultCode)] = &[
    ("connection refused", FaultCode::ConnectionRefused),
    ("transport is closing", FaultCode::ConnectionClosed),
    ("connection reset", FaultCode::ConnectionClosed),
    ("broken pipe", FaultCode::ConnectionClosed),
    ("early eof", FaultCode::ConnectionClosed),
    ("unexpected end of file", FaultCode::ConnectionClosed),
    ("no route to host", FaultCode::ConnectionNoRoute),
    ("no such host", FaultCode::ConnectionBadHost),
    ("failed to lookup address", FaultCode::ConnectionBadHost),
    ("name or service not known", FaultCode::ConnectionBadHost),
    ("i/o timeout", FaultCode::ConnectionTimedOut),
];

/// A user-facing failure: what went wrong and what to do about it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{description}")]
pub struct Fault {
    pub code: FaultCode,
    pub description: String,
    pub resolution: String,
}

impl Fault {
    /// Builds the fault for a connection failure to `addr`.
    pub fn connection(code: FaultCode, addr: &str) -> Self {
        let (description, resolution) = match code {
            FaultCode::ConnectionRefused => (
                format!("the server at {addr} refused the connection"),
                format!(
                    "verify that the control-plane server on {addr} is running \
                     and listening on the configured port"
                ),
            ),
            FaultCode::ConnectionClosed => (
                format!("the connection to {addr} was closed unexpectedly"),
                format!(
                    "check the server log on {addr}; the server may have restarted \
                     or rejected the request"
                ),
            ),
            FaultCode::ConnectionNoRoute => (
                format!("no route to {addr}"),
                format!("verify network connectivity between this host and {addr}"),
            ),
            FaultCode::ConnectionBadHost => (
                format!("unable to resolve the address of {addr}"),
                "check the host names in the configured host list".to_string(),
            ),
            FaultCode::ConnectionTimedOut => (
                format!("timed out connecting to {addr}"),
                format!("verify that {addr} is reachable and not blocked by a firewall"),
            ),
            FaultCode::RequestTimeout => (
                format!("request to {addr} timed out"),
                "increase the request timeout or retry later".to_string(),
            ),
        };
        Self {
            code,
            description,
            resolution,
        }
    }

    /// Builds the fault returned when a whole call runs out of time.
    pub fn request_timeout(elapsed: Duration) -> Self {
        // millisecond precision is plenty for a human-facing report
        let elapsed = Duration::from_millis(elapsed.as_millis() as u64);
        Self {
            code: FaultCode::RequestTimeout,
            description: format!("request timed out after {elapsed:?}"),
            resolution: "check that the management service is running and has elected \
                         a leader, or increase the request timeout"
                .to_string(),
        }
    }

    /// Returns true for connection faults (every code but `RequestTimeout`).
    pub fn is_connection(&self) -> bool {
        self.code != FaultCode::RequestTimeout
    }

    /// Returns true if retrying the same host may succeed.
    pub fn is_retryable_connection(&self) -> bool {
        matches!(
            self.code,
            FaultCode::ConnectionRefused | FaultCode::ConnectionClosed
        )
    }

    /// Formats the fault for display to an operator.
    pub fn report(&self) -> String {
        format!("{}\n  resolution: {}", self.description, self.resolution)
    }
}

/// Looks up the fault code for an error message, if any pattern matches.
fn match_message(message: &str) -> Option<FaultCode> {
    let lower = message.to_ascii_lowercase();
    CONNECTION_PATTERNS
        .iter()
        .find(|(pattern, _)| lower.contains(pattern))
        .map(|&(_, code)| code)
}

/// Classifies an error returned for `addr`.
///
/// Unclassified transport errors and status errors without structured
/// detail are matched against the known connection failures. Anything that
/// doesn't match, and anything already classified, is returned unchanged.
pub fn classify(err: ControlError, addr: &str) -> ControlError {
    let code = match &err {
        ControlError::Transport(message) => match_message(message),
        ControlError::Status(status)
            if status.detail.is_none()
                && matches!(
                    status.code,
                    StatusCode::Unavailable | StatusCode::DeadlineExceeded
                ) =>
        {
            match_message(&status.message)
        }
        _ => None,
    };

    match code {
        Some(code) => ControlError::Fault(Fault::connection(code, addr)),
        None => err,
    }
}

/// Returns true if the error is a classified connection fault.
pub fn is_conn_err(err: &ControlError) -> bool {
    matches!(err, ControlError::Fault(fault) if fault.is_connection())
}

/// Returns true if the error is a connection fault worth retrying
/// (refused or closed).
pub fn is_retryable_conn_err(err: &ControlError) -> bool {
    matches!(err, ControlError::Fault(fault) if fault.is_retryable_connection())
}
