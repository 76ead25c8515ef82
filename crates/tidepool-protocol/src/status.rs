//! Structured status errors returned by control-plane servers.
//!
//! A status is what a server sends back instead of a payload when it
//! cannot (or will not) handle a call. Management-service replicas also
//! use it to redirect callers: a follower answers with
//! [`StatusDetail::NotLeader`] naming the leader it knows about, and a
//! host that is not part of the replica set answers with
//! [`StatusDetail::NotReplica`] listing the replicas.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Coarse outcome code, modeled on the usual RPC status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusCode {
    Unknown,
    InvalidArgument,
    NotFound,
    DeadlineExceeded,
    Unavailable,
    Unimplemented,
    Internal,
    Canceled,
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StatusCode::Unknown => "Unknown",
            StatusCode::InvalidArgument => "InvalidArgument",
            StatusCode::NotFound => "NotFound",
            StatusCode::DeadlineExceeded => "DeadlineExceeded",
            StatusCode::Unavailable => "Unavailable",
            StatusCode::Unimplemented => "Unimplemented",
            StatusCode::Internal => "Internal",
            StatusCode::Canceled => "Canceled",
        };
        f.write_str(name)
    }
}

/// Machine-readable detail attached to a status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusDetail {
    /// The server is a replica but not the current leader. `leader_hint`
    /// is empty when the replica does not know who leads right now.
    NotLeader {
        leader_hint: String,
        replicas: Vec<String>,
    },
    /// The server is not a management-service replica at all.
    NotReplica { replicas: Vec<String> },
    /// The replica has not finished initializing its database.
    Uninitialized,
    /// The replica's consensus service is not running.
    RaftUnavailable,
    /// A leadership change is in progress on this replica.
    LeaderStepUp,
}

/// A status error: code, human-readable message and optional detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct Status {
    pub code: StatusCode,
    pub message: String,
    pub detail: Option<StatusDetail>,
}

impl Status {
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: StatusDetail) -> Self {
        self.detail = Some(detail);
        self
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Unavailable, message)
    }

    pub fn unimplemented(method: &str) -> Self {
        Self::new(
            StatusCode::Unimplemented,
            format!("unknown method {method}"),
        )
    }

    /// Builds the redirect a follower replica sends back.
    pub fn not_leader(leader_hint: impl Into<String>, replicas: Vec<String>) -> Self {
        let leader_hint = leader_hint.into();
        let message = if leader_hint.is_empty() {
            "not the management service leader; leader unknown".to_string()
        } else {
            format!("not the management service leader; try {leader_hint}")
        };
        Self::new(StatusCode::Unavailable, message).with_detail(StatusDetail::NotLeader {
            leader_hint,
            replicas,
        })
    }

    /// Builds the redirect a non-replica host sends back.
    pub fn not_replica(replicas: Vec<String>) -> Self {
        let message = format!(
            "not a management service replica; replicas: {}",
            replicas.join(",")
        );
        Self::new(StatusCode::Unavailable, message)
            .with_detail(StatusDetail::NotReplica { replicas })
    }

    /// Returns true if the detail marks a temporary management-service state
    /// that resolves on its own (startup, election in progress).
    pub fn is_transient_ms_state(&self) -> bool {
        matches!(
            self.detail,
            Some(StatusDetail::Uninitialized)
                | Some(StatusDetail::RaftUnavailable)
                | Some(StatusDetail::LeaderStepUp)
        )
    }
}
