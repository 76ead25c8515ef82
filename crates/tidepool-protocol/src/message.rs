//! Request and reply envelopes.

use serde::{Deserialize, Serialize};

use crate::status::Status;

/// A single control-plane call as it travels over the wire.
///
/// `sys` names the system the caller believes it is talking to; servers
/// belonging to a different system reject the call. The body is an opaque
/// payload encoded by whichever operation issued the call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub sys: String,
    pub method: String,
    pub body: Vec<u8>,
}

impl RpcRequest {
    pub fn new(sys: impl Into<String>, method: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            sys: sys.into(),
            method: method.into(),
            body,
        }
    }
}

/// The server's answer to an [`RpcRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RpcReply {
    Ok(Vec<u8>),
    Err(Status),
}

impl RpcReply {
    pub fn is_ok(&self) -> bool {
        matches!(self, RpcReply::Ok(_))
    }
}

impl From<Result<Vec<u8>, Status>> for RpcReply {
    fn from(result: Result<Vec<u8>, Status>) -> Self {
        match result {
            Ok(body) => RpcReply::Ok(body),
            Err(status) => RpcReply::Err(status),
        }
    }
}
