//! Connection factory and framed-TCP transport.
//!
//! The invoker only needs two things from a transport: a way to open a
//! connection to `host:port`, and a way to make one call over it. Both are
//! traits so tests (and alternative transports) can plug in.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tidepool_protocol::{read_frame, write_frame, RpcReply, RpcRequest};
use tokio::net::TcpStream;
use tracing::trace;

use crate::config::TransportConfig;
use crate::error::ControlError;
use crate::request::Connection;

/// An open connection to one host.
#[async_trait]
pub trait Channel: Send {
    /// Address this channel is connected to.
    fn addr(&self) -> &str;

    /// Sends `body` to `method` and waits for the reply payload.
    async fn call(&mut self, method: &str, body: Bytes) -> Result<Bytes, ControlError>;
}

/// Opens connections to control-plane hosts.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connects to `addr` on behalf of system `sys`.
    async fn connect(&self, addr: &str, sys: &str) -> Result<Connection, ControlError>;
}

/// Connects over plain TCP and speaks the length-prefixed frame protocol.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    connect_timeout: Duration,
}

impl TcpConnector {
    pub fn new(config: &TransportConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout(),
        }
    }
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::new(&TransportConfig::default())
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, addr: &str, sys: &str) -> Result<Connection, ControlError> {
        trace!(%addr, "dialing");
        let stream = match tokio::time::timeout(self.connect_timeout, TcpStream::connect(addr)).await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(ControlError::Transport(format!("dial tcp {addr}: {e}"))),
            Err(_) => return Err(ControlError::Transport(format!("dial tcp {addr}: i/o timeout"))),
        };
        // requests are single small frames; don't let Nagle hold them back
        stream.set_nodelay(true)?;

        Ok(Box::new(TcpChannel {
            stream,
            addr: addr.to_string(),
            sys: sys.to_string(),
        }))
    }
}

/// A TCP connection carrying framed [`RpcRequest`]/[`RpcReply`] messages.
pub struct TcpChannel {
    stream: TcpStream,
    addr: String,
    sys: String,
}

#[async_trait]
impl Channel for TcpChannel {
    fn addr(&self) -> &str {
        &self.addr
    }

    async fn call(&mut self, method: &str, body: Bytes) -> Result<Bytes, ControlError> {
        let req = RpcRequest::new(self.sys.as_str(), method, body.to_vec());
        write_frame(&mut self.stream, &req).await?;

        match read_frame::<_, RpcReply>(&mut self.stream).await? {
            RpcReply::Ok(payload) => Ok(Bytes::from(payload)),
            RpcReply::Err(status) => Err(ControlError::Status(status)),
        }
    }
}
