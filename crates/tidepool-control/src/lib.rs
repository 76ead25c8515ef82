//! tidepool-control: client-side invocation layer for the tidepool
//! control plane.
//!
//! Administrative tools use this crate to send control-plane calls to a
//! fleet of storage servers and to the management service (MS), the small
//! replicated cluster holding authoritative system metadata.
//!
//! # Architecture
//!
//! - **Request**: one logical call, with its targets, deadline and retry policy
//! - **Dispatcher**: fans a call out to every target host concurrently
//! - **Aggregation**: collects per-host outcomes into a [`UnaryResponse`]
//! - **Retry engine**: finds the MS leader, follows redirects, backs off
//! - **Faults**: classifies connection failures and attaches remediation hints
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use tidepool_control::{ControlConfig, Invoker, Request};
//! use tokio_util::sync::CancellationToken;
//!
//! let invoker = Invoker::new(ControlConfig::default());
//! let mut req = Request::call("SystemQuery", Vec::new()).management();
//!
//! let resp = invoker.invoke(&CancellationToken::new(), &mut req).await?;
//! let payload = resp.ms_response()?;
//! ```

mod candidates;
mod config;
mod dispatch;
mod error;
mod fault;
mod invoker;
mod request;
mod response;
mod retry;
mod transport;

#[cfg(test)]
mod testing;

pub use candidates::{CandidateSampler, MAX_MS_CANDIDATES};
pub use config::{
    normalize_addr, ConfigError, ControlConfig, RetryConfig, TransportConfig, DEFAULT_PORT,
    DEFAULT_SYSTEM_NAME,
};
pub use dispatch::{Dispatcher, HostStream};
pub use error::ControlError;
pub use fault::{classify, is_conn_err, is_retryable_conn_err, Fault, FaultCode};
pub use invoker::Invoker;
pub use request::{
    Connection, Request, RetryHookFn, RetryOutcome, RetryPolicy, RetryTestFn, RpcFn,
};
pub use response::{collect, HostErrorsMap, HostResponse, UnaryResponse};
pub use retry::{backoff_delay, is_transient};
pub use transport::{Channel, Connector, TcpChannel, TcpConnector};
