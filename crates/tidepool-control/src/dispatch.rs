//! Concurrent fan-out of one request to many hosts.
//!
//! Each host gets its own task. Results stream back over a bounded
//! channel; a driver task joins every host task and closes the stream once
//! all of them have reported. When the caller cancels, host tasks stop
//! waiting on the network and drop their result rather than block on a
//! channel nobody reads.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, trace, warn};

use crate::error::ControlError;
use crate::fault::classify;
use crate::request::RpcFn;
use crate::response::HostResponse;
use crate::transport::Connector;

/// Stream of per-host results from one dispatch.
///
/// Dropping the stream cancels any host task still running.
pub struct HostStream {
    rx: mpsc::Receiver<HostResponse>,
    expected: usize,
    _guard: DropGuard,
}

impl HostStream {
    /// Next host result, or `None` once every host has reported.
    pub async fn recv(&mut self) -> Option<HostResponse> {
        self.rx.recv().await
    }

    /// Number of hosts the request was dispatched to.
    pub fn expected(&self) -> usize {
        self.expected
    }
}

/// Fans requests out over a [`Connector`].
pub struct Dispatcher {
    connector: Arc<dyn Connector>,
    max_inflight: usize,
}

impl Dispatcher {
    pub fn new(connector: Arc<dyn Connector>, max_inflight: usize) -> Self {
        Self {
            connector,
            max_inflight: max_inflight.max(1),
        }
    }

    /// Starts `rpc` against every host in `hosts`.
    ///
    /// Every host produces exactly one [`HostResponse`] unless `cancel`
    /// fires first. Hosts still running at `deadline` report
    /// [`ControlError::DeadlineExceeded`].
    pub fn dispatch(
        &self,
        rpc: RpcFn,
        sys: &str,
        hosts: &[String],
        cancel: &CancellationToken,
        deadline: Option<Instant>,
    ) -> Result<HostStream, ControlError> {
        if hosts.is_empty() {
            return Err(ControlError::NoHosts);
        }

        let (tx, rx) = mpsc::channel(hosts.len());
        let cancel = cancel.child_token();
        let limit = Arc::new(Semaphore::new(self.max_inflight));
        let sys: Arc<str> = Arc::from(sys);

        let mut tasks = JoinSet::new();
        let mut addrs = HashMap::with_capacity(hosts.len());
        for addr in hosts {
            let unit = HostCall {
                connector: Arc::clone(&self.connector),
                rpc: Arc::clone(&rpc),
                sys: Arc::clone(&sys),
                addr: addr.clone(),
                deadline,
                limit: Arc::clone(&limit),
            };
            let handle = tasks.spawn(unit.run(tx.clone(), cancel.clone()));
            addrs.insert(handle.id(), addr.clone());
        }
        trace!(hosts = hosts.len(), "dispatched");

        // join barrier: the stream closes when the last sender drops here
        let driver_cancel = cancel.clone();
        tokio::spawn(async move {
            while let Some(joined) = tasks.join_next().await {
                let Err(e) = joined else { continue };
                let Some(addr) = addrs.remove(&e.id()) else {
                    continue;
                };
                warn!(%addr, "host task failed: {e}");
                let resp = HostResponse::err(
                    addr.clone(),
                    ControlError::TaskFailed {
                        addr,
                        reason: e.to_string(),
                    },
                );
                send_or_abandon(&tx, resp, &driver_cancel).await;
            }
        });

        Ok(HostStream {
            rx,
            expected: hosts.len(),
            _guard: cancel.drop_guard(),
        })
    }
}

/// Everything one host task needs.
struct HostCall {
    connector: Arc<dyn Connector>,
    rpc: RpcFn,
    sys: Arc<str>,
    addr: String,
    deadline: Option<Instant>,
    limit: Arc<Semaphore>,
}

impl HostCall {
    async fn run(self, tx: mpsc::Sender<HostResponse>, cancel: CancellationToken) {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ControlError::Canceled),
            result = self.call() => result,
        };

        let result = result.map_err(|e| classify(e, &self.addr));
        if let Err(e) = &result {
            debug!(addr = %self.addr, "host call failed: {e}");
        }
        send_or_abandon(&tx, HostResponse { addr: self.addr, result }, &cancel).await;
    }

    async fn call(&self) -> Result<Bytes, ControlError> {
        let work = async {
            let _permit = Arc::clone(&self.limit)
                .acquire_owned()
                .await
                .map_err(|_| ControlError::Canceled)?;
            let conn = self.connector.connect(&self.addr, &self.sys).await?;
            (self.rpc)(conn).await
        };

        match self.deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, work)
                .await
                .unwrap_or(Err(ControlError::DeadlineExceeded)),
            None => work.await,
        }
    }
}

/// Sends `resp`, unless the caller gives up first.
async fn send_or_abandon(
    tx: &mpsc::Sender<HostResponse>,
    resp: HostResponse,
    cancel: &CancellationToken,
) {
    let addr = resp.addr.clone();
    tokio::select! {
        sent = tx.send(resp) => {
            if sent.is_err() {
                trace!(%addr, "result receiver gone");
            }
        }
        _ = cancel.cancelled() => {
            debug!(%addr, "call abandoned, dropping host result");
        }
    }
}
