//! In-memory transport for unit tests.
//!
//! A [`ScriptedConnector`] answers each host from a script keyed by the
//! number of times that host has been called, and records every call so
//! tests can assert where each attempt went.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::time::Instant;

use crate::error::ControlError;
use crate::request::Connection;
use crate::transport::{Channel, Connector};

/// How a scripted host answers one call.
pub(crate) enum Reply {
    Ok(Bytes),
    Err(ControlError),
    Delay(Duration, Bytes),
    Hang,
}

impl Reply {
    pub(crate) fn ok(payload: &'static str) -> Self {
        Reply::Ok(Bytes::from_static(payload.as_bytes()))
    }

    pub(crate) fn err(err: impl Into<ControlError>) -> Self {
        Reply::Err(err.into())
    }
}

type Script = Arc<dyn Fn(usize) -> Reply + Send + Sync>;

/// Returns `n` distinct host addresses.
pub(crate) fn hosts(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("10.0.0.{}:10001", i + 1)).collect()
}

#[derive(Default)]
pub(crate) struct ScriptedConnector {
    scripts: HashMap<String, Script>,
    calls: Mutex<Vec<(String, Instant)>>,
    live: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl ScriptedConnector {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Every host in `addrs` answers with its own address.
    pub(crate) fn always_ok(addrs: &[String]) -> Self {
        addrs.iter().fold(Self::new(), |c, addr| {
            let payload = Bytes::from(addr.clone());
            c.host(addr, move |_| Reply::Ok(payload.clone()))
        })
    }

    /// Every host in `addrs` answers with its own address after `delay`.
    pub(crate) fn slow_ok(addrs: &[String], delay: Duration) -> Self {
        addrs.iter().fold(Self::new(), |c, addr| {
            let payload = Bytes::from(addr.clone());
            c.host(addr, move |_| Reply::Delay(delay, payload.clone()))
        })
    }

    /// Scripts `addr`. The closure receives how many calls the host has
    /// already served.
    pub(crate) fn host<F>(mut self, addr: &str, script: F) -> Self
    where
        F: Fn(usize) -> Reply + Send + Sync + 'static,
    {
        self.scripts.insert(addr.to_string(), Arc::new(script));
        self
    }

    /// Addresses contacted, in order.
    pub(crate) fn calls(&self) -> Vec<String> {
        self.lock_calls().iter().map(|(addr, _)| addr.clone()).collect()
    }

    /// Instants at which each call was made.
    pub(crate) fn call_times(&self) -> Vec<Instant> {
        self.lock_calls().iter().map(|(_, at)| *at).collect()
    }

    /// Number of channels currently open.
    pub(crate) fn live(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.live)
    }

    /// Highest number of channels open at once.
    pub(crate) fn peak_live(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn lock_calls(&self) -> std::sync::MutexGuard<'_, Vec<(String, Instant)>> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, addr: &str, _sys: &str) -> Result<Connection, ControlError> {
        let served = {
            let mut calls = self.lock_calls();
            let served = calls.iter().filter(|(a, _)| a == addr).count();
            calls.push((addr.to_string(), Instant::now()));
            served
        };

        let Some(script) = self.scripts.get(addr) else {
            return Err(ControlError::Transport(format!(
                "dial tcp {addr}: connect: connection refused"
            )));
        };

        let now = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        Ok(Box::new(ScriptedChannel {
            addr: addr.to_string(),
            reply: Some(script(served)),
            _live: LiveGuard(Arc::clone(&self.live)),
        }))
    }
}

struct LiveGuard(Arc<AtomicUsize>);

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

struct ScriptedChannel {
    addr: String,
    reply: Option<Reply>,
    _live: LiveGuard,
}

#[async_trait]
impl Channel for ScriptedChannel {
    fn addr(&self) -> &str {
        &self.addr
    }

    async fn call(&mut self, _method: &str, _body: Bytes) -> Result<Bytes, ControlError> {
        match self.reply.take() {
            Some(Reply::Ok(payload)) => Ok(payload),
            Some(Reply::Err(err)) => Err(err),
            Some(Reply::Delay(delay, payload)) => {
                tokio::time::sleep(delay).await;
                Ok(payload)
            }
            Some(Reply::Hang) => std::future::pending().await,
            None => Err(ControlError::Transport("transport is closing".into())),
        }
    }
}
