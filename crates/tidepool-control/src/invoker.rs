//! Entry point for sending control-plane requests.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::candidates::CandidateSampler;
use crate::config::{normalize_hosts, ControlConfig};
use crate::dispatch::Dispatcher;
use crate::error::ControlError;
use crate::request::Request;
use crate::response::{collect, UnaryResponse};
use crate::retry::RetryEngine;
use crate::transport::{Connector, TcpConnector};

/// Sends requests to control-plane servers.
///
/// One invoker is meant to be shared by every request a tool makes; it is
/// `Send + Sync` and all of its methods take `&self`.
pub struct Invoker {
    config: Arc<ControlConfig>,
    dispatcher: Dispatcher,
    sampler: CandidateSampler,
}

impl Invoker {
    /// Creates an invoker that talks to servers over TCP.
    pub fn new(config: ControlConfig) -> Self {
        let connector = Arc::new(TcpConnector::new(&config.transport));
        Self::with_connector(config, connector)
    }

    /// Creates an invoker over a custom transport.
    pub fn with_connector(config: ControlConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            dispatcher: Dispatcher::new(connector, config.max_inflight),
            sampler: CandidateSampler::new(config.retry.max_candidates),
            config: Arc::new(config),
        }
    }

    /// Makes candidate sampling deterministic.
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.sampler = CandidateSampler::seeded(self.config.retry.max_candidates, seed);
        self
    }

    pub fn config(&self) -> &ControlConfig {
        &self.config
    }

    /// Sends `req` and returns the aggregated response.
    ///
    /// Management requests go through leader discovery and retry; on
    /// success the request's host list names the host that answered.
    /// Everything else is sent once to every target host, and per-host
    /// failures are reported inside the response rather than as an error.
    pub async fn invoke(
        &self,
        cancel: &CancellationToken,
        req: &mut Request,
    ) -> Result<UnaryResponse, ControlError> {
        if req.deadline().is_none() {
            req.set_timeout(self.config.request_timeout());
        }

        if req.is_management_request() {
            let engine = RetryEngine {
                dispatcher: &self.dispatcher,
                sampler: &self.sampler,
                config: &self.config,
            };
            return engine.run(cancel, req).await;
        }

        let hosts = self.resolve_hosts(req)?;
        let sys = req.sys().unwrap_or(&self.config.name).to_string();
        debug!(hosts = hosts.len(), "sending request");

        let stream = self
            .dispatcher
            .dispatch(req.rpc(), &sys, &hosts, cancel, req.deadline())?;
        let responses = collect(stream, cancel).await?;
        Ok(UnaryResponse::new(responses, 1, false))
    }

    /// Explicit targets if the request names any, else the configured host
    /// list.
    fn resolve_hosts(&self, req: &Request) -> Result<Vec<String>, ControlError> {
        let hosts = if req.target_hosts().is_empty() {
            self.config.hosts()?
        } else {
            normalize_hosts(req.target_hosts(), self.config.port)?
        };
        if hosts.is_empty() {
            return Err(ControlError::NoHosts);
        }
        Ok(hosts)
    }
}
