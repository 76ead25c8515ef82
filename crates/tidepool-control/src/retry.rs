//! Management-service retry and leader discovery.
//!
//! Management requests must reach the MS leader, which the client usually
//! doesn't know. The engine starts from a handful of candidates, follows
//! "not leader" and "not a replica" redirects, and backs off on transient
//! failures until it gets an answer, hits a terminal error, or runs out of
//! time.
//!
//! Attempts are strictly sequential: attempt N is fully classified before
//! attempt N+1 is dispatched.

use std::time::Duration;

use tidepool_protocol::{StatusCode, StatusDetail};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::candidates::CandidateSampler;
use crate::config::{normalize_addr, normalize_hosts, ControlConfig};
use crate::dispatch::Dispatcher;
use crate::error::ControlError;
use crate::fault::{Fault, FaultCode};
use crate::request::{Request, RetryOutcome};
use crate::response::{collect, UnaryResponse};

/// Backoff before the attempt after `attempt`: `base * 2^(attempt-1)`,
/// capped at `cap`.
pub fn backoff_delay(base: Duration, cap: Duration, attempt: u32) -> Duration {
    let shift = attempt.saturating_sub(1).min(31);
    base.checked_mul(1 << shift).unwrap_or(cap).min(cap)
}

/// Returns true for errors that may clear up if the same hosts are asked
/// again: inner timeouts, unavailable-class statuses, transient MS states
/// and retryable connection faults.
pub fn is_transient(err: &ControlError) -> bool {
    match err {
        ControlError::DeadlineExceeded => true,
        ControlError::Status(status) => {
            status.is_transient_ms_state()
                || matches!(
                    status.code,
                    StatusCode::Unavailable | StatusCode::DeadlineExceeded
                )
        }
        ControlError::Fault(fault) => {
            fault.is_retryable_connection() || fault.code == FaultCode::ConnectionTimedOut
        }
        _ => false,
    }
}

/// What the engine does after a failed attempt.
enum Next {
    /// Dispatch again to these hosts after backing off.
    Retry(Vec<String>),
    /// Stop and hand back the attempt's aggregated response.
    Return,
}

/// Drives one management request to completion.
pub(crate) struct RetryEngine<'a> {
    pub(crate) dispatcher: &'a Dispatcher,
    pub(crate) sampler: &'a CandidateSampler,
    pub(crate) config: &'a ControlConfig,
}

impl RetryEngine<'_> {
    pub(crate) async fn run(
        &self,
        cancel: &CancellationToken,
        req: &mut Request,
    ) -> Result<UnaryResponse, ControlError> {
        let started = Instant::now();
        let sys = req.sys().unwrap_or(&self.config.name).to_string();
        let rpc = req.rpc();

        let base = req.retry_after(self.config.retry.base_interval());
        let cap = self.config.retry.max_interval().max(base);
        let attempt_timeout = req
            .retry_timeout()
            .or_else(|| self.config.retry.attempt_timeout());

        let start_hosts = self.select_candidates(req)?;
        req.set_target_hosts(start_hosts.clone());

        let mut attempt: u32 = 1;
        loop {
            let deadline = attempt_deadline(req.deadline(), attempt_timeout);
            debug!(attempt, hosts = ?req.target_hosts(), "sending management request");

            let stream =
                self.dispatcher
                    .dispatch(rpc.clone(), &sys, req.target_hosts(), cancel, deadline)?;
            let ur = UnaryResponse::new(collect(stream, cancel).await?, attempt, true);

            if cancel.is_cancelled() {
                return Err(ControlError::Canceled);
            }
            if let Some(resp) = ur.first_success() {
                let resp = resp.clone();
                debug!(attempt, addr = %resp.addr, "management request succeeded");
                req.set_target_hosts(vec![resp.addr.clone()]);
                return Ok(UnaryResponse::new(vec![resp], attempt, true));
            }
            if req.deadline().is_some_and(|d| Instant::now() >= d) {
                warn!(attempt, "management request ran out of time");
                return Err(Fault::request_timeout(started.elapsed()).into());
            }

            let Some(err) = ur.ms_error().cloned() else {
                return Ok(ur);
            };
            if err.is_unimplemented() {
                return Err(err);
            }

            let next = match self.redirect(&err) {
                Some(hosts) => Next::Retry(hosts),
                None if req.can_retry(&err, attempt) => {
                    // the hook only runs when another attempt will follow
                    check_tries(req, attempt, &err)?;
                    match req.on_retry(cancel, attempt).await {
                        RetryOutcome::Proceed => Next::Retry(start_hosts.clone()),
                        RetryOutcome::Finish => Next::Return,
                        RetryOutcome::Abort(e) => return Err(e),
                    }
                }
                None if is_transient(&err) => Next::Retry(req.target_hosts().to_vec()),
                None => Next::Return,
            };
            let hosts = match next {
                Next::Retry(hosts) => hosts,
                Next::Return => {
                    debug!(attempt, "management request finished with errors: {err}");
                    return Ok(ur);
                }
            };

            check_tries(req, attempt, &err)?;
            req.set_target_hosts(hosts);

            let delay = backoff_delay(base, cap, attempt);
            debug!(attempt, ?delay, "backing off: {err}");
            self.backoff(cancel, req.deadline(), delay, started).await?;
            attempt += 1;
        }
    }

    /// Explicit targets if the request names any, otherwise a random
    /// sample of the configured host list.
    fn select_candidates(&self, req: &Request) -> Result<Vec<String>, ControlError> {
        let hosts = if req.target_hosts().is_empty() {
            self.sampler.sample(&self.config.hosts()?)
        } else {
            normalize_hosts(req.target_hosts(), self.config.port)?
        };
        if hosts.is_empty() {
            return Err(ControlError::NoHosts);
        }
        Ok(hosts)
    }

    /// Hosts a redirect points at, if `err` is one and names any.
    fn redirect(&self, err: &ControlError) -> Option<Vec<String>> {
        let (hint, replicas) = match err.status()?.detail.as_ref()? {
            StatusDetail::NotLeader {
                leader_hint,
                replicas,
            } => (leader_hint.as_str(), replicas),
            StatusDetail::NotReplica { replicas } => ("", replicas),
            _ => return None,
        };

        let hosts = if hint.is_empty() {
            replicas
                .iter()
                .filter_map(|addr| self.redirect_addr(addr))
                .collect::<Vec<_>>()
        } else {
            self.redirect_addr(hint).into_iter().collect()
        };
        if hosts.is_empty() {
            return None;
        }

        info!(hosts = ?hosts, "following management service redirect");
        Some(hosts)
    }

    fn redirect_addr(&self, addr: &str) -> Option<String> {
        normalize_addr(addr, self.config.port)
            .inspect_err(|e| warn!("ignoring redirect target: {e}"))
            .ok()
    }

    /// Sleeps for `delay`, waking early for cancellation. A sleep that
    /// would run past `deadline` is cut short there and ends the request.
    async fn backoff(
        &self,
        cancel: &CancellationToken,
        deadline: Option<Instant>,
        delay: Duration,
        started: Instant,
    ) -> Result<(), ControlError> {
        let wake = Instant::now() + delay;
        let (wake, expires) = match deadline {
            Some(deadline) if wake >= deadline => (deadline, true),
            _ => (wake, false),
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ControlError::Canceled),
            _ = tokio::time::sleep_until(wake) => {}
        }

        if expires {
            warn!("management request ran out of time while backing off");
            return Err(Fault::request_timeout(started.elapsed()).into());
        }
        Ok(())
    }
}

/// Fails with [`ControlError::RetriesExhausted`] once `attempt` reaches the
/// request's max-tries limit.
fn check_tries(req: &Request, attempt: u32, err: &ControlError) -> Result<(), ControlError> {
    match req.max_tries() {
        Some(max) if attempt >= max => {
            warn!(attempt, "management request gave up: {err}");
            Err(ControlError::RetriesExhausted {
                tries: attempt,
                last: Box::new(err.clone()),
            })
        }
        _ => Ok(()),
    }
}

/// The earlier of the request deadline and the end of the per-attempt
/// budget.
fn attempt_deadline(deadline: Option<Instant>, attempt_timeout: Option<Duration>) -> Option<Instant> {
    let attempt = attempt_timeout.map(|t| Instant::now() + t);
    match (deadline, attempt) {
        (Some(d), Some(a)) => Some(d.min(a)),
        (d, a) => d.or(a),
    }
}
