//! The request contract: what to call, where, for how long, and how to retry.
//!
//! A [`Request`] carries the invocation closure plus everything the invoker
//! needs to route it. Retry behavior lives in an explicit [`RetryPolicy`];
//! every field is optional and falls back to the invoker's configuration.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::ControlError;
use crate::transport::Channel;

/// An open connection handed to a request's invocation closure.
pub type Connection = Box<dyn Channel>;

/// The invocation closure: performs the call over an open connection.
pub type RpcFn =
    Arc<dyn Fn(Connection) -> BoxFuture<'static, Result<Bytes, ControlError>> + Send + Sync>;

/// Decides whether a failed attempt may be retried. Receives the error and
/// the number of the attempt that produced it (starting at 1).
pub type RetryTestFn = Arc<dyn Fn(&ControlError, u32) -> bool + Send + Sync>;

/// Runs before a retry the request's own policy allowed.
pub type RetryHookFn =
    Arc<dyn Fn(CancellationToken, u32) -> BoxFuture<'static, RetryOutcome> + Send + Sync>;

/// What a retry hook wants the engine to do next.
#[derive(Debug)]
pub enum RetryOutcome {
    /// No special handling; restart leader discovery and back off.
    Proceed,
    /// Stop retrying and return the current aggregated response.
    Finish,
    /// Stop retrying and fail with this error.
    Abort(ControlError),
}

/// Per-request retry policy.
#[derive(Clone, Default)]
pub struct RetryPolicy {
    test: Option<RetryTestFn>,
    hook: Option<RetryHookFn>,
    interval: Option<Duration>,
    max_tries: Option<u32>,
    attempt_timeout: Option<Duration>,
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only retry errors the predicate accepts.
    pub fn retry_if<F>(mut self, test: F) -> Self
    where
        F: Fn(&ControlError, u32) -> bool + Send + Sync + 'static,
    {
        self.test = Some(Arc::new(test));
        self
    }

    /// Runs `hook` before each retry the predicate allowed.
    pub fn on_retry<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(CancellationToken, u32) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = RetryOutcome> + Send + 'static,
    {
        self.hook = Some(Arc::new(move |cancel, attempt| hook(cancel, attempt).boxed()));
        self
    }

    /// Base backoff interval, overriding the configured one.
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    /// Gives up after this many attempts.
    pub fn max_tries(mut self, tries: u32) -> Self {
        self.max_tries = Some(tries);
        self
    }

    /// Time budget for a single attempt, overriding the configured one.
    pub fn attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("test", &self.test.is_some())
            .field("hook", &self.hook.is_some())
            .field("interval", &self.interval)
            .field("max_tries", &self.max_tries)
            .field("attempt_timeout", &self.attempt_timeout)
            .finish()
    }
}

/// One logical control-plane call.
///
/// The host list is rewritten while a management request follows leader
/// redirects, which is why invocation takes the request by `&mut`.
pub struct Request {
    hosts: Vec<String>,
    sys: Option<String>,
    deadline: Option<Instant>,
    ms: bool,
    rpc: RpcFn,
    retry: RetryPolicy,
}

impl Request {
    /// Creates a request from an invocation closure.
    pub fn new<F, Fut>(rpc: F) -> Self
    where
        F: Fn(Connection) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Bytes, ControlError>> + Send + 'static,
    {
        Self {
            hosts: Vec::new(),
            sys: None,
            deadline: None,
            ms: false,
            rpc: Arc::new(move |conn| rpc(conn).boxed()),
            retry: RetryPolicy::default(),
        }
    }

    /// Creates a request that sends `body` to `method` and returns the reply.
    pub fn call(method: impl Into<String>, body: impl Into<Bytes>) -> Self {
        let method: Arc<str> = Arc::from(method.into());
        let body: Bytes = body.into();
        Self::new(move |mut conn: Connection| {
            let method = Arc::clone(&method);
            let body = body.clone();
            async move { conn.call(&method, body).await }
        })
    }

    /// Marks the request as bound for the management service.
    pub fn management(mut self) -> Self {
        self.ms = true;
        self
    }

    pub fn with_hosts(mut self, hosts: Vec<String>) -> Self {
        self.hosts = hosts;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.set_timeout(timeout);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_sys(mut self, sys: impl Into<String>) -> Self {
        self.sys = Some(sys.into());
        self
    }

    /// Explicit targets. Empty means "use the configured host list".
    pub fn target_hosts(&self) -> &[String] {
        &self.hosts
    }

    pub fn set_target_hosts(&mut self, hosts: Vec<String>) {
        self.hosts = hosts;
    }

    pub fn is_management_request(&self) -> bool {
        self.ms
    }

    pub fn sys(&self) -> Option<&str> {
        self.sys.as_deref()
    }

    pub fn set_sys(&mut self, sys: impl Into<String>) {
        self.sys = Some(sys.into());
    }

    /// Point by which the whole call, retries included, must finish.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn set_deadline(&mut self, deadline: Instant) {
        self.deadline = Some(deadline);
    }

    /// Sets the deadline to `timeout` from now.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.deadline = Some(Instant::now() + timeout);
    }

    /// Whether the request's policy allows retrying after `err`.
    ///
    /// Without a predicate, management requests retry and everything else
    /// doesn't.
    pub fn can_retry(&self, err: &ControlError, attempt: u32) -> bool {
        match &self.retry.test {
            Some(test) => test(err, attempt),
            None => self.ms,
        }
    }

    /// Runs the retry hook, if one is set.
    pub async fn on_retry(&self, cancel: &CancellationToken, attempt: u32) -> RetryOutcome {
        match &self.retry.hook {
            Some(hook) => hook(cancel.clone(), attempt).await,
            None => RetryOutcome::Proceed,
        }
    }

    /// Base backoff interval: the policy's, or `default` if it has none.
    pub fn retry_after(&self, default: Duration) -> Duration {
        self.retry.interval.unwrap_or(default)
    }

    /// Per-attempt time budget, if the policy sets one.
    pub fn retry_timeout(&self) -> Option<Duration> {
        self.retry.attempt_timeout
    }

    pub fn max_tries(&self) -> Option<u32> {
        self.retry.max_tries
    }

    pub(crate) fn rpc(&self) -> RpcFn {
        Arc::clone(&self.rpc)
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("hosts", &self.hosts)
            .field("sys", &self.sys)
            .field("deadline", &self.deadline)
            .field("ms", &self.ms)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}
