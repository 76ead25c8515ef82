//! Per-host results and their aggregation.

use std::collections::BTreeMap;

use bytes::Bytes;
use tidepool_protocol::StatusDetail;
use tokio_util::sync::CancellationToken;

use crate::dispatch::HostStream;
use crate::error::ControlError;

/// Error text mapped to the (sorted) hosts that reported it.
pub type HostErrorsMap = BTreeMap<String, Vec<String>>;

/// One host's outcome for one attempt.
#[derive(Debug, Clone)]
pub struct HostResponse {
    pub addr: String,
    pub result: Result<Bytes, ControlError>,
}

impl HostResponse {
    pub fn ok(addr: impl Into<String>, payload: Bytes) -> Self {
        Self {
            addr: addr.into(),
            result: Ok(payload),
        }
    }

    pub fn err(addr: impl Into<String>, err: ControlError) -> Self {
        Self {
            addr: addr.into(),
            result: Err(err),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    pub fn payload(&self) -> Option<&Bytes> {
        self.result.as_ref().ok()
    }

    pub fn error(&self) -> Option<&ControlError> {
        self.result.as_ref().err()
    }
}

/// All host responses for one attempt of a request.
#[derive(Debug, Clone, Default)]
pub struct UnaryResponse {
    responses: Vec<HostResponse>,
    attempt: u32,
    from_ms: bool,
}

impl UnaryResponse {
    pub fn new(responses: Vec<HostResponse>, attempt: u32, from_ms: bool) -> Self {
        Self {
            responses,
            attempt,
            from_ms,
        }
    }

    /// Responses in arrival order.
    pub fn responses(&self) -> &[HostResponse] {
        &self.responses
    }

    pub fn into_responses(self) -> Vec<HostResponse> {
        self.responses
    }

    /// Attempt that produced these responses (starting at 1).
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// True if this is a management-service response.
    pub fn from_ms(&self) -> bool {
        self.from_ms
    }

    pub fn len(&self) -> usize {
        self.responses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
    }

    /// Successful responses, as `(addr, payload)` pairs.
    pub fn successes(&self) -> impl Iterator<Item = (&str, &Bytes)> {
        self.responses
            .iter()
            .filter_map(|r| r.payload().map(|p| (r.addr.as_str(), p)))
    }

    pub fn error_count(&self) -> usize {
        self.responses.iter().filter(|r| !r.is_ok()).count()
    }

    /// Groups failed hosts by error text, for compact reporting.
    pub fn host_errors(&self) -> HostErrorsMap {
        let mut map = HostErrorsMap::new();
        for resp in &self.responses {
            if let Some(err) = resp.error() {
                map.entry(err.to_string()).or_default().push(resp.addr.clone());
            }
        }
        for hosts in map.values_mut() {
            hosts.sort();
        }
        map
    }

    /// Returns the responses ordered by host address.
    pub fn sorted(mut self) -> Self {
        self.responses.sort_by(|a, b| a.addr.cmp(&b.addr));
        self
    }

    /// Returns the management-service payload, or the error that stood in
    /// for it.
    pub fn ms_response(&self) -> Result<&Bytes, ControlError> {
        if !self.from_ms {
            return Err(ControlError::InvalidResponse(
                "response did not come from the management service".into(),
            ));
        }
        if let Some((_, payload)) = self.successes().next() {
            return Ok(payload);
        }
        match self.ms_error() {
            Some(err) => Err(err.clone()),
            None => Err(ControlError::InvalidResponse(
                "no management service response".into(),
            )),
        }
    }

    pub(crate) fn first_success(&self) -> Option<&HostResponse> {
        self.responses.iter().find(|r| r.is_ok())
    }

    /// Picks the error that best explains a failed management attempt.
    ///
    /// Redirects outrank everything else (a hint beats a bare replica
    /// list); remaining ties go to the lowest address.
    pub(crate) fn ms_error(&self) -> Option<&ControlError> {
        self.responses
            .iter()
            .filter_map(|r| r.error().map(|e| (redirect_rank(e), r.addr.as_str(), e)))
            .min_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)))
            .map(|(_, _, err)| err)
    }
}

fn redirect_rank(err: &ControlError) -> u8 {
    match err.status().and_then(|s| s.detail.as_ref()) {
        Some(StatusDetail::NotLeader { leader_hint, .. }) if !leader_hint.is_empty() => 0,
        Some(StatusDetail::NotLeader { .. }) => 1,
        Some(StatusDetail::NotReplica { .. }) => 2,
        _ => 3,
    }
}

/// Drains a dispatch stream until every host has reported or the caller
/// cancels.
pub async fn collect(
    mut stream: HostStream,
    cancel: &CancellationToken,
) -> Result<Vec<HostResponse>, ControlError> {
    let mut responses = Vec::with_capacity(stream.expected());
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ControlError::Canceled),
            next = stream.recv() => match next {
                Some(resp) => responses.push(resp),
                None => return Ok(responses),
            },
        }
    }
}
