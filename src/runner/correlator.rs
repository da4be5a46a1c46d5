//! Pending-request table for out-of-band control requests.
//!
//! The agent answers control requests only at safe points, so responses may
//! arrive late, coalesced, or out of order. The correlator never waits for
//! them: it records each issued request with a deadline and resolves entries
//! strictly by id as answers arrive. Entries whose deadline passes resolve
//! as [`ControlOutcome::TimedOut`]. There is no automatic retry.
//!
//! Every issued request resolves exactly once. Once an entry is removed, a
//! late or duplicate answer for its id is ignored.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::models::control::{ControlKind, ControlOutcome, ControlRequest, ControlResponse};

/// Prefix of runner-issued control request ids.
pub const CONTROL_ID_PREFIX: &str = "ctl-";

#[derive(Debug)]
struct PendingControl {
    request: ControlRequest,
    deadline: Instant,
    resolver: Option<oneshot::Sender<ControlOutcome>>,
}

/// Correlates control requests with their eventual responses.
#[derive(Debug)]
pub struct ControlCorrelator {
    timeout: Duration,
    next_seq: u64,
    pending: HashMap<String, PendingControl>,
}

impl ControlCorrelator {
    /// Create a correlator whose requests time out after `timeout`.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            next_seq: 0,
            pending: HashMap::new(),
        }
    }

    /// Configured request deadline.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Register a new request issued at `now`.
    ///
    /// The returned receiver yields the request's single outcome. Dropping it
    /// is fine; the entry still resolves and is reported by the resolving call.
    pub fn issue(
        &mut self,
        kind: ControlKind,
        now: Instant,
    ) -> (ControlRequest, oneshot::Receiver<ControlOutcome>) {
        self.next_seq += 1;
        let id = format!("{CONTROL_ID_PREFIX}{}", self.next_seq);
        let (tx, rx) = oneshot::channel();

        let request = ControlRequest {
            id: id.clone(),
            kind,
            issued_at: now,
        };
        self.pending.insert(
            id,
            PendingControl {
                request: request.clone(),
                deadline: now + self.timeout,
                resolver: Some(tx),
            },
        );
        (request, rx)
    }

    /// Resolve request `id` with `outcome`.
    ///
    /// Returns `None` when `id` is unknown or already resolved.
    pub fn resolve(&mut self, id: &str, outcome: ControlOutcome) -> Option<ControlResponse> {
        let Some(entry) = self.pending.remove(id) else {
            debug!(
                request_id = id,
                "correlator: response for unknown or resolved request, ignoring"
            );
            return None;
        };
        Some(finish(entry, outcome))
    }

    /// Time out every request whose deadline is at or before `now`.
    ///
    /// Responses are ordered by issue time.
    pub fn expire(&mut self, now: Instant) -> Vec<ControlResponse> {
        let mut expired: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, entry)| entry.deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();
        expired.sort_by_key(|id| self.pending.get(id).map(|e| e.request.issued_at));

        expired
            .into_iter()
            .filter_map(|id| self.pending.remove(&id))
            .map(|entry| {
                warn!(
                    request_id = entry.request.id.as_str(),
                    subtype = entry.request.kind.subtype(),
                    "control request timed out"
                );
                finish(entry, ControlOutcome::TimedOut)
            })
            .collect()
    }

    /// Fail every pending request with `error`, in issue order.
    pub fn fail_all(&mut self, error: &str) -> Vec<ControlResponse> {
        let mut entries: Vec<PendingControl> = self.pending.drain().map(|(_, e)| e).collect();
        entries.sort_by_key(|e| e.request.issued_at);
        entries
            .into_iter()
            .map(|entry| {
                finish(
                    entry,
                    ControlOutcome::Failed {
                        error: error.to_owned(),
                    },
                )
            })
            .collect()
    }

    /// Earliest deadline among pending requests.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|e| e.deadline).min()
    }

    /// Number of unresolved requests.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Whether `id` is still awaiting a response.
    #[must_use]
    pub fn is_pending(&self, id: &str) -> bool {
        self.pending.contains_key(id)
    }
}

fn finish(mut entry: PendingControl, outcome: ControlOutcome) -> ControlResponse {
    if let Some(resolver) = entry.resolver.take() {
        // The caller may have stopped listening.
        let _ = resolver.send(outcome.clone());
    }
    ControlResponse {
        id: entry.request.id,
        kind: entry.request.kind,
        outcome,
    }
}
