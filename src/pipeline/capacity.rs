//! Capacity-constrained state transition — the concurrency-critical core.
//!
//! Two volunteers may reply "ano" within the same millisecond. Without
//! serialization both would read `accepted < required` and both would be
//! accepted, breaking the capacity invariant. The count-then-write
//! therefore runs under a per-request async lock; unrelated requests
//! proceed in parallel.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;
use uuid::Uuid;

use crate::error::StoreError;
use crate::model::{Assignment, AssignmentState};
use crate::pipeline::reply::ReplyIntent;
use crate::store::Store;

/// Outcome of applying a reply to one assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseOutcome {
    Accepted,
    Rejected,
    /// Accept arrived after capacity filled; assignment untouched.
    OverCapacity,
    /// Assignment was no longer awaiting a response.
    AlreadyResolved,
}

/// Registry of per-request locks.
///
/// Lock granularity is the request, never global. Entries are created on
/// first use and kept — the set of active requests is small and the
/// registry lives as long as the process.
#[derive(Default)]
pub struct RequestLocks {
    inner: StdMutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl RequestLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for a request, waiting if another transition for
    /// the same request is in flight.
    pub async fn lock(&self, request_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().expect("request lock registry poisoned");
            Arc::clone(map.entry(request_id).or_default())
        };
        lock.lock_owned().await
    }
}

/// Apply a parsed reply to one assignment under the request lock.
///
/// The assignment must have been read as `AwaitingResponse`; a racing
/// transition is detected by the store's state guard and reported as
/// `AlreadyResolved` rather than re-running the capacity check.
pub async fn apply_response(
    store: &Arc<dyn Store>,
    locks: &RequestLocks,
    assignment: &Assignment,
    intent: ReplyIntent,
) -> Result<ResponseOutcome, StoreError> {
    let _guard = locks.lock(assignment.request_id).await;

    let to = match intent {
        ReplyIntent::Reject => AssignmentState::Rejected,
        ReplyIntent::Accept => {
            let request = store.get_request(assignment.request_id).await?.ok_or(
                StoreError::NotFound {
                    entity: "request",
                    id: assignment.request_id,
                },
            )?;
            let accepted = store
                .count_assignments(assignment.request_id, AssignmentState::Accepted)
                .await?;
            if accepted >= request.required_volunteer_count {
                debug!(request = %request.id, accepted, "Capacity filled, accept refused");
                return Ok(ResponseOutcome::OverCapacity);
            }
            AssignmentState::Accepted
        }
    };

    match store
        .transition_assignment(assignment.id, AssignmentState::AwaitingResponse, to)
        .await
    {
        Ok(_) => Ok(match intent {
            ReplyIntent::Accept => ResponseOutcome::Accepted,
            ReplyIntent::Reject => ResponseOutcome::Rejected,
        }),
        Err(StoreError::Conflict { .. }) => Ok(ResponseOutcome::AlreadyResolved),
        Err(e) => Err(e),
    }
}
