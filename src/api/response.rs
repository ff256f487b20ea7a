//! Volunteer response service — the web counterparts of the SMS reply.
//!
//! `respond` is the authenticated accept/reject; `self_accept` is the
//! public path for open requests, which records a regular incoming web
//! message and lets the normal processor resolve it.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{PipelineError, StoreError};
use crate::model::{
    AssignmentState, Channel, Direction, MessageState, MessageType, Request, RequestState,
};
use crate::pipeline::capacity::{RequestLocks, ResponseOutcome, apply_response};
use crate::pipeline::reply::ReplyIntent;
use crate::store::{NewMessage, Store};

/// Handles volunteer responses arriving over the web channel.
pub struct ResponseService {
    store: Arc<dyn Store>,
    locks: Arc<RequestLocks>,
    /// Worker queue shared with the poller.
    queue: mpsc::UnboundedSender<Uuid>,
}

impl ResponseService {
    pub fn new(
        store: Arc<dyn Store>,
        locks: Arc<RequestLocks>,
        queue: mpsc::UnboundedSender<Uuid>,
    ) -> Self {
        Self {
            store,
            locks,
            queue,
        }
    }

    /// Accept or reject an existing assignment on behalf of a volunteer.
    ///
    /// The volunteer must already be assigned to the request; a terminal
    /// assignment is reported as a duplicate, an over-capacity accept
    /// as `CapacityExceeded`.
    pub async fn respond(
        &self,
        volunteer_id: Uuid,
        request_id: Uuid,
        accept: bool,
    ) -> Result<ResponseOutcome, PipelineError> {
        let request = self.assignable_request(request_id).await?;

        let assignment = self
            .store
            .find_assignment(request_id, volunteer_id)
            .await?
            .ok_or(PipelineError::Authorisation {
                volunteer_id,
                request_id,
            })?;

        if assignment.state.is_terminal() {
            return Err(PipelineError::DuplicateResponse {
                assignment_id: assignment.id,
            });
        }

        // Responding before dispatch counts as having seen the offer.
        let assignment = if assignment.state == AssignmentState::AwaitingDispatch {
            self.store
                .transition_assignment(
                    assignment.id,
                    AssignmentState::AwaitingDispatch,
                    AssignmentState::AwaitingResponse,
                )
                .await?
        } else {
            assignment
        };

        let intent = if accept {
            ReplyIntent::Accept
        } else {
            ReplyIntent::Reject
        };
        let outcome = apply_response(&self.store, &self.locks, &assignment, intent).await?;

        if outcome == ResponseOutcome::OverCapacity {
            let organisation = self
                .store
                .get_organisation(request.organisation_id)
                .await?
                .map(|o| o.name)
                .unwrap_or_default();
            return Err(PipelineError::CapacityExceeded { organisation });
        }

        info!(%volunteer_id, %request_id, ?outcome, "Web response applied");
        Ok(outcome)
    }

    /// A volunteer claims an open request from the public listing.
    ///
    /// Creates the assignment if missing, places it in awaiting-response
    /// and records an incoming web message with the accept literal; the
    /// response processor resolves it like any other reply.
    pub async fn self_accept(
        &self,
        volunteer_id: Uuid,
        request_id: Uuid,
    ) -> Result<(), PipelineError> {
        let request = self.assignable_request(request_id).await?;

        let assignment = match self.store.find_assignment(request.id, volunteer_id).await? {
            Some(assignment) => assignment,
            None => {
                self.store
                    .create_assignment(request.id, volunteer_id, AssignmentState::AwaitingResponse)
                    .await?
            }
        };

        match assignment.state {
            AssignmentState::Accepted => {
                warn!(%volunteer_id, %request_id, "Request already accepted once");
                return Err(PipelineError::DuplicateResponse {
                    assignment_id: assignment.id,
                });
            }
            AssignmentState::AwaitingDispatch => {
                self.store
                    .transition_assignment(
                        assignment.id,
                        AssignmentState::AwaitingDispatch,
                        AssignmentState::AwaitingResponse,
                    )
                    .await?;
            }
            _ => {}
        }

        let message = self
            .store
            .create_message(NewMessage {
                direction: Direction::Incoming,
                channel: Channel::Web,
                message_type: MessageType::Other,
                state: MessageState::Received,
                text: "Ano".to_string(),
                volunteer_id,
                request_id: Some(request.id),
                creator_id: None,
                external_id: None,
                created_at: Utc::now(),
            })
            .await?;

        let _ = self.queue.send(message.id);
        info!(%volunteer_id, %request_id, message = %message.id, "Self-accept recorded");
        Ok(())
    }

    /// Load a request that can still take volunteers.
    async fn assignable_request(&self, request_id: Uuid) -> Result<Request, PipelineError> {
        let request = match self.store.get_request(request_id).await? {
            Some(request) if request.state == RequestState::Open => request,
            _ => return Err(PipelineError::AssignmentNotFound { request_id }),
        };
        Ok(request)
    }
}
