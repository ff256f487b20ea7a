//! Unified `Store` trait — single async interface for all persistence.
//!
//! The pipeline consumes this trait; the backend lives in
//! [`crate::store::libsql`]. Tests run against an in-memory instance of
//! the same backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;
use crate::model::{
    Assignment, AssignmentState, Channel, Direction, Message, MessageState, MessageType,
    Organisation, Request, RequestState, Volunteer,
};

/// Fields for a new request row. Creation belongs to the surrounding
/// CRUD system; the pipeline only reads requests.
#[derive(Debug, Clone)]
pub struct NewRequest {
    pub organisation_id: Uuid,
    pub identifier: String,
    pub text: String,
    pub required_volunteer_count: u32,
    pub state: RequestState,
    pub fulfillment_date: Option<DateTime<Utc>>,
}

/// Fields for a new message row.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub direction: Direction,
    pub channel: Channel,
    pub message_type: MessageType,
    pub state: MessageState,
    pub text: String,
    pub volunteer_id: Uuid,
    pub request_id: Option<Uuid>,
    pub creator_id: Option<Uuid>,
    /// Gateway-native id; unique when present, used for inbound dedup.
    pub external_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl NewMessage {
    /// An outgoing notice created by the pipeline itself.
    pub fn outgoing(
        channel: Channel,
        message_type: MessageType,
        text: String,
        volunteer_id: Uuid,
        request_id: Option<Uuid>,
    ) -> Self {
        Self {
            direction: Direction::Outgoing,
            channel,
            message_type,
            state: MessageState::Pending,
            text,
            volunteer_id,
            request_id,
            creator_id: None,
            external_id: None,
            created_at: Utc::now(),
        }
    }
}

/// Backend-agnostic persistence trait covering the whole data model.
#[async_trait]
pub trait Store: Send + Sync {
    // ── Organisations ───────────────────────────────────────────────

    async fn create_organisation(&self, name: &str) -> Result<Organisation, StoreError>;

    async fn get_organisation(&self, id: Uuid) -> Result<Option<Organisation>, StoreError>;

    // ── Volunteers ──────────────────────────────────────────────────

    async fn create_volunteer(
        &self,
        name: &str,
        phone: &str,
        push_capable: bool,
    ) -> Result<Volunteer, StoreError>;

    async fn get_volunteer(&self, id: Uuid) -> Result<Option<Volunteer>, StoreError>;

    /// Resolve an inbound SMS sender to a volunteer.
    async fn volunteer_by_phone(&self, phone: &str) -> Result<Option<Volunteer>, StoreError>;

    // ── Requests ────────────────────────────────────────────────────

    async fn create_request(&self, new: NewRequest) -> Result<Request, StoreError>;

    async fn get_request(&self, id: Uuid) -> Result<Option<Request>, StoreError>;

    // ── Assignments ─────────────────────────────────────────────────

    /// Create an assignment. The (request, volunteer) pair is unique;
    /// a second create for the same pair fails.
    async fn create_assignment(
        &self,
        request_id: Uuid,
        volunteer_id: Uuid,
        state: AssignmentState,
    ) -> Result<Assignment, StoreError>;

    async fn find_assignment(
        &self,
        request_id: Uuid,
        volunteer_id: Uuid,
    ) -> Result<Option<Assignment>, StoreError>;

    /// Assignments of a request, optionally filtered by state.
    async fn assignments_by_request(
        &self,
        request_id: Uuid,
        state: Option<AssignmentState>,
    ) -> Result<Vec<Assignment>, StoreError>;

    /// A volunteer's assignments awaiting a response.
    async fn pending_assignments(&self, volunteer_id: Uuid)
        -> Result<Vec<Assignment>, StoreError>;

    /// A volunteer's assignments in a terminal state.
    async fn resolved_assignments(
        &self,
        volunteer_id: Uuid,
    ) -> Result<Vec<Assignment>, StoreError>;

    async fn count_assignments(
        &self,
        request_id: Uuid,
        state: AssignmentState,
    ) -> Result<u32, StoreError>;

    /// State-guarded transition: succeeds only while the row is still in
    /// `from`. A guard miss returns [`StoreError::Conflict`] (the row
    /// exists but was transitioned by somebody else), or
    /// [`StoreError::NotFound`] when there is no such row.
    async fn transition_assignment(
        &self,
        id: Uuid,
        from: AssignmentState,
        to: AssignmentState,
    ) -> Result<Assignment, StoreError>;

    // ── Messages ────────────────────────────────────────────────────

    async fn create_message(&self, new: NewMessage) -> Result<Message, StoreError>;

    async fn get_message(&self, id: Uuid) -> Result<Option<Message>, StoreError>;

    async fn message_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<Message>, StoreError>;

    /// Incoming messages not yet marked read, oldest first. Used for
    /// startup recovery.
    async fn unread_incoming(&self) -> Result<Vec<Message>, StoreError>;

    async fn mark_message_read(&self, id: Uuid) -> Result<(), StoreError>;

    async fn mark_message_sent(&self, id: Uuid) -> Result<(), StoreError>;
}
