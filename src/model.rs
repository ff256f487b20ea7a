//! Domain types — requests, volunteers, assignments, messages.
//!
//! String mappings (`as_str` / `parse_*`) are the canonical DB encodings;
//! unknown values deserialize to a safe default rather than failing the
//! row, matching how the store treats legacy data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Channel / message enums ─────────────────────────────────────────

/// Transport used to reach a volunteer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Sms,
    Push,
    Web,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sms => "sms",
            Self::Push => "push",
            Self::Web => "web",
        }
    }
}

pub fn parse_channel(s: &str) -> Channel {
    match s {
        "push" => Channel::Push,
        "web" => Channel::Web,
        _ => Channel::Sms,
    }
}

/// Message direction relative to the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Incoming,
    Outgoing,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Incoming => "incoming",
            Self::Outgoing => "outgoing",
        }
    }
}

pub fn parse_direction(s: &str) -> Direction {
    match s {
        "incoming" => Direction::Incoming,
        _ => Direction::Outgoing,
    }
}

/// What a message is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Initial assignment offer sent to a volunteer.
    Offer,
    /// Push notification about a changed request.
    Update,
    /// Confirmations, notices, inbound replies.
    Other,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Offer => "offer",
            Self::Update => "update",
            Self::Other => "other",
        }
    }
}

pub fn parse_message_type(s: &str) -> MessageType {
    match s {
        "offer" => MessageType::Offer,
        "update" => MessageType::Update,
        _ => MessageType::Other,
    }
}

/// Delivery lifecycle of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageState {
    /// Outgoing, not yet handed to the gateway.
    Pending,
    /// Outgoing, accepted by the gateway.
    Sent,
    /// Incoming, received from the gateway.
    Received,
}

impl MessageState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Received => "received",
        }
    }
}

pub fn parse_message_state(s: &str) -> MessageState {
    match s {
        "sent" => MessageState::Sent,
        "received" => MessageState::Received,
        _ => MessageState::Pending,
    }
}

// ── Assignment state machine ────────────────────────────────────────

/// State of a volunteer's candidacy against a request.
///
/// `AwaitingDispatch → AwaitingResponse` is the single dispatch
/// transition; `Accepted` and `Rejected` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentState {
    AwaitingDispatch,
    AwaitingResponse,
    Accepted,
    Rejected,
}

impl AssignmentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AwaitingDispatch => "awaiting_dispatch",
            Self::AwaitingResponse => "awaiting_response",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
        }
    }

    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Accepted | Self::Rejected)
    }
}

pub fn parse_assignment_state(s: &str) -> AssignmentState {
    match s {
        "awaiting_response" => AssignmentState::AwaitingResponse,
        "accepted" => AssignmentState::Accepted,
        "rejected" => AssignmentState::Rejected,
        _ => AssignmentState::AwaitingDispatch,
    }
}

// ── Entities ────────────────────────────────────────────────────────

/// Organisation a request belongs to. Read-only to the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Organisation {
    pub id: Uuid,
    pub name: String,
}

/// A volunteer who can be offered assignments. Read-only to the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Volunteer {
    pub id: Uuid,
    pub name: String,
    /// E.164 phone number; inbound SMS is matched to a volunteer by it.
    pub phone: String,
    /// Volunteers with push capability are reached over push, not SMS.
    pub push_capable: bool,
}

/// Lifecycle of a request, owned by the surrounding CRUD system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    Open,
    Closed,
}

impl RequestState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }
}

pub fn parse_request_state(s: &str) -> RequestState {
    match s {
        "closed" => RequestState::Closed,
        _ => RequestState::Open,
    }
}

/// A service request volunteers can be matched to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: Uuid,
    pub organisation_id: Uuid,
    /// Short human-readable identifier used in offer texts.
    pub identifier: String,
    /// Free-text description of the help needed.
    pub text: String,
    /// Ceiling on accepted assignments.
    pub required_volunteer_count: u32,
    pub state: RequestState,
    pub fulfillment_date: Option<DateTime<Utc>>,
}

/// A volunteer's candidacy against a specific request.
///
/// Unit of the capacity invariant: per request,
/// `count(Accepted) <= required_volunteer_count` at every committed
/// boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub id: Uuid,
    pub request_id: Uuid,
    pub volunteer_id: Uuid,
    pub state: AssignmentState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A persisted inbound or outbound message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub direction: Direction,
    pub channel: Channel,
    pub message_type: MessageType,
    pub state: MessageState,
    pub text: String,
    pub volunteer_id: Uuid,
    pub request_id: Option<Uuid>,
    /// Coordinator who triggered the message, if any.
    pub creator_id: Option<Uuid>,
    /// Gateway-native id, used to dedup inbound deliveries.
    pub external_id: Option<String>,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn is_read(&self) -> bool {
        self.read_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assignment_state_roundtrip() {
        for state in [
            AssignmentState::AwaitingDispatch,
            AssignmentState::AwaitingResponse,
            AssignmentState::Accepted,
            AssignmentState::Rejected,
        ] {
            assert_eq!(parse_assignment_state(state.as_str()), state);
        }
    }

    #[test]
    fn terminal_states() {
        assert!(AssignmentState::Accepted.is_terminal());
        assert!(AssignmentState::Rejected.is_terminal());
        assert!(!AssignmentState::AwaitingDispatch.is_terminal());
        assert!(!AssignmentState::AwaitingResponse.is_terminal());
    }

    #[test]
    fn unknown_channel_defaults_to_sms() {
        assert_eq!(parse_channel("carrier-pigeon"), Channel::Sms);
    }

    #[test]
    fn message_enums_roundtrip() {
        for channel in [Channel::Sms, Channel::Push, Channel::Web] {
            assert_eq!(parse_channel(channel.as_str()), channel);
        }
        for mt in [MessageType::Offer, MessageType::Update, MessageType::Other] {
            assert_eq!(parse_message_type(mt.as_str()), mt);
        }
        for ms in [
            MessageState::Pending,
            MessageState::Sent,
            MessageState::Received,
        ] {
            assert_eq!(parse_message_state(ms.as_str()), ms);
        }
    }
}
