//! Error types for Aid Relay.

use uuid::Uuid;

/// Top-level error type for the service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Failed to open store: {0}")]
    Open(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("State conflict: {entity} {id} is not in the expected state")]
    Conflict { entity: &'static str, id: Uuid },
}

/// Messaging gateway errors.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Send over {channel} to {recipient} failed: {reason}")]
    SendFailed {
        channel: String,
        recipient: String,
        reason: String,
    },

    #[error("Inbound poll failed: {reason}")]
    PollFailed { reason: String },

    #[error("Gateway returned HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("HTTP error: {0}")]
    Http(String),
}

/// Matching/response pipeline errors.
///
/// `CapacityExceeded` and `DuplicateResponse` are expected conditions —
/// the processor recovers from them locally by notifying the volunteer.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Request capacity already filled for {organisation}")]
    CapacityExceeded { organisation: String },

    #[error("Assignment {assignment_id} already resolved")]
    DuplicateResponse { assignment_id: Uuid },

    #[error("No assignable request with id {request_id}")]
    AssignmentNotFound { request_id: Uuid },

    #[error("Volunteer {volunteer_id} is not assigned to request {request_id}")]
    Authorisation {
        volunteer_id: Uuid,
        request_id: Uuid,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),
}

/// Result type alias for the service.
pub type Result<T> = std::result::Result<T, Error>;
