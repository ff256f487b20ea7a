//! Messaging gateway abstraction — pure I/O, no business logic.
//!
//! The dispatcher and processor emit through [`MessagingGateway::send`];
//! the poller drains [`MessagingGateway::poll_inbound`]. Each poll
//! returns whatever is currently available and is not restartable.

pub mod dev;
pub mod http;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;
use crate::model::Channel;

pub use dev::DevGateway;
pub use http::HttpGateway;

/// A raw inbound item as delivered by the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawInbound {
    /// Gateway-native message id, when the provider supplies one.
    pub external_id: Option<String>,
    /// Sender identifier — a phone number for SMS.
    pub sender: String,
    pub text: String,
    pub received_at: DateTime<Utc>,
}

/// Transport seam to the SMS/push provider.
#[async_trait]
pub trait MessagingGateway: Send + Sync {
    /// Send one text to one recipient over the given channel.
    async fn send(
        &self,
        channel: Channel,
        recipient: &str,
        text: &str,
    ) -> Result<(), GatewayError>;

    /// Drain currently available inbound messages. Finite per call.
    async fn poll_inbound(&self) -> Result<Vec<RawInbound>, GatewayError>;
}
