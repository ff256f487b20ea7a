//! Messenger — one outbound path for every component.
//!
//! Persists the outgoing message first, then hands it to the gateway and
//! marks it sent. A gateway failure leaves the row in `Pending` so the
//! surrounding unit of work can be retried without losing the text.

use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::PipelineError;
use crate::gateway::MessagingGateway;
use crate::model::{Channel, Message, MessageType, Volunteer};
use crate::store::{NewMessage, Store};

/// Resolve the channel for a volunteer: push when capable, else SMS.
pub fn resolve_channel(volunteer: &Volunteer) -> Channel {
    if volunteer.push_capable {
        Channel::Push
    } else {
        Channel::Sms
    }
}

/// Gateway recipient address for a volunteer on a channel.
fn recipient(volunteer: &Volunteer, channel: Channel) -> String {
    match channel {
        Channel::Push => volunteer.id.to_string(),
        _ => volunteer.phone.clone(),
    }
}

/// Creates outgoing message rows and delivers them through the gateway.
pub struct Messenger {
    store: Arc<dyn Store>,
    gateway: Arc<dyn MessagingGateway>,
}

impl Messenger {
    pub fn new(store: Arc<dyn Store>, gateway: Arc<dyn MessagingGateway>) -> Self {
        Self { store, gateway }
    }

    /// Persist and deliver one outgoing message to a volunteer.
    ///
    /// Returns the persisted message; its state is `Sent` on success and
    /// still `Pending` when delivery failed (the error is propagated).
    pub async fn send_outbound(
        &self,
        channel: Channel,
        message_type: MessageType,
        text: String,
        volunteer: &Volunteer,
        request_id: Option<Uuid>,
        creator_id: Option<Uuid>,
    ) -> Result<Message, PipelineError> {
        let mut new = NewMessage::outgoing(channel, message_type, text, volunteer.id, request_id);
        new.creator_id = creator_id;

        let message = self.store.create_message(new).await?;

        match self
            .gateway
            .send(channel, &recipient(volunteer, channel), &message.text)
            .await
        {
            Ok(()) => {
                self.store.mark_message_sent(message.id).await?;
                debug!(id = %message.id, channel = channel.as_str(), "Outbound delivered");
                Ok(message)
            }
            Err(e) => {
                warn!(id = %message.id, error = %e, "Outbound delivery failed, left pending");
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::DevGateway;
    use crate::model::MessageState;
    use crate::store::LibSqlStore;

    async fn setup() -> (Arc<LibSqlStore>, Arc<DevGateway>, Messenger) {
        let store = Arc::new(LibSqlStore::new_memory().await.unwrap());
        let gateway = Arc::new(DevGateway::new());
        let messenger = Messenger::new(store.clone(), gateway.clone());
        (store, gateway, messenger)
    }

    #[tokio::test]
    async fn channel_resolution_prefers_push() {
        let push_vol = Volunteer {
            id: Uuid::new_v4(),
            name: "Jana".into(),
            phone: "+420601".into(),
            push_capable: true,
        };
        let sms_vol = Volunteer {
            push_capable: false,
            ..push_vol.clone()
        };
        assert_eq!(resolve_channel(&push_vol), Channel::Push);
        assert_eq!(resolve_channel(&sms_vol), Channel::Sms);
    }

    #[tokio::test]
    async fn successful_send_marks_sent() {
        let (store, gateway, messenger) = setup().await;
        let vol = store.create_volunteer("Petr", "+420602", false).await.unwrap();

        let message = messenger
            .send_outbound(Channel::Sms, MessageType::Other, "text".into(), &vol, None, None)
            .await
            .unwrap();

        let reloaded = store.get_message(message.id).await.unwrap().unwrap();
        assert_eq!(reloaded.state, MessageState::Sent);
        assert_eq!(gateway.sent().len(), 1);
        assert_eq!(gateway.sent()[0].recipient, "+420602");
    }

    #[tokio::test]
    async fn failed_send_leaves_message_pending() {
        let (store, gateway, messenger) = setup().await;
        let vol = store.create_volunteer("Petr", "+420602", false).await.unwrap();
        gateway.fail_sends_with("provider down");

        let result = messenger
            .send_outbound(Channel::Sms, MessageType::Other, "text".into(), &vol, None, None)
            .await;
        assert!(matches!(result, Err(PipelineError::Gateway(_))));
        assert!(gateway.sent().is_empty());
    }
}
