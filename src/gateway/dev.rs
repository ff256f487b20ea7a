//! In-process gateway — development runs and tests.
//!
//! Sends are recorded instead of delivered; inbound items are pushed in
//! by hand (tests) or stay empty (local runs without a provider).

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::info;

use crate::error::GatewayError;
use crate::gateway::{MessagingGateway, RawInbound};
use crate::model::Channel;

/// A send recorded by the dev gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedSend {
    pub channel: Channel,
    pub recipient: String,
    pub text: String,
}

/// Gateway double backed by in-memory queues.
#[derive(Default)]
pub struct DevGateway {
    sent: Mutex<Vec<RecordedSend>>,
    inbound: Mutex<VecDeque<RawInbound>>,
    /// When set, every `send` fails with this reason.
    fail_sends: Mutex<Option<String>>,
}

impl DevGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an inbound item for the next `poll_inbound` call.
    pub fn push_inbound(&self, raw: RawInbound) {
        self.inbound.lock().expect("dev gateway poisoned").push_back(raw);
    }

    /// Everything sent so far, in order.
    pub fn sent(&self) -> Vec<RecordedSend> {
        self.sent.lock().expect("dev gateway poisoned").clone()
    }

    /// Make subsequent sends fail (gateway outage simulation).
    pub fn fail_sends_with(&self, reason: &str) {
        *self.fail_sends.lock().expect("dev gateway poisoned") = Some(reason.to_string());
    }
}

#[async_trait]
impl MessagingGateway for DevGateway {
    async fn send(
        &self,
        channel: Channel,
        recipient: &str,
        text: &str,
    ) -> Result<(), GatewayError> {
        if let Some(reason) = self.fail_sends.lock().expect("dev gateway poisoned").clone() {
            return Err(GatewayError::SendFailed {
                channel: channel.as_str().to_string(),
                recipient: recipient.to_string(),
                reason,
            });
        }

        info!(channel = channel.as_str(), recipient, text, "Dev gateway send");
        self.sent.lock().expect("dev gateway poisoned").push(RecordedSend {
            channel,
            recipient: recipient.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }

    async fn poll_inbound(&self) -> Result<Vec<RawInbound>, GatewayError> {
        let mut inbound = self.inbound.lock().expect("dev gateway poisoned");
        Ok(inbound.drain(..).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn records_sends_in_order() {
        let gateway = DevGateway::new();
        gateway.send(Channel::Sms, "+420111222333", "first").await.unwrap();
        gateway.send(Channel::Push, "vol-1", "second").await.unwrap();

        let sent = gateway.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].text, "first");
        assert_eq!(sent[1].channel, Channel::Push);
    }

    #[tokio::test]
    async fn poll_drains_queued_inbound() {
        let gateway = DevGateway::new();
        gateway.push_inbound(RawInbound {
            external_id: Some("x-1".into()),
            sender: "+420111222333".into(),
            text: "ano".into(),
            received_at: Utc::now(),
        });

        let first = gateway.poll_inbound().await.unwrap();
        assert_eq!(first.len(), 1);

        // Already drained, so a second poll returns nothing.
        let second = gateway.poll_inbound().await.unwrap();
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn simulated_outage_fails_sends() {
        let gateway = DevGateway::new();
        gateway.fail_sends_with("provider down");
        let err = gateway.send(Channel::Sms, "+420111222333", "x").await;
        assert!(err.is_err());
        assert!(gateway.sent().is_empty());
    }
}
