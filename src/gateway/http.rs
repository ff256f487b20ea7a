//! HTTP gateway — REST client for the SMS/push provider.

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::gateway::{MessagingGateway, RawInbound};
use crate::model::Channel;

/// Outbound send payload.
#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    channel: &'a str,
    recipient: &'a str,
    text: &'a str,
}

/// Provider's inbound listing.
#[derive(Debug, Deserialize)]
struct InboundResponse {
    messages: Vec<RawInbound>,
}

/// REST gateway client. Cheap to clone; `reqwest::Client` pools
/// connections internally.
#[derive(Clone)]
pub struct HttpGateway {
    client: reqwest::Client,
    config: GatewayConfig,
}

impl HttpGateway {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn bearer(&self) -> &str {
        self.config.api_token.expose_secret()
    }
}

#[async_trait]
impl MessagingGateway for HttpGateway {
    async fn send(
        &self,
        channel: Channel,
        recipient: &str,
        text: &str,
    ) -> Result<(), GatewayError> {
        let payload = SendRequest {
            channel: channel.as_str(),
            recipient,
            text,
        };

        let response = self
            .client
            .post(self.url("messages"))
            .bearer_auth(self.bearer())
            .json(&payload)
            .send()
            .await
            .map_err(|e| GatewayError::SendFailed {
                channel: channel.as_str().to_string(),
                recipient: recipient.to_string(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::HttpStatus { status, body });
        }

        debug!(channel = channel.as_str(), recipient, "Gateway send ok");
        Ok(())
    }

    async fn poll_inbound(&self) -> Result<Vec<RawInbound>, GatewayError> {
        let response = self
            .client
            .get(self.url("inbound"))
            .bearer_auth(self.bearer())
            .send()
            .await
            .map_err(|e| GatewayError::PollFailed {
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::HttpStatus { status, body });
        }

        let inbound: InboundResponse =
            response
                .json()
                .await
                .map_err(|e| GatewayError::PollFailed {
                    reason: format!("Invalid inbound payload: {e}"),
                })?;

        if !inbound.messages.is_empty() {
            debug!(count = inbound.messages.len(), "Gateway inbound drained");
        }
        Ok(inbound.messages)
    }
}
