//! Volunteer notifier — offer dispatch and update fan-out.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{info, warn};
use uuid::Uuid;

use crate::dispatch::messenger::{Messenger, resolve_channel};
use crate::error::{PipelineError, StoreError};
use crate::model::{AssignmentState, Channel, MessageType, Request};
use crate::store::Store;
use crate::templates::{self, TemplateContext};

/// Sends assignment offers and change notifications for a request.
pub struct VolunteerNotifier {
    store: Arc<dyn Store>,
    messenger: Arc<Messenger>,
    /// Coordinator on whose behalf messages are created, if any.
    creator_id: Option<Uuid>,
}

impl VolunteerNotifier {
    pub fn new(store: Arc<dyn Store>, messenger: Arc<Messenger>, creator_id: Option<Uuid>) -> Self {
        Self {
            store,
            messenger,
            creator_id,
        }
    }

    /// Offer the request to every assignment still awaiting dispatch.
    ///
    /// Each offered assignment moves to `AwaitingResponse`; assignments
    /// in any other state are untouched, so calling this twice never
    /// sends a duplicate offer. One failed volunteer does not stop the
    /// rest.
    pub async fn notify_assigned(&self, request: &Request) -> Result<(), PipelineError> {
        let organisation = self.organisation_name(request).await?;
        let waiting = self
            .store
            .assignments_by_request(request.id, Some(AssignmentState::AwaitingDispatch))
            .await?;

        info!(request = %request.id, count = waiting.len(), "Dispatching offers");

        for assignment in waiting {
            if let Err(e) = self
                .offer_one(request, &organisation, assignment.id, assignment.volunteer_id)
                .await
            {
                warn!(assignment = %assignment.id, error = %e, "Offer dispatch failed");
            }
        }
        Ok(())
    }

    /// Push a change notification to volunteers already offered or
    /// accepted. Best-effort fan-out: pushes go out concurrently, there
    /// is no retry and no state change, SMS-only volunteers are skipped.
    pub async fn notify_updated(&self, request: &Request) -> Result<(), PipelineError> {
        let organisation = self.organisation_name(request).await?;
        let ctx = TemplateContext {
            identifier: &request.identifier,
            description: &request.text,
            organisation: &organisation,
        };
        let text = templates::resolve(Channel::Push, MessageType::Update, &ctx);

        let mut recipients = Vec::new();
        for assignment in self.store.assignments_by_request(request.id, None).await? {
            if !matches!(
                assignment.state,
                AssignmentState::AwaitingResponse | AssignmentState::Accepted
            ) {
                continue;
            }
            let Some(volunteer) = self.store.get_volunteer(assignment.volunteer_id).await? else {
                continue;
            };
            if volunteer.push_capable {
                recipients.push(volunteer);
            }
        }

        join_all(recipients.iter().map(|volunteer| {
            let text = text.clone();
            async move {
                if let Err(e) = self
                    .messenger
                    .send_outbound(
                        Channel::Push,
                        MessageType::Update,
                        text,
                        volunteer,
                        Some(request.id),
                        self.creator_id,
                    )
                    .await
                {
                    warn!(volunteer = %volunteer.id, error = %e, "Update push failed");
                }
            }
        }))
        .await;
        Ok(())
    }

    async fn offer_one(
        &self,
        request: &Request,
        organisation: &str,
        assignment_id: Uuid,
        volunteer_id: Uuid,
    ) -> Result<(), PipelineError> {
        let volunteer =
            self.store
                .get_volunteer(volunteer_id)
                .await?
                .ok_or(StoreError::NotFound {
                    entity: "volunteer",
                    id: volunteer_id,
                })?;

        let channel = resolve_channel(&volunteer);
        let ctx = TemplateContext {
            identifier: &request.identifier,
            description: &request.text,
            organisation,
        };
        let text = templates::resolve(channel, MessageType::Offer, &ctx);

        self.messenger
            .send_outbound(
                channel,
                MessageType::Offer,
                text,
                &volunteer,
                Some(request.id),
                self.creator_id,
            )
            .await?;

        self.store
            .transition_assignment(
                assignment_id,
                AssignmentState::AwaitingDispatch,
                AssignmentState::AwaitingResponse,
            )
            .await?;
        Ok(())
    }

    async fn organisation_name(&self, request: &Request) -> Result<String, StoreError> {
        Ok(self
            .store
            .get_organisation(request.organisation_id)
            .await?
            .map(|o| o.name)
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::DevGateway;
    use crate::model::RequestState;
    use crate::store::{LibSqlStore, NewRequest};

    struct Fixture {
        store: Arc<LibSqlStore>,
        gateway: Arc<DevGateway>,
        notifier: VolunteerNotifier,
        request: Request,
    }

    async fn fixture(capacity: u32) -> Fixture {
        let store: Arc<LibSqlStore> = Arc::new(LibSqlStore::new_memory().await.unwrap());
        let gateway = Arc::new(DevGateway::new());
        let messenger = Arc::new(Messenger::new(store.clone(), gateway.clone()));
        let notifier = VolunteerNotifier::new(store.clone(), messenger, None);

        let org = store.create_organisation("Charita Brno").await.unwrap();
        let request = store
            .create_request(NewRequest {
                organisation_id: org.id,
                identifier: "R-1".into(),
                text: "nákup pro seniory".into(),
                required_volunteer_count: capacity,
                state: RequestState::Open,
                fulfillment_date: None,
            })
            .await
            .unwrap();

        Fixture {
            store,
            gateway,
            notifier,
            request,
        }
    }

    #[tokio::test]
    async fn offers_go_out_once_per_assignment() {
        let f = fixture(2).await;
        let sms_vol = f.store.create_volunteer("Petr", "+420601", false).await.unwrap();
        let push_vol = f.store.create_volunteer("Jana", "+420602", true).await.unwrap();
        f.store
            .create_assignment(f.request.id, sms_vol.id, AssignmentState::AwaitingDispatch)
            .await
            .unwrap();
        f.store
            .create_assignment(f.request.id, push_vol.id, AssignmentState::AwaitingDispatch)
            .await
            .unwrap();

        f.notifier.notify_assigned(&f.request).await.unwrap();

        let sent = f.gateway.sent();
        assert_eq!(sent.len(), 2);
        let channels: Vec<Channel> = sent.iter().map(|s| s.channel).collect();
        assert!(channels.contains(&Channel::Sms));
        assert!(channels.contains(&Channel::Push));

        // Both assignments now await a response.
        let awaiting = f
            .store
            .assignments_by_request(f.request.id, Some(AssignmentState::AwaitingResponse))
            .await
            .unwrap();
        assert_eq!(awaiting.len(), 2);

        // Second dispatch finds nothing to do.
        f.notifier.notify_assigned(&f.request).await.unwrap();
        assert_eq!(f.gateway.sent().len(), 2);
    }

    #[tokio::test]
    async fn offer_text_matches_channel() {
        let f = fixture(1).await;
        let sms_vol = f.store.create_volunteer("Petr", "+420601", false).await.unwrap();
        f.store
            .create_assignment(f.request.id, sms_vol.id, AssignmentState::AwaitingDispatch)
            .await
            .unwrap();

        f.notifier.notify_assigned(&f.request).await.unwrap();

        let sent = f.gateway.sent();
        assert!(sent[0].text.contains("R-1"));
        assert!(sent[0].text.contains("nákup pro seniory"));
    }

    #[tokio::test]
    async fn updates_reach_only_push_capable_in_flight_volunteers() {
        let f = fixture(2).await;
        let sms_vol = f.store.create_volunteer("Petr", "+420601", false).await.unwrap();
        let push_waiting = f.store.create_volunteer("Jana", "+420602", true).await.unwrap();
        let push_accepted = f.store.create_volunteer("Eva", "+420603", true).await.unwrap();
        let push_undispatched = f.store.create_volunteer("Ivo", "+420604", true).await.unwrap();

        f.store
            .create_assignment(f.request.id, sms_vol.id, AssignmentState::AwaitingResponse)
            .await
            .unwrap();
        f.store
            .create_assignment(f.request.id, push_waiting.id, AssignmentState::AwaitingResponse)
            .await
            .unwrap();
        f.store
            .create_assignment(f.request.id, push_accepted.id, AssignmentState::Accepted)
            .await
            .unwrap();
        f.store
            .create_assignment(
                f.request.id,
                push_undispatched.id,
                AssignmentState::AwaitingDispatch,
            )
            .await
            .unwrap();

        f.notifier.notify_updated(&f.request).await.unwrap();

        let sent = f.gateway.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|s| s.channel == Channel::Push));
        let recipients: Vec<&str> = sent.iter().map(|s| s.recipient.as_str()).collect();
        assert!(recipients.contains(&push_waiting.id.to_string().as_str()));
        assert!(recipients.contains(&push_accepted.id.to_string().as_str()));
    }

    #[tokio::test]
    async fn gateway_outage_does_not_consume_awaiting_dispatch() {
        let f = fixture(1).await;
        let vol = f.store.create_volunteer("Petr", "+420601", false).await.unwrap();
        f.store
            .create_assignment(f.request.id, vol.id, AssignmentState::AwaitingDispatch)
            .await
            .unwrap();
        f.gateway.fail_sends_with("provider down");

        f.notifier.notify_assigned(&f.request).await.unwrap();

        // Send failed, so the assignment still awaits dispatch and a
        // later retry will offer it again.
        let waiting = f
            .store
            .assignments_by_request(f.request.id, Some(AssignmentState::AwaitingDispatch))
            .await
            .unwrap();
        assert_eq!(waiting.len(), 1);
    }
}
