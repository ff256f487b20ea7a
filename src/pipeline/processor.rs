//! Response processor — turns inbound replies into assignment
//! transitions and confirmation notices.
//!
//! One inbound message is one unit of work. Units for different
//! requests run fully in parallel; per-request ordering is enforced by
//! the lock inside [`crate::pipeline::capacity`].

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::MarkReadPolicy;
use crate::dispatch::Messenger;
use crate::dispatch::messenger::resolve_channel;
use crate::error::{PipelineError, StoreError};
use crate::model::{Assignment, Message, MessageType, Volunteer};
use crate::pipeline::capacity::{RequestLocks, ResponseOutcome, apply_response};
use crate::pipeline::reply::{self, ReplyIntent};
use crate::store::Store;
use crate::templates;

/// Processes inbound reply messages.
pub struct ResponseProcessor {
    store: Arc<dyn Store>,
    messenger: Arc<Messenger>,
    locks: Arc<RequestLocks>,
    mark_read: MarkReadPolicy,
}

impl ResponseProcessor {
    pub fn new(
        store: Arc<dyn Store>,
        messenger: Arc<Messenger>,
        locks: Arc<RequestLocks>,
        mark_read: MarkReadPolicy,
    ) -> Self {
        Self {
            store,
            messenger,
            locks,
            mark_read,
        }
    }

    /// Process one inbound message against the sender's pending
    /// assignments.
    pub async fn process(&self, message: &Message) -> Result<(), PipelineError> {
        let volunteer = self
            .store
            .get_volunteer(message.volunteer_id)
            .await?
            .ok_or(StoreError::NotFound {
                entity: "volunteer",
                id: message.volunteer_id,
            })?;

        let pending = self.store.pending_assignments(volunteer.id).await?;

        if pending.is_empty() {
            return self.handle_no_pending(message, &volunteer).await;
        }

        let Some(intent) = reply::parse(&message.text) else {
            debug!(message = %message.id, "Unparseable reply");
            self.notice(&volunteer, templates::unrecognized(), None).await?;
            return Ok(());
        };

        let mut resolved_any = false;
        let mut rejected_any = false;
        for assignment in &pending {
            match self.respond_one(&volunteer, assignment, intent).await {
                Ok(outcome) => {
                    resolved_any |= matches!(
                        outcome,
                        ResponseOutcome::Accepted
                            | ResponseOutcome::Rejected
                            | ResponseOutcome::AlreadyResolved
                    );
                    rejected_any |= outcome == ResponseOutcome::Rejected;
                }
                Err(e) => {
                    // Independent units: the remaining assignments still
                    // get their turn.
                    error!(assignment = %assignment.id, error = %e, "Response handling failed");
                }
            }
        }

        let mark = match self.mark_read {
            MarkReadPolicy::Definitive => resolved_any,
            MarkReadPolicy::RejectOnly => rejected_any,
        };
        if mark {
            self.store.mark_message_read(message.id).await?;
        }
        Ok(())
    }

    /// Reply arrived but nothing awaits a response. A volunteer whose
    /// assignments are all terminal gets the duplicate notice; a sender
    /// with no assignment history is left alone.
    async fn handle_no_pending(
        &self,
        message: &Message,
        volunteer: &Volunteer,
    ) -> Result<(), PipelineError> {
        let resolved = self.store.resolved_assignments(volunteer.id).await?;
        if resolved.is_empty() {
            debug!(message = %message.id, volunteer = %volunteer.id, "Stray inbound, ignoring");
            return Ok(());
        }

        info!(message = %message.id, volunteer = %volunteer.id, "Duplicate reply");
        let request_id = resolved.first().map(|a| a.request_id);
        self.notice(volunteer, templates::already_responded(), request_id)
            .await?;
        if self.mark_read == MarkReadPolicy::Definitive {
            self.store.mark_message_read(message.id).await?;
        }
        Ok(())
    }

    /// Run the capacity-constrained transition for one assignment and
    /// send the matching notice.
    async fn respond_one(
        &self,
        volunteer: &Volunteer,
        assignment: &Assignment,
        intent: ReplyIntent,
    ) -> Result<ResponseOutcome, PipelineError> {
        let outcome = apply_response(&self.store, &self.locks, assignment, intent).await?;

        let organisation = self.organisation_name(assignment.request_id).await?;
        let text = match outcome {
            ResponseOutcome::Accepted => templates::confirmed(&organisation),
            ResponseOutcome::Rejected => templates::rejected(&organisation),
            ResponseOutcome::OverCapacity => templates::over_capacity(&organisation),
            ResponseOutcome::AlreadyResolved => templates::already_responded(),
        };
        self.notice(volunteer, text, Some(assignment.request_id))
            .await?;
        Ok(outcome)
    }

    async fn notice(
        &self,
        volunteer: &Volunteer,
        text: String,
        request_id: Option<Uuid>,
    ) -> Result<(), PipelineError> {
        self.messenger
            .send_outbound(
                resolve_channel(volunteer),
                MessageType::Other,
                text,
                volunteer,
                request_id,
                None,
            )
            .await?;
        Ok(())
    }

    async fn organisation_name(&self, request_id: Uuid) -> Result<String, StoreError> {
        let Some(request) = self.store.get_request(request_id).await? else {
            return Ok(String::new());
        };
        Ok(self
            .store
            .get_organisation(request.organisation_id)
            .await?
            .map(|o| o.name)
            .unwrap_or_default())
    }
}

/// Spawn the worker loop consuming message ids from the queue.
///
/// Each message is processed in its own task so replies for different
/// requests never wait on each other.
pub fn spawn_response_worker(
    store: Arc<dyn Store>,
    processor: Arc<ResponseProcessor>,
    mut rx: mpsc::UnboundedReceiver<Uuid>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Response worker started");
        while let Some(message_id) = rx.recv().await {
            let store = Arc::clone(&store);
            let processor = Arc::clone(&processor);
            tokio::spawn(async move {
                match store.get_message(message_id).await {
                    Ok(Some(message)) => {
                        if let Err(e) = processor.process(&message).await {
                            error!(message = %message_id, error = %e, "Processing failed");
                        }
                    }
                    Ok(None) => warn!(message = %message_id, "Queued message vanished"),
                    Err(e) => error!(message = %message_id, error = %e, "Message load failed"),
                }
            });
        }
        info!("Response worker stopped");
    })
}

/// Re-enqueue unread incoming messages at startup so replies that
/// arrived before a restart are not lost.
pub async fn recover_unread(
    store: &Arc<dyn Store>,
    tx: &mpsc::UnboundedSender<Uuid>,
) -> Result<usize, PipelineError> {
    let unread = store.unread_incoming().await?;
    let count = unread.len();
    for message in unread {
        let _ = tx.send(message.id);
    }
    if count > 0 {
        info!(count, "Recovered unread inbound messages");
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crate::gateway::DevGateway;
    use crate::model::{AssignmentState, Channel, Direction, MessageState, RequestState};
    use crate::store::{LibSqlStore, NewMessage, NewRequest};

    struct Fixture {
        store: Arc<dyn Store>,
        gateway: Arc<DevGateway>,
        processor: ResponseProcessor,
        request_id: Uuid,
    }

    async fn fixture(capacity: u32, policy: MarkReadPolicy) -> Fixture {
        let store: Arc<dyn Store> = Arc::new(LibSqlStore::new_memory().await.unwrap());
        let gateway = Arc::new(DevGateway::new());
        let messenger = Arc::new(Messenger::new(Arc::clone(&store), gateway.clone()));
        let processor = ResponseProcessor::new(
            Arc::clone(&store),
            messenger,
            Arc::new(RequestLocks::new()),
            policy,
        );

        let org = store.create_organisation("Charita Brno").await.unwrap();
        let request = store
            .create_request(NewRequest {
                organisation_id: org.id,
                identifier: "R-1".into(),
                text: "pomoc".into(),
                required_volunteer_count: capacity,
                state: RequestState::Open,
                fulfillment_date: None,
            })
            .await
            .unwrap();

        Fixture {
            store,
            gateway,
            processor,
            request_id: request.id,
        }
    }

    impl Fixture {
        async fn volunteer(&self, phone: &str, state: AssignmentState) -> Volunteer {
            let vol = self
                .store
                .create_volunteer("Vol", phone, false)
                .await
                .unwrap();
            self.store
                .create_assignment(self.request_id, vol.id, state)
                .await
                .unwrap();
            vol
        }

        async fn inbound(&self, volunteer: &Volunteer, text: &str) -> Message {
            self.store
                .create_message(NewMessage {
                    direction: Direction::Incoming,
                    channel: Channel::Sms,
                    message_type: MessageType::Other,
                    state: MessageState::Received,
                    text: text.into(),
                    volunteer_id: volunteer.id,
                    request_id: None,
                    creator_id: None,
                    external_id: None,
                    created_at: Utc::now(),
                })
                .await
                .unwrap()
        }
    }

    #[tokio::test]
    async fn accept_reply_accepts_and_confirms() {
        let f = fixture(2, MarkReadPolicy::Definitive).await;
        let vol = f.volunteer("+420601", AssignmentState::AwaitingResponse).await;
        let msg = f.inbound(&vol, " Ano ").await;

        f.processor.process(&msg).await.unwrap();

        assert_eq!(
            f.store
                .count_assignments(f.request_id, AssignmentState::Accepted)
                .await
                .unwrap(),
            1
        );
        let sent = f.gateway.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].text.contains("potvrzena"));
        assert!(sent[0].text.contains("Charita Brno"));
        assert!(f.store.get_message(msg.id).await.unwrap().unwrap().is_read());
    }

    #[tokio::test]
    async fn reject_reply_rejects_with_organisation_notice() {
        let f = fixture(2, MarkReadPolicy::Definitive).await;
        let vol = f.volunteer("+420601", AssignmentState::AwaitingResponse).await;
        let msg = f.inbound(&vol, "ne").await;

        f.processor.process(&msg).await.unwrap();

        assert_eq!(
            f.store
                .count_assignments(f.request_id, AssignmentState::Rejected)
                .await
                .unwrap(),
            1
        );
        assert!(f.gateway.sent()[0].text.contains("Charita Brno"));
        assert!(f.store.get_message(msg.id).await.unwrap().unwrap().is_read());
    }

    #[tokio::test]
    async fn unparseable_reply_changes_nothing() {
        let f = fixture(2, MarkReadPolicy::Definitive).await;
        let vol = f.volunteer("+420601", AssignmentState::AwaitingResponse).await;
        let msg = f.inbound(&vol, "maybe").await;

        f.processor.process(&msg).await.unwrap();

        // Assignment still pending, message unread, one notice out.
        assert_eq!(f.store.pending_assignments(vol.id).await.unwrap().len(), 1);
        assert!(!f.store.get_message(msg.id).await.unwrap().unwrap().is_read());
        let sent = f.gateway.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].text.contains("nerozpoznali"));
    }

    #[tokio::test]
    async fn third_accept_gets_over_capacity_notice() {
        let f = fixture(2, MarkReadPolicy::Definitive).await;
        let a = f.volunteer("+420601", AssignmentState::AwaitingResponse).await;
        let b = f.volunteer("+420602", AssignmentState::AwaitingResponse).await;
        let c = f.volunteer("+420603", AssignmentState::AwaitingResponse).await;

        for vol in [&a, &b] {
            let msg = f.inbound(vol, "ano").await;
            f.processor.process(&msg).await.unwrap();
        }
        let msg_c = f.inbound(&c, "ano").await;
        f.processor.process(&msg_c).await.unwrap();

        assert_eq!(
            f.store
                .count_assignments(f.request_id, AssignmentState::Accepted)
                .await
                .unwrap(),
            2
        );
        // C stays pending and was told the capacity is filled.
        assert_eq!(f.store.pending_assignments(c.id).await.unwrap().len(), 1);
        let last = f.gateway.sent().last().unwrap().clone();
        assert!(last.text.contains("naplněna"));
        // Over-capacity is not definitive: the reply stays unread.
        assert!(!f.store.get_message(msg_c.id).await.unwrap().unwrap().is_read());
    }

    #[tokio::test]
    async fn second_accept_from_same_volunteer_gets_duplicate_notice() {
        let f = fixture(2, MarkReadPolicy::Definitive).await;
        let vol = f.volunteer("+420601", AssignmentState::AwaitingResponse).await;

        let first = f.inbound(&vol, "ano").await;
        f.processor.process(&first).await.unwrap();
        let second = f.inbound(&vol, "ano").await;
        f.processor.process(&second).await.unwrap();

        // Exactly one accepted transition happened.
        assert_eq!(
            f.store
                .count_assignments(f.request_id, AssignmentState::Accepted)
                .await
                .unwrap(),
            1
        );
        let sent = f.gateway.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent[1].text.contains("už odpověděl"));
    }

    #[tokio::test]
    async fn stray_sender_is_left_alone() {
        let f = fixture(2, MarkReadPolicy::Definitive).await;
        let vol = f.store.create_volunteer("Vol", "+420609", false).await.unwrap();
        let msg = f.inbound(&vol, "ano").await;

        f.processor.process(&msg).await.unwrap();

        assert!(f.gateway.sent().is_empty());
        assert!(!f.store.get_message(msg.id).await.unwrap().unwrap().is_read());
    }

    #[tokio::test]
    async fn reject_only_policy_skips_read_on_accept() {
        let f = fixture(2, MarkReadPolicy::RejectOnly).await;
        let vol = f.volunteer("+420601", AssignmentState::AwaitingResponse).await;
        let accept = f.inbound(&vol, "ano").await;
        f.processor.process(&accept).await.unwrap();
        assert!(!f.store.get_message(accept.id).await.unwrap().unwrap().is_read());

        let f = fixture(2, MarkReadPolicy::RejectOnly).await;
        let vol = f.volunteer("+420601", AssignmentState::AwaitingResponse).await;
        let reject = f.inbound(&vol, "ne").await;
        f.processor.process(&reject).await.unwrap();
        assert!(f.store.get_message(reject.id).await.unwrap().unwrap().is_read());
    }

    #[tokio::test]
    async fn worker_queue_processes_recovered_messages() {
        let f = fixture(2, MarkReadPolicy::Definitive).await;
        let vol = f.volunteer("+420601", AssignmentState::AwaitingResponse).await;
        let msg = f.inbound(&vol, "ano").await;

        let (tx, rx) = mpsc::unbounded_channel();
        let processor = Arc::new(ResponseProcessor::new(
            Arc::clone(&f.store),
            Arc::new(Messenger::new(Arc::clone(&f.store), f.gateway.clone())),
            Arc::new(RequestLocks::new()),
            MarkReadPolicy::Definitive,
        ));
        let worker = spawn_response_worker(Arc::clone(&f.store), processor, rx);

        let recovered = recover_unread(&f.store, &tx).await.unwrap();
        assert_eq!(recovered, 1);

        // Let the worker drain the queue.
        for _ in 0..50 {
            if f.store.get_message(msg.id).await.unwrap().unwrap().is_read() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert!(f.store.get_message(msg.id).await.unwrap().unwrap().is_read());

        drop(tx);
        worker.await.unwrap();
    }
}
