//! Inbound poller — drains the gateway into the message store.
//!
//! Self-perpetuating: every cycle ends with a jittered reschedule, no
//! matter how the cycle went. The named lease keeps concurrent
//! deployments down to one active instance; a crashed holder frees up
//! when the TTL lapses.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::PollerConfig;
use crate::gateway::{MessagingGateway, RawInbound};
use crate::model::{Channel, Direction, MessageState, MessageType};
use crate::poller::lease::LeaseRegistry;
use crate::store::{NewMessage, Store};

/// Lease name shared by every poller instance.
const LEASE_NAME: &str = "inbound-poller";

/// Spawn the polling task.
///
/// Returns a `JoinHandle` and a shutdown flag. Set the flag to stop
/// after the current cycle.
pub fn spawn_inbound_poller(
    config: PollerConfig,
    gateway: Arc<dyn MessagingGateway>,
    store: Arc<dyn Store>,
    leases: Arc<LeaseRegistry>,
    tx: mpsc::UnboundedSender<Uuid>,
) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        info!(
            repeat_count = config.repeat_count,
            timeout_secs = config.timeout.as_secs(),
            "Inbound poller started"
        );

        loop {
            if shutdown.load(Ordering::Relaxed) {
                info!("Inbound poller shutting down");
                return;
            }

            match leases.acquire(LEASE_NAME, config.lease_ttl) {
                Some(_guard) => run_cycle(&config, &gateway, &store, &tx).await,
                None => debug!("Poller lease held elsewhere, skipping cycle"),
            }

            // Guaranteed reschedule, success or failure. The jitter keeps
            // multiple processes from retrying in lockstep.
            tokio::time::sleep(jitter(config.reschedule_jitter)).await;
        }
    });

    (handle, shutdown_flag)
}

fn jitter(max: Duration) -> Duration {
    let max_ms = max.as_millis().max(1) as u64;
    Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
}

/// One drain cycle, bounded by poll count and wall clock, whichever
/// is hit first. Errors end the cycle but never the poller.
pub(crate) async fn run_cycle(
    config: &PollerConfig,
    gateway: &Arc<dyn MessagingGateway>,
    store: &Arc<dyn Store>,
    tx: &mpsc::UnboundedSender<Uuid>,
) {
    let started = Instant::now();
    let mut polls = 0;

    while polls < config.repeat_count && started.elapsed() < config.timeout {
        polls += 1;

        let batch = match gateway.poll_inbound().await {
            Ok(batch) => batch,
            Err(e) => {
                error!("Inbound poll failed: {e}");
                return;
            }
        };
        if batch.is_empty() {
            return;
        }

        debug!(count = batch.len(), "Inbound batch received");
        for raw in batch {
            ingest(store, tx, raw).await;
        }
    }
}

/// Persist one raw inbound item and enqueue it for processing.
async fn ingest(store: &Arc<dyn Store>, tx: &mpsc::UnboundedSender<Uuid>, raw: RawInbound) {
    if let Some(external_id) = raw.external_id.as_deref() {
        match store.message_by_external_id(external_id).await {
            Ok(Some(_)) => {
                debug!(external_id, "Duplicate inbound delivery, skipping");
                return;
            }
            Ok(None) => {}
            Err(e) => {
                error!(external_id, error = %e, "Inbound dedup lookup failed");
                return;
            }
        }
    }

    let volunteer = match store.volunteer_by_phone(&raw.sender).await {
        Ok(Some(volunteer)) => volunteer,
        Ok(None) => {
            warn!(sender = %raw.sender, "Inbound from unknown sender, skipping");
            return;
        }
        Err(e) => {
            error!(sender = %raw.sender, error = %e, "Sender lookup failed");
            return;
        }
    };

    let new = NewMessage {
        direction: Direction::Incoming,
        channel: Channel::Sms,
        message_type: MessageType::Other,
        state: MessageState::Received,
        text: raw.text,
        volunteer_id: volunteer.id,
        request_id: None,
        creator_id: None,
        external_id: raw.external_id,
        created_at: raw.received_at,
    };

    match store.create_message(new).await {
        Ok(message) => {
            debug!(id = %message.id, volunteer = %volunteer.id, "Inbound persisted");
            let _ = tx.send(message.id);
        }
        Err(e) => error!(error = %e, "Failed to persist inbound message"),
    }
}
