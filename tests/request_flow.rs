//! End-to-end flow: dispatch offers, poll replies in through the
//! gateway, resolve them through the worker, check the capacity
//! invariant and the outbound notices.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;

use aid_relay::config::{MarkReadPolicy, PollerConfig};
use aid_relay::dispatch::{Messenger, VolunteerNotifier};
use aid_relay::gateway::{DevGateway, MessagingGateway, RawInbound};
use aid_relay::model::{AssignmentState, RequestState, Volunteer};
use aid_relay::pipeline::processor::{ResponseProcessor, spawn_response_worker};
use aid_relay::pipeline::RequestLocks;
use aid_relay::poller::{LeaseRegistry, spawn_inbound_poller};
use aid_relay::store::{LibSqlStore, NewRequest, Store};

fn reply(from: &Volunteer, id: &str, text: &str) -> RawInbound {
    RawInbound {
        external_id: Some(id.to_string()),
        sender: from.phone.clone(),
        text: text.to_string(),
        received_at: Utc::now(),
    }
}

async fn wait_until<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if condition().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn offers_replies_and_capacity_end_to_end() {
    let store: Arc<dyn Store> = Arc::new(LibSqlStore::new_memory().await.unwrap());
    let dev = Arc::new(DevGateway::new());
    let gateway: Arc<dyn MessagingGateway> = dev.clone();

    let locks = Arc::new(RequestLocks::new());
    let messenger = Arc::new(Messenger::new(Arc::clone(&store), Arc::clone(&gateway)));
    let processor = Arc::new(ResponseProcessor::new(
        Arc::clone(&store),
        Arc::clone(&messenger),
        Arc::clone(&locks),
        MarkReadPolicy::Definitive,
    ));

    let (work_tx, work_rx) = mpsc::unbounded_channel();
    let _worker = spawn_response_worker(Arc::clone(&store), processor, work_rx);

    let poller_config = PollerConfig {
        reschedule_jitter: Duration::from_millis(10),
        ..PollerConfig::default()
    };
    let (_poller, poller_shutdown) = spawn_inbound_poller(
        poller_config,
        Arc::clone(&gateway),
        Arc::clone(&store),
        Arc::new(LeaseRegistry::new()),
        work_tx.clone(),
    );

    // A request for two volunteers, five candidates.
    let org = store.create_organisation("Charita Brno").await.unwrap();
    let request = store
        .create_request(NewRequest {
            organisation_id: org.id,
            identifier: "R-7".into(),
            text: "rozvoz obědů".into(),
            required_volunteer_count: 2,
            state: RequestState::Open,
            fulfillment_date: None,
        })
        .await
        .unwrap();

    let mut volunteers = Vec::new();
    for i in 0..5 {
        let vol = store
            .create_volunteer(&format!("V{i}"), &format!("+4206010{i}"), false)
            .await
            .unwrap();
        store
            .create_assignment(request.id, vol.id, AssignmentState::AwaitingDispatch)
            .await
            .unwrap();
        volunteers.push(vol);
    }

    // Dispatch: one offer per candidate, all now awaiting a response.
    let notifier = VolunteerNotifier::new(Arc::clone(&store), Arc::clone(&messenger), None);
    notifier.notify_assigned(&request).await.unwrap();
    assert_eq!(dev.sent().len(), 5);
    assert_eq!(
        store
            .assignments_by_request(request.id, Some(AssignmentState::AwaitingResponse))
            .await
            .unwrap()
            .len(),
        5
    );

    // A second dispatch has nothing left to offer.
    notifier.notify_assigned(&request).await.unwrap();
    assert_eq!(dev.sent().len(), 5);

    // Two concurrent accepts fill the capacity.
    dev.push_inbound(reply(&volunteers[0], "in-0", " Ano "));
    dev.push_inbound(reply(&volunteers[1], "in-1", "ANO"));
    wait_until(|| {
        let store = Arc::clone(&store);
        let request_id = request.id;
        async move {
            store
                .count_assignments(request_id, AssignmentState::Accepted)
                .await
                .unwrap()
                == 2
        }
    })
    .await;

    // Then a too-late accept, a reject, and an unintelligible reply.
    dev.push_inbound(reply(&volunteers[2], "in-2", "ano"));
    dev.push_inbound(reply(&volunteers[3], "in-3", "ne"));
    dev.push_inbound(reply(&volunteers[4], "in-4", "maybe"));

    wait_until(|| {
        let store = Arc::clone(&store);
        let request_id = request.id;
        async move {
            store
                .count_assignments(request_id, AssignmentState::Rejected)
                .await
                .unwrap()
                == 1
        }
    })
    .await;

    // Notices: accept confirmations for the first two, over-capacity for
    // the third, reject confirmation, unrecognized-reply prompt.
    wait_until(|| {
        let dev = dev.clone();
        async move { dev.sent().len() == 10 }
    })
    .await;

    let sent = dev.sent();
    let text_for = |vol: &Volunteer| {
        sent.iter()
            .rev()
            .find(|s| s.recipient == vol.phone)
            .map(|s| s.text.clone())
            .unwrap()
    };
    assert!(text_for(&volunteers[0]).contains("potvrzena"));
    assert!(text_for(&volunteers[1]).contains("potvrzena"));
    assert!(text_for(&volunteers[2]).contains("naplněna"));
    assert!(text_for(&volunteers[3]).contains("odmítl"));
    assert!(text_for(&volunteers[4]).contains("nerozpoznali"));

    // The too-late accepter still awaits a usable reply; the invariant
    // holds.
    assert_eq!(
        store
            .pending_assignments(volunteers[2].id)
            .await
            .unwrap()
            .len(),
        1
    );
    assert_eq!(
        store
            .count_assignments(request.id, AssignmentState::Accepted)
            .await
            .unwrap(),
        2
    );

    // A duplicate accept gets the distinct notice and changes nothing.
    dev.push_inbound(reply(&volunteers[0], "in-5", "ano"));
    wait_until(|| {
        let dev = dev.clone();
        async move { dev.sent().len() == 11 }
    })
    .await;
    let last = dev.sent().last().unwrap().clone();
    assert_eq!(last.recipient, volunteers[0].phone);
    assert!(last.text.contains("už odpověděl"));
    assert_eq!(
        store
            .count_assignments(request.id, AssignmentState::Accepted)
            .await
            .unwrap(),
        2
    );

    poller_shutdown.store(true, Ordering::Relaxed);
}
