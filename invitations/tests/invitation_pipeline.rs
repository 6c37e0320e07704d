//! Invitation pipeline scenarios on the in-memory backends.

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]

use collegium_core::context::Context;
use collegium_core::principal::{PrincipalId, ResourceRef};
use collegium_invitations::mocks::{FailingContract, InMemoryInvitationStore, RecordingContract};
use collegium_invitations::worker::spawn_accept_worker;
use collegium_invitations::{InvitationEvent, InvitationRole, InvitationService};
use collegium_testing::InMemoryTaskQueue;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

fn inviter() -> Context {
    Context::authenticated("cam", PrincipalId::parse("u:cam:prof").expect("valid"))
}

fn accepting() -> PrincipalId {
    PrincipalId::parse("u:cam:newstudent").expect("valid")
}

fn setup() -> (InvitationService, Arc<InMemoryInvitationStore>, Arc<InMemoryTaskQueue>) {
    let store = Arc::new(InMemoryInvitationStore::new());
    let queue = Arc::new(InMemoryTaskQueue::new());
    (
        InvitationService::new(store.clone(), queue.clone()),
        store,
        queue,
    )
}

#[tokio::test]
async fn repeated_invites_keep_the_strongest_role_and_token() {
    let (svc, store, _) = setup();
    let seminar = ResourceRef::new("discussion", "d:cam:seminar");

    let first = svc
        .invite(&inviter(), &seminar, "Alice@Cam.Example.org", InvitationRole::Manager)
        .await
        .expect("invite");
    let second = svc
        .invite(&inviter(), &seminar, "alice@cam.example.org", InvitationRole::Viewer)
        .await
        .expect("re-invite");

    assert_eq!(second.role, InvitationRole::Manager, "downgrades are ignored");
    assert_eq!(second.token, first.token, "the email keeps its token");
    assert_eq!(store.invitation_count().await, 1, "upsert, not duplicate");
    assert_eq!(second.email, "alice@cam.example.org", "emails normalize");
}

#[tokio::test]
async fn accept_grants_all_resources_and_consumes_the_batch() {
    let (svc, store, _) = setup();
    let contract = Arc::new(RecordingContract::new());
    svc.register_contract("discussion", contract.clone());

    let seminar = ResourceRef::new("discussion", "d:cam:seminar");
    let journal = ResourceRef::new("discussion", "d:cam:journal");
    svc.invite(&inviter(), &seminar, "alice@cam.example.org", InvitationRole::Member)
        .await
        .expect("invite");
    let invitation = svc
        .invite(&inviter(), &journal, "alice@cam.example.org", InvitationRole::Manager)
        .await
        .expect("invite");

    let accepted = Arc::new(AtomicUsize::new(0));
    let observer = Arc::clone(&accepted);
    svc.emitter().when(move |event: InvitationEvent| {
        let observer = Arc::clone(&observer);
        Box::pin(async move {
            if let InvitationEvent::Accepted {
                invitation_hashes, ..
            } = event
            {
                observer.store(invitation_hashes.len(), Ordering::SeqCst);
            }
            Ok(())
        })
    });

    let principal = accepting();
    let changes = svc
        .accept(&invitation.token, &principal)
        .await
        .expect("accept");

    assert_eq!(changes.len(), 2);
    assert_eq!(
        contract.role_of("d:cam:seminar", &principal).await,
        Some(InvitationRole::Member)
    );
    assert_eq!(
        contract.role_of("d:cam:journal", &principal).await,
        Some(InvitationRole::Manager)
    );
    assert_eq!(store.invitation_count().await, 0, "the batch was consumed");
    assert_eq!(accepted.load(Ordering::SeqCst), 2, "listeners saw both hashes");

    // The token is gone: a second accept finds nothing.
    let again = svc.accept(&invitation.token, &principal).await;
    assert_eq!(again.expect_err("token consumed").code(), 404);
}

#[tokio::test]
async fn a_failing_resource_aborts_the_whole_accept() {
    let (svc, store, _) = setup();
    let good = Arc::new(RecordingContract::new());
    svc.register_contract("discussion", good.clone());
    svc.register_contract("meeting", Arc::new(FailingContract));

    let seminar = ResourceRef::new("discussion", "d:cam:seminar");
    let standup = ResourceRef::new("meeting", "m:cam:standup");
    svc.invite(&inviter(), &seminar, "alice@cam.example.org", InvitationRole::Member)
        .await
        .expect("invite");
    let invitation = svc
        .invite(&inviter(), &standup, "alice@cam.example.org", InvitationRole::Member)
        .await
        .expect("invite");

    let principal = accepting();
    let result = svc.accept(&invitation.token, &principal).await;
    assert!(result.is_err(), "the frozen meeting fails the accept");

    assert_eq!(
        good.role_of("d:cam:seminar", &principal).await,
        None,
        "no role was granted anywhere"
    );
    assert_eq!(store.invitation_count().await, 2, "nothing was consumed");

    // The token still resolves; a later retry can succeed.
    svc.register_contract("meeting", Arc::new(RecordingContract::new()));
    svc.accept(&invitation.token, &principal)
        .await
        .expect("retry succeeds once the resource thaws");
}

#[tokio::test]
async fn accept_fans_out_through_the_queue() {
    let (svc, _, queue) = setup();
    svc.register_contract("discussion", Arc::new(RecordingContract::new()));

    let seminar = ResourceRef::new("discussion", "d:cam:seminar");
    let invitation = svc
        .invite(&inviter(), &seminar, "alice@cam.example.org", InvitationRole::Member)
        .await
        .expect("invite");

    // A second node's worker: its own emitter, fed from the queue.
    let remote_emitter = Arc::new(collegium_core::emitter::Emitter::<InvitationEvent>::new(
        "invitations-remote",
    ));
    let (tx, rx) = tokio::sync::oneshot::channel::<String>();
    let tx = Arc::new(std::sync::Mutex::new(Some(tx)));
    remote_emitter.when(move |event: InvitationEvent| {
        let tx = Arc::clone(&tx);
        Box::pin(async move {
            if let InvitationEvent::Accepted { email, .. } = event {
                if let Some(tx) = tx.lock().expect("lock").take() {
                    let _ = tx.send(email);
                }
            }
            Ok(())
        })
    });
    let worker = spawn_accept_worker(queue, remote_emitter, 15);

    svc.accept(&invitation.token, &accepting())
        .await
        .expect("accept");

    let email = tokio::time::timeout(std::time::Duration::from_secs(2), rx)
        .await
        .expect("fan-out should arrive")
        .expect("channel open");
    assert_eq!(email, "alice@cam.example.org");
    worker.abort();
}

#[tokio::test]
async fn invite_validation() {
    let (svc, _, _) = setup();
    let seminar = ResourceRef::new("discussion", "d:cam:seminar");

    let bad_email = svc
        .invite(&inviter(), &seminar, "not-an-email", InvitationRole::Member)
        .await;
    assert_eq!(bad_email.expect_err("bad email").code(), 400);

    let anon = svc
        .invite(
            &Context::anonymous("cam"),
            &seminar,
            "alice@cam.example.org",
            InvitationRole::Member,
        )
        .await;
    assert_eq!(anon.expect_err("anonymous").code(), 401);

    let unknown_token = svc.accept("no-such-token", &accepting()).await;
    assert_eq!(unknown_token.expect_err("unknown token").code(), 404);
}
