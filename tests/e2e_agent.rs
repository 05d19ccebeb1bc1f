//! End-to-end agent tests.
//!
//! Two or three tokio agents talk through the in-process relay with loopback
//! media. Every wait is bounded by a timeout.

use std::sync::Arc;
use std::time::Duration;

use peercall::{
    AgentEvent, AgentHandle, CallAgent, CallError, Config, LocalRelay, LoopbackMedia,
    NegotiationState, Participant, RelayMessage, Role, SessionNotice, TieBreak,
};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio::time::timeout;

const STEP: Duration = Duration::from_secs(5);

fn p(name: &str) -> Participant {
    Participant::new(name).unwrap()
}

struct TestPeer {
    handle: AgentHandle,
    events: UnboundedReceiver<AgentEvent>,
    media: LoopbackMedia,
    task: JoinHandle<()>,
}

async fn spawn(relay: &LocalRelay, name: &str, config: &Config, media: LoopbackMedia) -> TestPeer {
    let (handle, events, task) =
        CallAgent::connect(relay, p(name), config, Arc::new(media.clone()))
            .await
            .unwrap();
    TestPeer {
        handle,
        events,
        media,
        task,
    }
}

async fn spawn_default(relay: &LocalRelay, name: &str, config: &Config) -> TestPeer {
    spawn(relay, name, config, LoopbackMedia::new(name, config.media.clone())).await
}

async fn wait_state(handle: &AgentHandle, state: NegotiationState) {
    let poll = async {
        loop {
            if handle.snapshot().await.unwrap().state == state {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    timeout(STEP, poll)
        .await
        .unwrap_or_else(|_| panic!("{} never reached {state}", handle.local()));
}

async fn wait_online(handle: &AgentHandle, others: &[&str]) {
    let poll = async {
        loop {
            let roster = handle.snapshot().await.unwrap().roster;
            if others.iter().all(|name| roster.contains(&p(name))) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    timeout(STEP, poll).await.expect("roster never settled");
}

async fn next_matching<F>(events: &mut UnboundedReceiver<AgentEvent>, mut pred: F) -> AgentEvent
where
    F: FnMut(&AgentEvent) -> bool,
{
    timeout(STEP, async {
        loop {
            let event = events.recv().await.expect("event stream closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("event not observed")
}

async fn pair(config: &Config) -> (LocalRelay, TestPeer, TestPeer) {
    let (relay, _task) = LocalRelay::spawn();
    let alice = spawn_default(&relay, "alice", config).await;
    let bob = spawn_default(&relay, "bob", config).await;
    wait_online(&alice.handle, &["bob"]).await;
    wait_online(&bob.handle, &["alice"]).await;
    (relay, alice, bob)
}

/// Test a full call, hangup and media release across agents
#[tokio::test]
async fn test_agents_establish_and_hang_up() {
    let config = Config::default();
    let (_relay, alice, bob) = pair(&config).await;

    alice.handle.start_call(Some(p("bob"))).await.unwrap();
    wait_state(&alice.handle, NegotiationState::Established).await;
    wait_state(&bob.handle, NegotiationState::Established).await;

    let snapshot = bob.handle.snapshot().await.unwrap();
    let stats = snapshot.session.unwrap();
    assert_eq!(stats.remote, p("alice"));
    assert_eq!(stats.role, Role::Responder);

    alice.handle.end_call().await.unwrap();
    wait_state(&bob.handle, NegotiationState::Ended).await;

    // release runs on the media worker after the state change
    timeout(STEP, async {
        loop {
            let a = alice.media.snapshot().await;
            let b = bob.media.snapshot().await;
            if !a.media_active && !b.media_active && a.releases == 1 && b.releases == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("media not released");
}

/// Test simultaneous offers resolve to one session on both sides
#[tokio::test]
async fn test_agents_resolve_glare() {
    for rule in [TieBreak::LowerYields, TieBreak::HigherYields] {
        let mut config = Config::default();
        config.negotiation.tie_break = rule;
        let (_relay, alice, bob) = pair(&config).await;

        let (a, b) = tokio::join!(
            alice.handle.start_call(Some(p("bob"))),
            bob.handle.start_call(Some(p("alice"))),
        );
        a.unwrap();
        b.unwrap();

        wait_state(&alice.handle, NegotiationState::Established).await;
        wait_state(&bob.handle, NegotiationState::Established).await;

        let alice_role = alice.handle.snapshot().await.unwrap().session.unwrap().role;
        let bob_role = bob.handle.snapshot().await.unwrap().session.unwrap().role;
        assert_ne!(alice_role, bob_role, "{rule}");

        let expected_responder = if rule == TieBreak::LowerYields { alice_role } else { bob_role };
        assert_eq!(expected_responder, Role::Responder, "{rule}");
    }
}

/// Test the remote leaving the relay ends the call
#[tokio::test]
async fn test_remote_leaving_ends_call() {
    let config = Config::default();
    let (_relay, mut alice, bob) = pair(&config).await;

    alice.handle.start_call(Some(p("bob"))).await.unwrap();
    wait_state(&alice.handle, NegotiationState::Established).await;

    bob.handle.leave().await.unwrap();
    timeout(STEP, bob.task).await.unwrap().unwrap();

    let event = next_matching(&mut alice.events, |e| {
        matches!(e, AgentEvent::Notice(SessionNotice::CallEnded { .. }))
    })
    .await;
    assert_eq!(
        event,
        AgentEvent::Notice(SessionNotice::CallEnded {
            remote: p("bob"),
            by_remote: true,
        })
    );
    assert_eq!(alice.handle.snapshot().await.unwrap().state, NegotiationState::Ended);
}

/// Test a denied camera fails the call and releases media
#[tokio::test]
async fn test_media_denied_fails_call() {
    let config = Config::default();
    let (relay, _task) = LocalRelay::spawn();
    let mut alice = spawn(
        &relay,
        "alice",
        &config,
        LoopbackMedia::new("alice", config.media.clone()).deny_media(),
    )
    .await;
    let bob = spawn_default(&relay, "bob", &config).await;
    wait_online(&alice.handle, &["bob"]).await;

    alice.handle.start_call(Some(p("bob"))).await.unwrap();
    let event = next_matching(&mut alice.events, |e| {
        matches!(e, AgentEvent::Notice(SessionNotice::CallFailed { .. }))
    })
    .await;
    assert!(matches!(
        event,
        AgentEvent::Notice(SessionNotice::CallFailed { ref reason, .. }) if reason.contains("permission denied")
    ));
    wait_state(&alice.handle, NegotiationState::Failed).await;

    // bob never heard of the call
    assert_eq!(bob.handle.snapshot().await.unwrap().state, NegotiationState::Idle);
    assert!(!alice.media.snapshot().await.media_active);
}

/// Test a third caller gets rejected while a call is up
#[tokio::test]
async fn test_busy_rejects_third_caller() {
    let config = Config::default();
    let (relay, alice, bob) = pair(&config).await;
    let mut carol = spawn_default(&relay, "carol", &config).await;
    wait_online(&carol.handle, &["bob"]).await;

    alice.handle.start_call(Some(p("bob"))).await.unwrap();
    wait_state(&bob.handle, NegotiationState::Established).await;

    carol.handle.start_call(Some(p("bob"))).await.unwrap();
    next_matching(&mut carol.events, |e| {
        matches!(e, AgentEvent::Notice(SessionNotice::CallRejected { .. }))
    })
    .await;
    wait_state(&carol.handle, NegotiationState::Ended).await;
    assert_eq!(bob.handle.snapshot().await.unwrap().state, NegotiationState::Established);

    assert!(matches!(
        alice.handle.start_call(Some(p("carol"))).await,
        Err(CallError::AlreadyInSession { .. })
    ));
}

/// Test chat and files reach the collaborator untouched
#[tokio::test]
async fn test_collaborator_messages_forwarded() {
    let config = Config::default();
    let (_relay, alice, mut bob) = pair(&config).await;

    assert!(matches!(
        alice.handle.send_chat(p("bob"), "hi").await,
        Err(CallError::NoActiveSession(_))
    ));

    alice.handle.start_call(Some(p("bob"))).await.unwrap();
    wait_state(&alice.handle, NegotiationState::Established).await;

    alice.handle.send_chat(p("bob"), "hi").await.unwrap();
    alice
        .handle
        .send_file(p("bob"), "notes.txt", "text/plain", b"meeting at 5".to_vec())
        .await
        .unwrap();

    let chat = next_matching(&mut bob.events, |e| matches!(e, AgentEvent::Forwarded(_))).await;
    assert!(matches!(
        chat,
        AgentEvent::Forwarded(RelayMessage::ChatMessage(ref m)) if m.message == "hi" && m.from == Some(p("alice"))
    ));

    let file = next_matching(&mut bob.events, |e| matches!(e, AgentEvent::Forwarded(_))).await;
    let AgentEvent::Forwarded(RelayMessage::FileMessage(file)) = file else {
        panic!("expected file_message, got {file:?}");
    };
    assert_eq!(file.file_name, "notes.txt");
    assert_eq!(file.decode().unwrap(), b"meeting at 5");
}

/// Test unknown participants and duplicate names
#[tokio::test]
async fn test_registration_errors() {
    let config = Config::default();
    let (relay, alice, _bob) = pair(&config).await;

    assert!(matches!(
        alice.handle.start_call(Some(p("zed"))).await,
        Err(CallError::UnknownParticipant(_))
    ));
    assert!(matches!(
        alice.handle.start_call(None).await,
        Err(CallError::NoRemoteSelected)
    ));

    let duplicate = CallAgent::connect(
        &relay,
        p("alice"),
        &config,
        Arc::new(LoopbackMedia::new("alice", config.media.clone())),
    )
    .await;
    assert!(matches!(duplicate, Err(CallError::NameTaken(_))));

    alice.handle.select_remote(p("bob")).await.unwrap();
    alice.handle.start_call(None).await.unwrap();
    wait_state(&alice.handle, NegotiationState::Established).await;
}
