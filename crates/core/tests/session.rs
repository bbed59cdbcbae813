#![cfg(unix)]
#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::{next_event, Agent, FixedProbe, FixedUsage, Peer, StaticToken, WAIT};
use serde_json::json;
use std::sync::Arc;
use techie_core::{ConnectionState, Session, SessionDeps};
use techie_executor::{ProcessEngine, Shell};
use techie_interfaces::{ClientEvent, CommandState, Usage};
use techie_policy::SafetyLevel;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Duration};

fn start(endpoint: &str) -> (Session, mpsc::UnboundedReceiver<ClientEvent>) {
    let (events_tx, events) = mpsc::unbounded_channel();
    let events_tx = Arc::new(events_tx);
    let engine = Arc::new(ProcessEngine::new(
        Shell::platform_default(),
        events_tx.clone(),
    ));
    let session = Session::start(
        endpoint,
        engine,
        SessionDeps {
            tokens: Arc::new(StaticToken("tok")),
            probe: Arc::new(FixedProbe),
            usage: Arc::new(FixedUsage),
            settings: Arc::new(SafetyLevel::Critical),
            events: events_tx,
        },
    );
    (session, events)
}

/// Start a chat and complete the handshake as conversation `c1`.
async fn chat(agent: &Agent, session: &Session, text: &str) -> Peer {
    let sending = session.send_chat(text);
    let (sent, mut peer) = tokio::join!(sending, async {
        let mut peer = agent.accept().await;
        assert_eq!(peer.recv_json().await["type"], "handshake");
        peer
    });
    sent.unwrap();

    peer.send_json(json!({"type": "handshake", "conversation_id": "c1"}))
        .await;
    let message = peer.recv_json().await;
    assert_eq!(message["type"], "message");
    assert_eq!(message["message"], text);
    peer
}

#[tokio::test]
async fn test_tool_batch_round_trip() {
    let agent = Agent::bind().await;
    let (session, mut events) = start(&agent.endpoint);
    let mut peer = chat(&agent, &session, "what is in here?").await;

    peer.send_json(json!({
        "type": "tool",
        "conversation_id": "c1",
        "tools": [{
            "id": "t1",
            "type": "cmd",
            "cmd": "echo hi",
            "desc": "Say hi",
            "report": {"category": "Safe", "reason": "prints text"}
        }]
    }))
    .await;

    let reply = peer.recv_json().await;
    assert_eq!(reply["type"], "tool");
    assert_eq!(reply["conversation_id"], "c1");
    assert_eq!(reply["token"], "tok");
    assert_eq!(
        reply["tools"],
        json!([{
            "id": "t1",
            "type": "cmd",
            "result": true,
            "out": "hi\n",
            "err": "",
            "exit_code": 0
        }])
    );

    next_event(&mut events, |e| {
        matches!(e, ClientEvent::CommandObserved { state: CommandState::Running, .. })
    })
    .await;
    next_event(&mut events, |e| matches!(e, ClientEvent::UsageUpdated(_))).await;
}

#[tokio::test]
async fn test_assistant_message_and_done() {
    let agent = Agent::bind().await;
    let (session, mut events) = start(&agent.endpoint);
    let mut peer = chat(&agent, &session, "hello").await;

    peer.send_json(json!({"type": "message", "conversation_id": "c1", "message": "Hi there"}))
        .await;
    let message = next_event(&mut events, |e| {
        matches!(e, ClientEvent::AssistantMessage { .. })
    })
    .await;
    assert_eq!(
        message,
        ClientEvent::AssistantMessage {
            conversation_id: "c1".into(),
            message: "Hi there".into()
        }
    );
    let usage = next_event(&mut events, |e| matches!(e, ClientEvent::UsageUpdated(_))).await;
    assert_eq!(
        usage,
        ClientEvent::UsageUpdated(Usage {
            completion_tokens: 10,
            prompt_tokens: 20,
            total_tokens: 30
        })
    );

    peer.send_json(json!({"type": "done", "conversation_id": "c1"}))
        .await;
    next_event(&mut events, |e| {
        *e == ClientEvent::Idle {
            conversation_id: "c1".into(),
        }
    })
    .await;
}

#[tokio::test]
async fn test_error_codes() {
    let agent = Agent::bind().await;
    let (session, mut events) = start(&agent.endpoint);
    let mut peer = chat(&agent, &session, "hello").await;

    peer.send_json(json!({"type": "error", "code": "NotEnoughCredits", "message": "top up"}))
        .await;
    next_event(&mut events, |e| *e == ClientEvent::CreditsExhausted).await;
    next_event(&mut events, |e| {
        matches!(e, ClientEvent::ServerError { code, .. } if code == "NotEnoughCredits")
    })
    .await;

    peer.send_json(json!({"type": "error", "code": "InternalServerError", "message": "trace"}))
        .await;
    let internal = next_event(&mut events, |e| {
        matches!(e, ClientEvent::ServerError { .. })
    })
    .await;
    assert_eq!(
        internal,
        ClientEvent::ServerError {
            code: "InternalServerError".into(),
            message: "Internal Server Error".into()
        }
    );

    peer.send_json(json!({"type": "error", "code": "ConversationNotFound", "message": "gone"}))
        .await;
    next_event(&mut events, |e| {
        matches!(e, ClientEvent::ServerError { code, .. } if code == "ConversationNotFound")
    })
    .await;
    assert_eq!(session.connection().conversation_id(), "");
}

#[tokio::test]
async fn test_invalid_request_resets_chat() {
    let agent = Agent::bind().await;
    let (session, mut events) = start(&agent.endpoint);
    let mut peer = chat(&agent, &session, "hello").await;

    peer.send_json(json!({"type": "error", "code": "InvalidRequestError", "message": "bad"}))
        .await;
    next_event(&mut events, |e| *e == ClientEvent::ChatCleared).await;
    let error = next_event(&mut events, |e| {
        matches!(e, ClientEvent::ServerError { .. })
    })
    .await;
    assert_eq!(
        error,
        ClientEvent::ServerError {
            code: "InvalidRequestError".into(),
            message: "Invalid request error. Please repeat the message.".into()
        }
    );

    assert_eq!(session.connection().state(), ConnectionState::Closed);
    assert_eq!(session.connection().conversation_id(), "");
    peer.expect_closed().await;
}

#[tokio::test]
async fn test_reset_abandons_pending_approval() {
    let agent = Agent::bind().await;
    let (session, mut events) = start(&agent.endpoint);
    let mut peer = chat(&agent, &session, "clean up").await;

    peer.send_json(json!({
        "type": "tool",
        "conversation_id": "c1",
        "tools": [{
            "id": "d1",
            "type": "cmd",
            "cmd": "echo never",
            "desc": "Dangerous",
            "report": {"category": "Danger", "reason": "deletes data"}
        }]
    }))
    .await;
    next_event(&mut events, |e| {
        matches!(e, ClientEvent::CommandObserved { state: CommandState::PendingApproval, .. })
    })
    .await;

    session.reset().await;
    next_event(&mut events, |e| *e == ClientEvent::ChatCleared).await;
    assert!(session.orchestrator().pending_approvals().is_empty());
    assert_eq!(session.connection().state(), ConnectionState::Closed);
    peer.expect_closed().await;
}

#[tokio::test]
async fn test_shutdown_stops_running_commands() {
    let agent = Agent::bind().await;
    let (session, mut events) = start(&agent.endpoint);
    let mut peer = chat(&agent, &session, "wait a bit").await;

    peer.send_json(json!({
        "type": "tool",
        "conversation_id": "c1",
        "tools": [{"id": "long", "type": "cmd", "cmd": "sleep 30", "desc": "Wait"}]
    }))
    .await;
    next_event(&mut events, |e| {
        matches!(e, ClientEvent::CommandObserved { state: CommandState::Running, .. })
    })
    .await;

    timeout(WAIT, async {
        while !session.has_active_processes() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    session.shutdown().await;
    next_event(&mut events, |e| {
        *e == ClientEvent::CommandFinished {
            id: "long".into(),
            success: false,
        }
    })
    .await;
    assert!(!session.has_active_processes());
}
