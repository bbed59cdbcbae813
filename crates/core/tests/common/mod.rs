//! Shared fakes and a loopback agent for the core integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use techie_core::{MessageSender, TransportError};
use techie_interfaces::{
    ClientEvent, EnvironmentProbe, TokenError, TokenProvider, Usage, UsageError, UsageReporter,
};
use techie_protocol::{ClientMessage, HostInfo};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

pub const WAIT: Duration = Duration::from_secs(10);

pub struct StaticToken(pub &'static str);

#[async_trait]
impl TokenProvider for StaticToken {
    async fn token(&self) -> Result<String, TokenError> {
        if self.0.is_empty() {
            return Err(TokenError::NotAuthenticated);
        }
        Ok(self.0.to_string())
    }
}

/// Hands out a token `n` times, then reports the user as signed out.
pub struct LimitedToken {
    remaining: AtomicUsize,
}

impl LimitedToken {
    pub fn new(n: usize) -> Self {
        Self {
            remaining: AtomicUsize::new(n),
        }
    }
}

#[async_trait]
impl TokenProvider for LimitedToken {
    async fn token(&self) -> Result<String, TokenError> {
        self.remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .map(|_| "tok".to_string())
            .map_err(|_| TokenError::NotAuthenticated)
    }
}

pub struct FixedProbe;

#[async_trait]
impl EnvironmentProbe for FixedProbe {
    async fn host_info(&self) -> HostInfo {
        HostInfo {
            system_info: "Linux testbox 6.1.0".to_string(),
            shell_info: "/bin/sh".to_string(),
            username: "tester".to_string(),
            os: "linux Linux (x86_64)".to_string(),
            home: "/home/tester".to_string(),
        }
    }
}

pub struct FixedUsage;

#[async_trait]
impl UsageReporter for FixedUsage {
    async fn fetch_usage(&self, _conversation_id: &str) -> Result<Usage, UsageError> {
        Ok(Usage {
            completion_tokens: 10,
            prompt_tokens: 20,
            total_tokens: 30,
        })
    }
}

/// Captures outbound messages instead of sending them.
pub struct Recorder(pub mpsc::UnboundedSender<ClientMessage>);

#[async_trait]
impl MessageSender for Recorder {
    async fn send(&self, message: ClientMessage) -> Result<(), TransportError> {
        self.0.send(message).map_err(|_| TransportError::NotConnected)
    }
}

/// Wait for the first event matching `wanted`, skipping the rest.
pub async fn next_event<F>(rx: &mut mpsc::UnboundedReceiver<ClientEvent>, wanted: F) -> ClientEvent
where
    F: Fn(&ClientEvent) -> bool,
{
    timeout(WAIT, async {
        loop {
            let event = rx.recv().await.expect("event channel closed");
            if wanted(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Stand-in for the remote agent on a loopback port.
pub struct Agent {
    listener: TcpListener,
    pub endpoint: String,
}

impl Agent {
    pub async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        Self {
            listener,
            endpoint: format!("ws://{}/ws", addr),
        }
    }

    pub async fn accept(&self) -> Peer {
        let (stream, _) = timeout(WAIT, self.listener.accept())
            .await
            .expect("client never connected")
            .unwrap();

        let mut uri = String::new();
        let ws = tokio_tungstenite::accept_hdr_async(
            stream,
            |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
                uri = request.uri().to_string();
                Ok(response)
            },
        )
        .await
        .unwrap();

        Peer { ws, uri }
    }
}

pub struct Peer {
    ws: WebSocketStream<TcpStream>,
    pub uri: String,
}

impl Peer {
    pub async fn recv_json(&mut self) -> Value {
        timeout(WAIT, async {
            loop {
                match self.ws.next().await {
                    Some(Ok(Message::Text(text))) => return serde_json::from_str(&text).unwrap(),
                    Some(Ok(_)) => continue,
                    other => panic!("connection ended: {:?}", other),
                }
            }
        })
        .await
        .expect("timed out waiting for a frame")
    }

    /// Next text frame, or `None` once the client drops the connection.
    pub async fn next_text(&mut self) -> Option<Value> {
        timeout(WAIT, async {
            loop {
                match self.ws.next().await {
                    Some(Ok(Message::Text(text))) => {
                        return Some(serde_json::from_str(&text).unwrap())
                    }
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return None,
                    Some(Ok(_)) => continue,
                }
            }
        })
        .await
        .expect("client neither wrote nor closed")
    }

    pub async fn send_json(&mut self, value: Value) {
        self.ws.send(Message::Text(value.to_string())).await.unwrap();
    }

    pub async fn send_raw(&mut self, text: &str) {
        self.ws.send(Message::Text(text.to_string())).await.unwrap();
    }

    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }

    /// Wait until the client closes its side.
    pub async fn expect_closed(&mut self) {
        timeout(WAIT, async {
            loop {
                match self.ws.next().await {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                    Some(Ok(_)) => continue,
                }
            }
        })
        .await
        .expect("client kept the connection open");
    }
}
