//! Persistent WebSocket channel to the agent.
//!
//! The manager connects lazily on the first send, announces the host with a
//! handshake, and only transmits freely once the agent has acknowledged it.
//! Until then at most one outbound message is held back.

use crate::error::TransportError;
use crate::outbox::PendingSlot;
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::Arc;
use techie_interfaces::{ClientEvent, EnvironmentProbe, EventSink, TokenProvider};
use techie_protocol::{ClientMessage, ServerMessage};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWriter = SplitSink<WsStream, Message>;
type WsReader = SplitStream<WsStream>;

/// Code of the error event raised when no identity token is available.
pub const AUTH_ERROR_CODE: &str = "AuthenticationError";

/// Code of the error event raised when an accepted message cannot be delivered.
pub const SEND_ERROR_CODE: &str = "SendError";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    /// Transport open and handshake sent; waiting for the agent's reply.
    AwaitingHandshake,
    Ready,
    /// Closed on request. The next send opens a fresh connection.
    Closed,
}

/// Delivers client messages to the agent.
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send(&self, message: ClientMessage) -> Result<(), TransportError>;
}

struct Shared {
    state: ConnectionState,
    conversation_id: String,
    pending: PendingSlot<ClientMessage>,
    /// Bumped whenever a transport is torn down, so a stale reader cannot
    /// touch its successor.
    generation: u64,
    reader: Option<JoinHandle<()>>,
}

struct Inner {
    endpoint: String,
    tokens: Arc<dyn TokenProvider>,
    probe: Arc<dyn EnvironmentProbe>,
    events: Arc<dyn EventSink>,
    inbound: mpsc::UnboundedSender<ServerMessage>,
    shared: Mutex<Shared>,
    writer: tokio::sync::Mutex<Option<WsWriter>>,
}

#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    /// Parsed inbound messages are forwarded to `inbound` in arrival order.
    pub fn new(
        endpoint: impl Into<String>,
        tokens: Arc<dyn TokenProvider>,
        probe: Arc<dyn EnvironmentProbe>,
        events: Arc<dyn EventSink>,
        inbound: mpsc::UnboundedSender<ServerMessage>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                endpoint: endpoint.into(),
                tokens,
                probe,
                events,
                inbound,
                shared: Mutex::new(Shared {
                    state: ConnectionState::Disconnected,
                    conversation_id: String::new(),
                    pending: PendingSlot::new(),
                    generation: 0,
                    reader: None,
                }),
                writer: tokio::sync::Mutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.shared.lock().state
    }

    pub fn conversation_id(&self) -> String {
        self.inner.shared.lock().conversation_id.clone()
    }

    pub fn set_conversation_id(&self, conversation_id: impl Into<String>) {
        self.inner.shared.lock().conversation_id = conversation_id.into();
    }

    pub fn has_pending(&self) -> bool {
        !self.inner.shared.lock().pending.is_empty()
    }

    /// Transmit `message` now if the channel is ready, otherwise hold it as
    /// the pending message and connect if nobody is connecting yet.
    ///
    /// `Ok` for a held message only means it was accepted. It is dropped
    /// without an error to this caller if a newer message replaces it or if
    /// the connect attempt already under way fails; that attempt's own caller
    /// gets the error. A held message that fails to go out after the
    /// handshake is reported as a [`SEND_ERROR_CODE`] event.
    pub async fn send(&self, message: ClientMessage) -> Result<(), TransportError> {
        let (ready, attempt) = {
            let mut shared = self.inner.shared.lock();
            match shared.state {
                ConnectionState::Ready => (Some(message), None),
                ConnectionState::Connecting | ConnectionState::AwaitingHandshake => {
                    hold(&mut shared, message);
                    (None, None)
                }
                ConnectionState::Disconnected | ConnectionState::Closed => {
                    hold(&mut shared, message);
                    shared.state = ConnectionState::Connecting;
                    (None, Some(shared.generation))
                }
            }
        };

        if let Some(message) = ready {
            return self.inner.transmit(&message).await;
        }
        if let Some(attempt) = attempt {
            self.inner.connect(attempt).await?;
        }
        Ok(())
    }

    /// Close the connection and drop any pending message.
    pub async fn close(&self) {
        self.inner.teardown(None, ConnectionState::Closed, true).await;
        info!("Connection closed");
    }
}

#[async_trait]
impl MessageSender for ConnectionManager {
    async fn send(&self, message: ClientMessage) -> Result<(), TransportError> {
        ConnectionManager::send(self, message).await
    }
}

fn hold(shared: &mut Shared, message: ClientMessage) {
    if let Some(replaced) = shared.pending.put(message) {
        debug!(tag = replaced.tag(), "Pending message replaced by a newer one");
    }
}

impl Inner {
    /// Open the transport for connect attempt `attempt`, the generation
    /// current when it started. A teardown in the meantime retires it.
    async fn connect(self: &Arc<Self>, attempt: u64) -> Result<(), TransportError> {
        let token = match self.token().await {
            Ok(token) => token,
            Err(e) => {
                self.abort_connect(attempt);
                return Err(e);
            }
        };

        let url = match connect_url(&self.endpoint, &token) {
            Ok(url) => url,
            Err(e) => {
                self.abort_connect(attempt);
                return Err(e);
            }
        };

        info!(endpoint = %self.endpoint, "Connecting");
        let (stream, _response) = match connect_async(url.as_str()).await {
            Ok(connected) => connected,
            Err(e) => {
                warn!(endpoint = %self.endpoint, "Connect failed: {}", e);
                self.abort_connect(attempt);
                return Err(TransportError::WebSocket(e.to_string()));
            }
        };

        let (generation, conversation_id) = {
            let mut shared = self.shared.lock();
            if shared.generation != attempt || shared.state != ConnectionState::Connecting {
                debug!("Connection closed while it was opening");
                return Ok(());
            }
            shared.state = ConnectionState::AwaitingHandshake;
            (shared.generation, shared.conversation_id.clone())
        };

        let (writer, reader) = stream.split();
        *self.writer.lock().await = Some(writer);

        let task = tokio::spawn(read_loop(Arc::clone(self), reader, generation));
        {
            let mut shared = self.shared.lock();
            if shared.generation != generation {
                task.abort();
                return Ok(());
            }
            if let Some(stale) = shared.reader.replace(task) {
                stale.abort();
            }
        }

        let host = self.probe.host_info().await;
        let handshake = ClientMessage::Handshake {
            conversation_id,
            host,
        };
        if let Err(e) = self.transmit(&handshake).await {
            self.teardown(Some(generation), ConnectionState::Disconnected, true)
                .await;
            return Err(e);
        }
        debug!("Handshake sent");
        Ok(())
    }

    async fn token(&self) -> Result<String, TransportError> {
        self.tokens.token().await.map_err(|e| {
            warn!("Identity token unavailable: {}", e);
            self.events.emit(ClientEvent::ServerError {
                code: AUTH_ERROR_CODE.to_string(),
                message: e.to_string(),
            });
            TransportError::from(e)
        })
    }

    fn abort_connect(&self, attempt: u64) {
        let mut shared = self.shared.lock();
        if shared.generation != attempt {
            return;
        }
        if shared.state == ConnectionState::Connecting {
            shared.state = ConnectionState::Disconnected;
        }
        shared.pending.clear();
    }

    async fn transmit(&self, message: &ClientMessage) -> Result<(), TransportError> {
        let token = self.token().await?;
        let frame = message.to_frame(&token)?;

        let generation = self.shared.lock().generation;
        let sent = {
            let mut writer = self.writer.lock().await;
            let sink = writer.as_mut().ok_or(TransportError::NotConnected)?;
            sink.send(Message::Text(frame)).await
        };

        if let Err(e) = sent {
            warn!(tag = message.tag(), "Send failed: {}", e);
            self.teardown(Some(generation), ConnectionState::Disconnected, true)
                .await;
            return Err(TransportError::WebSocket(e.to_string()));
        }

        debug!(
            tag = message.tag(),
            conversation_id = %message.conversation_id(),
            "Message sent"
        );
        if !matches!(message, ClientMessage::Handshake { .. }) {
            self.events.emit(ClientEvent::Typing { active: true });
        }
        Ok(())
    }

    /// Returns false when the inbound receiver is gone.
    async fn on_message(&self, message: ServerMessage, generation: u64) -> bool {
        if let ServerMessage::Handshake { conversation_id } = &message {
            let pending = {
                let mut shared = self.shared.lock();
                if shared.generation != generation {
                    return true;
                }
                shared.conversation_id = conversation_id.clone();
                shared.state = ConnectionState::Ready;
                shared.pending.take()
            };
            info!(conversation_id = %conversation_id, "Handshake acknowledged");

            if let Some(mut pending) = pending {
                pending.set_conversation_id(conversation_id.clone());
                if let Err(e) = self.transmit(&pending).await {
                    warn!(tag = pending.tag(), "Pending message not delivered: {}", e);
                    self.events.emit(ClientEvent::ServerError {
                        code: SEND_ERROR_CODE.to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }

        if !matches!(message, ServerMessage::Done { .. }) {
            self.events.emit(ClientEvent::Typing { active: false });
        }
        self.inbound.send(message).is_ok()
    }

    /// Drop the current transport. With `expected` set, only the transport of
    /// that generation is affected. Returns whether anything was torn down.
    async fn teardown(
        &self,
        expected: Option<u64>,
        next: ConnectionState,
        abort_reader: bool,
    ) -> bool {
        let reader = {
            let mut shared = self.shared.lock();
            if expected.is_some_and(|generation| generation != shared.generation) {
                return false;
            }
            shared.generation += 1;
            shared.state = next;
            shared.pending.clear();
            shared.reader.take()
        };

        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(e) = writer.close().await {
                debug!("Close frame not delivered: {}", e);
            }
        }

        if next == ConnectionState::Disconnected {
            self.events.emit(ClientEvent::Disconnected);
        }

        if let Some(reader) = reader {
            if abort_reader {
                reader.abort();
            }
        }
        true
    }
}

async fn read_loop(inner: Arc<Inner>, mut reader: WsReader, generation: u64) {
    while let Some(frame) = reader.next().await {
        match frame {
            Ok(Message::Text(text)) => match ServerMessage::parse(&text) {
                Ok(message) => {
                    debug!(tag = message.tag(), "Message received");
                    if !inner.on_message(message, generation).await {
                        break;
                    }
                }
                Err(e) => warn!("Dropping inbound frame: {}", e),
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!("WebSocket read error: {}", e);
                break;
            }
        }
    }

    if inner
        .teardown(Some(generation), ConnectionState::Disconnected, false)
        .await
    {
        info!("Connection lost");
    }
}

fn connect_url(endpoint: &str, token: &str) -> Result<Url, TransportError> {
    let mut url =
        Url::parse(endpoint).map_err(|e| TransportError::Endpoint(format!("{}: {}", endpoint, e)))?;
    url.query_pairs_mut().append_pair("token", token);
    Ok(url)
}
