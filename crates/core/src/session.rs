//! One chat with the agent.
//!
//! A session wires the connection, the batch worker and the process engine
//! together and routes every inbound message to the right place. Routing never
//! waits on command execution or human input; tool batches are queued for the
//! worker.

use crate::connection::ConnectionManager;
use crate::error::TransportError;
use crate::orchestrator::{Orchestrator, OrchestratorHandle, ToolBatch};
use crate::usage::refresh_usage;
use std::sync::Arc;
use techie_executor::ProcessEngine;
use techie_interfaces::{ClientEvent, EnvironmentProbe, EventSink, TokenProvider, UsageReporter};
use techie_policy::SafetySettings;
use techie_protocol::{ClientMessage, ServerMessage};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// External collaborators a session depends on.
pub struct SessionDeps {
    pub tokens: Arc<dyn TokenProvider>,
    pub probe: Arc<dyn EnvironmentProbe>,
    pub usage: Arc<dyn UsageReporter>,
    pub settings: Arc<dyn SafetySettings>,
    pub events: Arc<dyn EventSink>,
}

struct Core {
    connection: ConnectionManager,
    orchestrator: OrchestratorHandle,
    engine: Arc<ProcessEngine>,
    usage: Arc<dyn UsageReporter>,
    events: Arc<dyn EventSink>,
}

pub struct Session {
    core: Arc<Core>,
    dispatcher: JoinHandle<()>,
}

impl Session {
    /// Build the session and start its background tasks. Nothing connects
    /// until the first message is sent.
    pub fn start(endpoint: impl Into<String>, engine: Arc<ProcessEngine>, deps: SessionDeps) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        let connection = ConnectionManager::new(
            endpoint,
            deps.tokens,
            deps.probe,
            Arc::clone(&deps.events),
            inbound_tx,
        );

        let orchestrator = Orchestrator::new(
            Arc::clone(&engine),
            deps.settings,
            Arc::new(connection.clone()),
            Arc::clone(&deps.usage),
            Arc::clone(&deps.events),
        )
        .spawn();

        let core = Arc::new(Core {
            connection,
            orchestrator,
            engine,
            usage: deps.usage,
            events: deps.events,
        });
        let dispatcher = tokio::spawn(dispatch(Arc::clone(&core), inbound_rx));

        Self { core, dispatcher }
    }

    pub async fn send_chat(&self, text: &str) -> Result<(), TransportError> {
        let message = ClientMessage::chat(self.core.connection.conversation_id(), text);
        self.core.connection.send(message).await
    }

    pub fn orchestrator(&self) -> &OrchestratorHandle {
        &self.core.orchestrator
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.core.connection
    }

    pub fn engine(&self) -> &Arc<ProcessEngine> {
        &self.core.engine
    }

    /// Whether quitting now would kill running commands.
    pub fn has_active_processes(&self) -> bool {
        self.core.engine.has_active()
    }

    /// Start a new chat.
    pub async fn reset(&self) {
        self.core.reset().await;
    }

    /// Stop everything this session started.
    pub async fn shutdown(&self) {
        self.core.orchestrator.abandon();
        let cancelled = self.core.engine.cancel_all();
        self.core.connection.close().await;
        self.dispatcher.abort();
        info!(cancelled, "Session shut down");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.dispatcher.abort();
    }
}

impl Core {
    async fn reset(&self) {
        self.orchestrator.abandon();
        let cancelled = self.engine.cancel_all();
        self.connection.close().await;
        self.connection.set_conversation_id("");
        info!(cancelled, "Chat reset");
        self.events.emit(ClientEvent::ChatCleared);
    }

    async fn on_error(&self, code: String, message: String) {
        let message = match code.as_str() {
            "ConversationNotFound" => {
                self.connection.set_conversation_id("");
                message
            }
            "NotEnoughCredits" => {
                self.events.emit(ClientEvent::CreditsExhausted);
                message
            }
            "InternalServerError" => "Internal Server Error".to_string(),
            "InvalidRequestError" => {
                self.reset().await;
                "Invalid request error. Please repeat the message.".to_string()
            }
            _ => message,
        };

        warn!(code = %code, "Agent reported an error: {}", message);
        self.events.emit(ClientEvent::ServerError { code, message });
    }
}

async fn dispatch(core: Arc<Core>, mut inbound: mpsc::UnboundedReceiver<ServerMessage>) {
    while let Some(message) = inbound.recv().await {
        match message {
            ServerMessage::Handshake { conversation_id } => {
                debug!(conversation_id = %conversation_id, "Session ready");
            }
            ServerMessage::Message {
                conversation_id,
                message,
            } => {
                core.events.emit(ClientEvent::AssistantMessage {
                    conversation_id,
                    message,
                });
                let core = Arc::clone(&core);
                tokio::spawn(async move {
                    let conversation_id = core.connection.conversation_id();
                    refresh_usage(&*core.usage, &*core.events, &conversation_id).await;
                });
            }
            ServerMessage::Tool {
                conversation_id,
                tools,
            } => {
                let batch = ToolBatch {
                    conversation_id,
                    tools,
                };
                if !core.orchestrator.submit(batch) {
                    warn!("Batch worker is gone; tool batch dropped");
                }
            }
            ServerMessage::Done { conversation_id } => {
                core.events.emit(ClientEvent::Idle { conversation_id });
            }
            ServerMessage::Error { code, message } => core.on_error(code, message).await,
        }
    }
    debug!("Inbound dispatch stopped");
}
