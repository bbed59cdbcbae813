use crate::events::{ClientEvent, Usage};
use async_trait::async_trait;
use techie_protocol::HostInfo;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("Not authenticated")]
    NotAuthenticated,
    #[error("Token retrieval failed: {0}")]
    Failed(String),
}

#[derive(Debug, Error)]
pub enum UsageError {
    #[error("Usage request failed: {0}")]
    Request(String),
    #[error("Usage endpoint returned status {0}")]
    Status(u16),
}

/// Supplies the identity token attached to the connection and every frame.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn token(&self) -> Result<String, TokenError>;
}

/// Describes the local machine for the outbound handshake.
#[async_trait]
pub trait EnvironmentProbe: Send + Sync {
    async fn host_info(&self) -> HostInfo;
}

/// Out-of-band usage lookup, refreshed after turns.
#[async_trait]
pub trait UsageReporter: Send + Sync {
    async fn fetch_usage(&self, conversation_id: &str) -> Result<Usage, UsageError>;
}

/// Receives events for rendering. Must not block.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: ClientEvent);
}

impl EventSink for mpsc::UnboundedSender<ClientEvent> {
    fn emit(&self, event: ClientEvent) {
        // A dropped receiver means nobody is rendering any more.
        let _ = self.send(event);
    }
}
