use techie_interfaces::TokenError;
use techie_protocol::ProtocolError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Token unavailable: {0}")]
    Token(#[from] TokenError),

    #[error("Invalid endpoint: {0}")]
    Endpoint(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Not connected")]
    NotConnected,
}
