//! Top-level channel messages.

use crate::error::ProtocolError;
use crate::tools::{ToolCall, ToolResult};
use crate::truncate::{truncate_utf8, CHAT_MESSAGE_LIMIT};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Routing action the gateway expects on every outbound frame.
pub const SEND_ACTION: &str = "sendmessage";

const SERVER_TAGS: &[&str] = &["handshake", "message", "tool", "done", "error"];
const CLIENT_TAGS: &[&str] = &["handshake", "message", "tool"];

/// Local host descriptors announced in the outbound handshake.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HostInfo {
    pub system_info: String,
    pub shell_info: String,
    pub username: String,
    pub os: String,
    pub home: String,
}

/// Messages sent from the agent to the client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Handshake {
        conversation_id: String,
    },
    Message {
        conversation_id: String,
        message: String,
    },
    Tool {
        conversation_id: String,
        tools: Vec<ToolCall>,
    },
    Done {
        conversation_id: String,
    },
    Error {
        code: String,
        message: String,
    },
}

impl ServerMessage {
    /// Parse one text frame. Unknown `type` tags are rejected.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        parse_tagged(text, SERVER_TAGS)
    }

    pub fn tag(&self) -> &'static str {
        match self {
            ServerMessage::Handshake { .. } => "handshake",
            ServerMessage::Message { .. } => "message",
            ServerMessage::Tool { .. } => "tool",
            ServerMessage::Done { .. } => "done",
            ServerMessage::Error { .. } => "error",
        }
    }
}

/// Messages sent from the client to the agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Handshake {
        conversation_id: String,
        #[serde(flatten)]
        host: HostInfo,
    },
    Message {
        conversation_id: String,
        message: String,
    },
    Tool {
        conversation_id: String,
        tools: Vec<ToolResult>,
    },
}

impl ClientMessage {
    /// Chat message with the body cut to [`CHAT_MESSAGE_LIMIT`].
    pub fn chat(conversation_id: impl Into<String>, message: &str) -> Self {
        ClientMessage::Message {
            conversation_id: conversation_id.into(),
            message: truncate_utf8(message, CHAT_MESSAGE_LIMIT).to_string(),
        }
    }

    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        parse_tagged(text, CLIENT_TAGS)
    }

    pub fn conversation_id(&self) -> &str {
        match self {
            ClientMessage::Handshake { conversation_id, .. }
            | ClientMessage::Message { conversation_id, .. }
            | ClientMessage::Tool { conversation_id, .. } => conversation_id,
        }
    }

    pub fn set_conversation_id(&mut self, id: impl Into<String>) {
        match self {
            ClientMessage::Handshake { conversation_id, .. }
            | ClientMessage::Message { conversation_id, .. }
            | ClientMessage::Tool { conversation_id, .. } => *conversation_id = id.into(),
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            ClientMessage::Handshake { .. } => "handshake",
            ClientMessage::Message { .. } => "message",
            ClientMessage::Tool { .. } => "tool",
        }
    }

    /// Serialize with the auth `token` and routing `action` added alongside
    /// the message fields.
    pub fn to_frame(&self, token: &str) -> Result<String, ProtocolError> {
        #[derive(Serialize)]
        struct Envelope<'a> {
            #[serde(flatten)]
            message: &'a ClientMessage,
            token: &'a str,
            action: &'static str,
        }

        Ok(serde_json::to_string(&Envelope {
            message: self,
            token,
            action: SEND_ACTION,
        })?)
    }
}

fn parse_tagged<T>(text: &str, known: &[&str]) -> Result<T, ProtocolError>
where
    T: serde::de::DeserializeOwned,
{
    let value: Value = serde_json::from_str(text)?;
    let tag = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(ProtocolError::MissingTag)?
        .to_string();

    if !known.contains(&tag.as_str()) {
        return Err(ProtocolError::UnknownTag(tag));
    }

    serde_json::from_value(value).map_err(|e| ProtocolError::Invalid {
        tag,
        reason: e.to_string(),
    })
}
