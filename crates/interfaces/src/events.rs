//! Events the core emits for the rendering layer.

use serde::{Deserialize, Serialize};
use techie_protocol::AuditReport;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Where a command call is in its lifecycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CommandState {
    PendingApproval,
    Running,
    Declined,
}

/// Token consumption of a conversation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Usage {
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// A command call was received or changed state.
    CommandObserved {
        id: String,
        cmd: String,
        desc: String,
        report: Option<AuditReport>,
        state: CommandState,
    },
    /// A newly arrived chunk of a running command's output.
    CommandOutput {
        id: String,
        stream: OutputStream,
        chunk: String,
    },
    /// The command's process is gone. `success` is false when it was killed
    /// or could not be supervised to completion.
    CommandFinished { id: String, success: bool },
    CredentialRequested { message: String },
    CredentialResult { success: bool },
    UsageUpdated(Usage),
    AssistantMessage { conversation_id: String, message: String },
    /// The agent finished its turn.
    Idle { conversation_id: String },
    ServerError { code: String, message: String },
    CreditsExhausted,
    Typing { active: bool },
    ChatCleared,
    Disconnected,
}

impl ClientEvent {
    /// Command id this event belongs to, if any.
    pub fn command_id(&self) -> Option<&str> {
        match self {
            ClientEvent::CommandObserved { id, .. }
            | ClientEvent::CommandOutput { id, .. }
            | ClientEvent::CommandFinished { id, .. } => Some(id),
            _ => None,
        }
    }
}
