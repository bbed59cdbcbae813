//! Wire format shared by the client and the remote agent.
//!
//! Inbound (agent → client) messages are [`ServerMessage`], outbound
//! (client → agent) messages are [`ClientMessage`]. Both are tagged by a
//! `type` field; parsing rejects tags outside the known set.

pub mod error;
pub mod messages;
pub mod tools;
pub mod truncate;

pub use error::ProtocolError;
pub use messages::{ClientMessage, HostInfo, ServerMessage, SEND_ACTION};
pub use tools::{
    AuditCategory, AuditReport, CommandCall, CommandResult, ElevationCall, ElevationResult,
    ToolCall, ToolResult, DECLINED_MESSAGE, NO_CREDENTIAL_MESSAGE,
};
pub use truncate::{truncate_utf8, CHAT_MESSAGE_LIMIT, TOOL_OUTPUT_LIMIT};
