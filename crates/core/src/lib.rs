pub mod connection;
pub mod error;
pub mod orchestrator;
pub mod outbox;
pub mod session;
pub mod usage;

pub use connection::{
    ConnectionManager, ConnectionState, MessageSender, AUTH_ERROR_CODE, SEND_ERROR_CODE,
};
pub use error::TransportError;
pub use orchestrator::{Orchestrator, OrchestratorHandle, ToolBatch};
pub use outbox::PendingSlot;
pub use session::{Session, SessionDeps};
pub use usage::{refresh_usage, USAGE_ERROR_CODE};
