use techie_protocol::NO_CREDENTIAL_MESSAGE;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("Failed to spawn process: {0}")]
    Spawn(String),

    #[error("{}", NO_CREDENTIAL_MESSAGE)]
    NoCredential,

    #[error("Privilege elevation is not supported on this platform")]
    Unsupported,

    #[error("Process already running: {0}")]
    AlreadyRunning(String),

    #[error("Failed to wait for process: {0}")]
    Wait(String),
}
