use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Message has no type tag")]
    MissingTag,

    #[error("Unknown message type: {0}")]
    UnknownTag(String),

    #[error("Invalid {tag} message: {reason}")]
    Invalid { tag: String, reason: String },
}
