use thiserror::Error;

/// Failure to post a message to the chat platform.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("platform rejected message: {0}")]
    Rejected(String),
}

impl From<reqwest::Error> for SendError {
    fn from(err: reqwest::Error) -> Self {
        SendError::Transport(err.to_string())
    }
}

/// Failure of the reply publisher, handed up to the supervisor in `main`.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to look up channel {channel}: {reason}")]
    Lookup { channel: String, reason: String },
    #[error("failed to post reply to {channel} after {attempts} attempt(s): {source}")]
    Send {
        channel: String,
        attempts: u32,
        #[source]
        source: SendError,
    },
}
