use thiserror::Error;

/// Failure talking to the relay
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ClientError {
    /// The relay refused the request before streaming, with its `{error}` message.
    #[error("{message}")]
    Rejected { status: u16, message: String },

    #[error("Transport error: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        ClientError::Transport(err.to_string())
    }
}

/// User-visible failure of a chat turn
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ChatError {
    #[error("{0}")]
    Rejected(String),

    #[error("{0}")]
    Upstream(String),

    #[error("Connection lost: {0}")]
    Transport(String),

    #[error("The response ended before it was complete")]
    Incomplete,

    #[error("Message cannot be empty")]
    EmptyMessage,

    #[error("No user message at position {0}")]
    NotAUserMessage(usize),
}

impl From<ClientError> for ChatError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Rejected { message, .. } => ChatError::Rejected(message),
            ClientError::Transport(message) => ChatError::Transport(message),
        }
    }
}
