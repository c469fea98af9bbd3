/// Crate-wide error type.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Upstream error: status={status}, message={message}")]
    Upstream { status: u16, message: String },
    #[error("Store error: {0}")]
    Store(String),
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ChatError {
    /// Text shown to the user after `Error: ` when a turn fails.
    #[must_use]
    pub fn reason(&self) -> String {
        match self {
            ChatError::Upstream { message, .. } => message.clone(),
            ChatError::Config(msg)
            | ChatError::Transport(msg)
            | ChatError::Store(msg)
            | ChatError::Protocol(msg)
            | ChatError::Internal(msg) => msg.clone(),
        }
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        ChatError::Transport(err.to_string())
    }
}

impl From<crate::config::ConfigError> for ChatError {
    fn from(err: crate::config::ConfigError) -> Self {
        ChatError::Config(err.to_string())
    }
}

/// Build the user-visible marker that replaces a failed turn's content.
#[must_use]
pub fn error_marker(reason: &str) -> String {
    format!("Error: {reason}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_reason_is_the_body_message() {
        let err = ChatError::Upstream {
            status: 503,
            message: "agent unavailable".to_string(),
        };
        assert_eq!(err.reason(), "agent unavailable");
        assert_eq!(error_marker(&err.reason()), "Error: agent unavailable");
    }

    #[test]
    fn display_keeps_category_prefix() {
        let err = ChatError::Transport("connection reset".to_string());
        assert_eq!(err.to_string(), "Transport error: connection reset");
        assert_eq!(err.reason(), "connection reset");
    }
}
