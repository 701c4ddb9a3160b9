//! Error types for rungp.

use thiserror::Error;

/// Errors reported by task status and terminal feeds.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Feed error: {0}")]
    Feed(String),

    #[error("Connection error: {0}")]
    Connect(String),
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_keep_cause() {
        assert_eq!(
            Error::Connect("connection refused".into()).to_string(),
            "Connection error: connection refused"
        );
        assert_eq!(
            Error::Feed("unexpected frame".into()).to_string(),
            "Feed error: unexpected frame"
        );
    }
}
