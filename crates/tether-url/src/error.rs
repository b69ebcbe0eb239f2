// ABOUTME: Error types for URL parsing using thiserror.
// ABOUTME: Grammar errors are user input errors and are never retried.

use thiserror::Error;

use crate::Protocol;

/// Errors that can occur while parsing an endpoint URL.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UrlError {
    /// The raw URL was empty.
    #[error("empty URL")]
    Empty,

    /// An exec URL had nothing after its prefix.
    #[error("no command or path specified")]
    NoCommand,

    /// An exec URL had more than one unquoted separator.
    #[error("too many separators")]
    TooManySeparators,

    /// The URL names a protocol this parser does not produce.
    #[error("{0} URLs are not supported")]
    UnsupportedProtocol(Protocol),

    /// The URL carries a scheme no protocol uses.
    #[error("unrecognized URL scheme: {0}")]
    UnknownScheme(String),
}

/// Result type alias using UrlError.
pub type Result<T> = std::result::Result<T, UrlError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(UrlError::Empty.to_string(), "empty URL");
        assert_eq!(
            UrlError::NoCommand.to_string(),
            "no command or path specified"
        );
        assert_eq!(
            UrlError::TooManySeparators.to_string(),
            "too many separators"
        );
        assert_eq!(
            UrlError::UnsupportedProtocol(Protocol::Ssh).to_string(),
            "ssh URLs are not supported"
        );
        assert_eq!(
            UrlError::UnknownScheme("http".to_string()).to_string(),
            "unrecognized URL scheme: http"
        );
    }
}
