//! Error types for the mms layer.

use thiserror::Error;

/// Result type alias using the mms Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for mms operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed RDF or SPARQL input
    #[error("Parse error: {0}")]
    Parse(String),

    /// Missing or invalid credentials
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Authenticated but a permission condition failed
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Missing or unauthorized resource under glomar; answered without a
    /// body so the two cases cannot be told apart. The message is for logs.
    #[error("Not found (concealed): {0}")]
    Concealed(String),

    /// A named precondition of a guarded update did not hold
    #[error("Precondition failed ({condition}): {message}")]
    PreconditionFailed { condition: String, message: String },

    /// A named condition conflicted with current resource state
    #[error("Conflict ({condition}): {message}")]
    Conflict { condition: String, message: String },

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Request body content type is not supported
    #[error("Unsupported media type: {0}")]
    UnsupportedMediaType(String),

    /// None of the accepted response content types can be produced
    #[error("Not acceptable: {0}")]
    NotAcceptable(String),

    /// Backing store or collaborator answered with a non-2xx status
    #[error("Store returned {status}: {body}")]
    Store { status: u16, body: String },

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Outbound call exceeded its timeout; outcome is indeterminate
    #[error("Timeout: {0}")]
    Timeout(String),

    /// An invariant was violated (e.g. a guarded update failed with no condition flagged)
    #[error("Server bug: {0}")]
    ServerBug(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Name of the failed condition, if this error came from a guarded update.
    pub fn condition(&self) -> Option<&str> {
        match self {
            Error::PreconditionFailed { condition, .. } | Error::Conflict { condition, .. } => {
                Some(condition)
            }
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Timeout(e.to_string())
        } else {
            Error::Request(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_not_found() {
        let err = Error::NotFound("org acme".to_string());
        assert_eq!(err.to_string(), "Not found: org acme");
    }

    #[test]
    fn test_concealed_keeps_message_for_logs() {
        let err = Error::Concealed("User mallory is not permitted".to_string());
        assert!(err.to_string().contains("mallory"));
        assert!(err.condition().is_none());
    }

    #[test]
    fn test_error_display_precondition_failed() {
        let err = Error::PreconditionFailed {
            condition: "etagMatches".to_string(),
            message: "stale etag".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Precondition failed (etagMatches): stale etag"
        );
        assert_eq!(err.condition(), Some("etagMatches"));
    }

    #[test]
    fn test_error_display_conflict() {
        let err = Error::Conflict {
            condition: "orgNotExists".to_string(),
            message: "org already exists".to_string(),
        };
        assert!(err.to_string().contains("orgNotExists"));
        assert_eq!(err.condition(), Some("orgNotExists"));
    }

    #[test]
    fn test_error_display_store() {
        let err = Error::Store {
            status: 503,
            body: "unavailable".to_string(),
        };
        assert_eq!(err.to_string(), "Store returned 503: unavailable");
    }

    #[test]
    fn test_condition_absent_for_plain_errors() {
        assert!(Error::ServerBug("x".into()).condition().is_none());
        assert!(Error::Forbidden("x".into()).condition().is_none());
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        let err: Error = json_err.into();
        match err {
            Error::Serialization(msg) => assert!(!msg.is_empty()),
            _ => panic!("Expected Serialization error"),
        }
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
