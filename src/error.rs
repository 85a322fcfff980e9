//! Error types for the revchat client.
//!
//! Every failure a session can observe is one variant of [`Error`].  Transport
//! failures (timeouts, connection and mid-stream read errors) are grouped by
//! [`Error::is_transport`].  A stream line that is not JSON is not an error at
//! all; it is skipped by the stream parser.

use std::error;
use std::fmt;
use std::io;
use std::sync::Arc;

/// The main error type for revchat.
#[derive(Clone, Debug)]
pub enum Error {
    /// The caller asked for something the session cannot express, such as a
    /// parent message without a conversation.
    InvalidRequest {
        /// Human-readable error message.
        message: String,
    },

    /// A conversation could not be resolved to a head message, even after
    /// refreshing the conversation mapping.
    UnknownConversation {
        /// The conversation that was asked for.
        conversation_id: String,
    },

    /// The service answered with a non-2xx status, or put its error marker in
    /// the stream.
    Upstream {
        /// HTTP status code.
        status_code: u16,
        /// Raw response body.
        body: String,
    },

    /// A stream event parsed as JSON but lacks a field every event must carry.
    MalformedEvent {
        /// Human-readable error message.
        message: String,
        /// The offending line, after unescaping.
        line: String,
    },

    /// Login details are present but cannot be turned into an access token.
    Authentication {
        /// Human-readable error message.
        message: String,
    },

    /// The configuration is missing or unusable.
    Configuration {
        /// Human-readable error message.
        message: String,
    },

    /// The request or the stream timed out.
    Timeout {
        /// Human-readable error message.
        message: String,
        /// Duration of the timeout in seconds.
        duration: Option<f64>,
    },

    /// Connection error, including proxy failures.
    Connection {
        /// Human-readable error message.
        message: String,
        /// Underlying cause.
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    },

    /// HTTP client error.
    HttpClient {
        /// Human-readable error message.
        message: String,
        /// The underlying error.
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    },

    /// Reading the streamed body failed part way through.
    Streaming {
        /// Human-readable error message.
        message: String,
        /// The underlying error.
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    },

    /// Error during JSON serialization or deserialization of a whole body.
    Serialization {
        /// Human-readable error message.
        message: String,
        /// The underlying error.
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    },

    /// I/O error.
    Io {
        /// Human-readable error message.
        message: String,
        /// The underlying error.
        source: Arc<io::Error>,
    },

    /// A URL parsing or manipulation error.
    Url {
        /// Human-readable error message.
        message: String,
        /// The underlying error.
        source: Option<url::ParseError>,
    },
}

impl Error {
    /// Creates a new invalid request error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Error::InvalidRequest {
            message: message.into(),
        }
    }

    /// Creates a new unknown conversation error.
    pub fn unknown_conversation(conversation_id: impl Into<String>) -> Self {
        Error::UnknownConversation {
            conversation_id: conversation_id.into(),
        }
    }

    /// Creates a new upstream error.
    pub fn upstream(status_code: u16, body: impl Into<String>) -> Self {
        Error::Upstream {
            status_code,
            body: body.into(),
        }
    }

    /// Creates a new malformed event error.
    pub fn malformed_event(message: impl Into<String>, line: impl Into<String>) -> Self {
        Error::MalformedEvent {
            message: message.into(),
            line: line.into(),
        }
    }

    /// Creates a new authentication error.
    pub fn authentication(message: impl Into<String>) -> Self {
        Error::Authentication {
            message: message.into(),
        }
    }

    /// Creates a new configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Error::Configuration {
            message: message.into(),
        }
    }

    /// Creates a new timeout error.
    pub fn timeout(message: impl Into<String>, duration: Option<f64>) -> Self {
        Error::Timeout {
            message: message.into(),
            duration,
        }
    }

    /// Creates a new connection error.
    pub fn connection(
        message: impl Into<String>,
        source: Option<Box<dyn error::Error + Send + Sync>>,
    ) -> Self {
        Error::Connection {
            message: message.into(),
            source: source.map(Arc::from),
        }
    }

    /// Creates a new HTTP client error.
    pub fn http_client(
        message: impl Into<String>,
        source: Option<Box<dyn error::Error + Send + Sync>>,
    ) -> Self {
        Error::HttpClient {
            message: message.into(),
            source: source.map(Arc::from),
        }
    }

    /// Creates a new streaming error.
    pub fn streaming(
        message: impl Into<String>,
        source: Option<Box<dyn error::Error + Send + Sync>>,
    ) -> Self {
        Error::Streaming {
            message: message.into(),
            source: source.map(Arc::from),
        }
    }

    /// Creates a new serialization error.
    pub fn serialization(
        message: impl Into<String>,
        source: Option<Box<dyn error::Error + Send + Sync>>,
    ) -> Self {
        Error::Serialization {
            message: message.into(),
            source: source.map(Arc::from),
        }
    }

    /// Creates a new I/O error.
    pub fn io(message: impl Into<String>, source: io::Error) -> Self {
        Error::Io {
            message: message.into(),
            source: Arc::new(source),
        }
    }

    /// Creates a new URL error.
    pub fn url(message: impl Into<String>, source: Option<url::ParseError>) -> Self {
        Error::Url {
            message: message.into(),
            source,
        }
    }

    /// Returns true if the caller supplied an inconsistent request.
    pub fn is_invalid_request(&self) -> bool {
        matches!(self, Error::InvalidRequest { .. })
    }

    /// Returns true if a conversation could not be resolved.
    pub fn is_unknown_conversation(&self) -> bool {
        matches!(self, Error::UnknownConversation { .. })
    }

    /// Returns true if the service reported an error.
    pub fn is_upstream(&self) -> bool {
        matches!(self, Error::Upstream { .. })
    }

    /// Returns true if a stream event lacked a required field.
    pub fn is_malformed_event(&self) -> bool {
        matches!(self, Error::MalformedEvent { .. })
    }

    /// Returns true if this error is a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }

    /// Returns true if this error is a connection error.
    pub fn is_connection(&self) -> bool {
        matches!(self, Error::Connection { .. })
    }

    /// Returns true if the network, a proxy, or a timeout failed the request.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::Timeout { .. }
                | Error::Connection { .. }
                | Error::HttpClient { .. }
                | Error::Streaming { .. }
        )
    }

    /// Returns the status code associated with this error, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Error::Upstream { status_code, .. } => Some(*status_code),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidRequest { message } => {
                write!(f, "Invalid request: {message}")
            }
            Error::UnknownConversation { conversation_id } => {
                write!(f, "Unknown conversation: {conversation_id}")
            }
            Error::Upstream { status_code, body } => {
                if body.is_empty() {
                    write!(f, "Upstream error ({status_code})")
                } else {
                    write!(f, "Upstream error ({status_code}): {body}")
                }
            }
            Error::MalformedEvent { message, line } => {
                write!(f, "Malformed event: {message} in '{line}'")
            }
            Error::Authentication { message } => {
                write!(f, "Authentication error: {message}")
            }
            Error::Configuration { message } => {
                write!(f, "Configuration error: {message}")
            }
            Error::Timeout { message, duration } => {
                if let Some(duration) = duration {
                    write!(f, "Timeout error: {message} ({duration} seconds)")
                } else {
                    write!(f, "Timeout error: {message}")
                }
            }
            Error::Connection { message, .. } => {
                write!(f, "Connection error: {message}")
            }
            Error::HttpClient { message, .. } => {
                write!(f, "HTTP client error: {message}")
            }
            Error::Streaming { message, .. } => {
                write!(f, "Streaming error: {message}")
            }
            Error::Serialization { message, .. } => {
                write!(f, "Serialization error: {message}")
            }
            Error::Io { message, .. } => {
                write!(f, "I/O error: {message}")
            }
            Error::Url { message, .. } => {
                write!(f, "URL error: {message}")
            }
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::Connection { source, .. }
            | Error::HttpClient { source, .. }
            | Error::Streaming { source, .. }
            | Error::Serialization { source, .. } => source
                .as_ref()
                .map(|e| e.as_ref() as &(dyn error::Error + 'static)),
            Error::Io { source, .. } => Some(source),
            Error::Url { source, .. } => {
                source.as_ref().map(|e| e as &(dyn error::Error + 'static))
            }
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::io(err.to_string(), err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::serialization(format!("JSON error: {err}"), Some(Box::new(err)))
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::url(format!("URL parse error: {err}"), Some(err))
    }
}

/// A specialized Result type for revchat operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_class() {
        assert!(Error::timeout("slow", Some(1.0)).is_transport());
        assert!(Error::connection("refused", None).is_transport());
        assert!(Error::streaming("reset", None).is_transport());
        assert!(!Error::upstream(500, "boom").is_transport());
        assert!(!Error::invalid_request("nope").is_transport());
    }

    #[test]
    fn upstream_carries_status_and_body() {
        let err = Error::upstream(429, "slow down");
        assert_eq!(err.status_code(), Some(429));
        assert_eq!(err.to_string(), "Upstream error (429): slow down");
        assert_eq!(Error::upstream(500, "").to_string(), "Upstream error (500)");
    }

    #[test]
    fn display_names_the_conversation() {
        let err = Error::unknown_conversation("c1");
        assert!(err.is_unknown_conversation());
        assert_eq!(err.to_string(), "Unknown conversation: c1");
    }
}
