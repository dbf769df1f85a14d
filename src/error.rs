//! Error types for courierq operations.

use thiserror::Error;

/// Result type used throughout courierq.
pub type CourierResult<T> = Result<T, CourierError>;

/// Main error type for courierq operations.
#[derive(Error, Debug)]
pub enum CourierError {
    /// The connection URI scheme has no registered transport factory
    #[error("Unsupported protocol: {scheme}. Supported protocols are: {}", supported.join(", "))]
    UnsupportedProtocol {
        /// The scheme that was requested
        scheme: String,
        /// Union of every registered factory's advertised schemes
        supported: Vec<String>,
    },

    /// Transport construction or I/O failure
    #[error("Connection error: {message}")]
    Connection {
        /// Error message
        message: String,
        /// Optional underlying error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The task name or method could not be resolved to a handler
    #[error("Dispatch error: {message}")]
    Dispatch {
        /// Error message
        message: String,
    },

    /// A failure reported by the remote worker
    #[error("{exc_type}({exc_message})")]
    Worker {
        /// Short kind of the worker-side error
        exc_type: String,
        /// Worker-side error message
        exc_message: String,
    },

    /// Malformed envelope or header set on the wire
    #[error("Protocol decode error: {message}")]
    ProtocolDecode {
        /// Error message
        message: String,
    },

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config {
        /// Error message
        message: String,
    },

    /// Internal invariant or reporting failure
    #[error("Internal error: {message}")]
    Internal {
        /// Error message
        message: String,
    },

    /// AMQP transport error
    #[cfg(feature = "amqp")]
    #[cfg_attr(docsrs, doc(cfg(feature = "amqp")))]
    #[error("AMQP error: {0}")]
    Amqp(#[from] lapin::Error),
}

impl CourierError {
    /// Create a new connection error with an underlying cause
    pub fn connection<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Connection {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a connection error without a cause
    pub fn connection_msg(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// Create a dispatch error
    pub fn dispatch(message: impl Into<String>) -> Self {
        Self::Dispatch {
            message: message.into(),
        }
    }

    /// Create a protocol decode error
    pub fn decode(message: impl Into<String>) -> Self {
        Self::ProtocolDecode {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

/// Error produced by a task body, as opposed to a failure to dispatch to it.
///
/// Reported back to the submitting client as a FAILURE result carrying the
/// kind and message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct TaskFailure {
    /// Short error kind, used as `exc_type` on the wire
    pub kind: String,
    /// Human-readable message, used as `exc_message` on the wire
    pub message: String,
}

impl TaskFailure {
    /// Create a new task failure
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for TaskFailure {
    fn from(e: serde_json::Error) -> Self {
        Self::new("SerializationError", e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_protocol_lists_known_schemes() {
        let err = CourierError::UnsupportedProtocol {
            scheme: "foo".to_string(),
            supported: vec!["amqp".to_string(), "memory".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("foo"));
        assert!(msg.contains("amqp, memory"));
    }

    #[test]
    fn worker_error_renders_like_an_exception() {
        let err = CourierError::Worker {
            exc_type: "ArithmeticError".to_string(),
            exc_message: "division by zero".to_string(),
        };
        assert_eq!(err.to_string(), "ArithmeticError(division by zero)");
    }
}
