//! Connector error types
//!
//! Error definitions with transient/permanent classification and sanitized
//! user-facing messages for the connection-verification surface.

use thiserror::Error;

/// Error that can occur while talking to the Source or Target system.
#[derive(Debug, Error)]
pub enum ConnectorError {
    // Connection errors (usually transient)
    /// Failed to establish a connection to the remote system.
    #[error("connection failed: {message}")]
    ConnectionFailed {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Request timed out.
    #[error("request timed out after {timeout_secs} seconds")]
    Timeout { timeout_secs: u64 },

    // Authentication errors (permanent)
    /// Credentials were rejected by the remote system.
    #[error("authentication failed: invalid credentials")]
    AuthenticationFailed,

    /// The stored secret is not in the expected format.
    #[error("invalid credential format: {message}")]
    InvalidCredentialFormat { message: String },

    // API errors
    /// The remote API rejected a request.
    #[error("remote API returned HTTP {status}: {message}")]
    Api { status: u16, message: String },

    /// A record referenced by id does not exist in the remote system.
    #[error("record not found: {identifier}")]
    RecordNotFound { identifier: String },

    /// The remote system returned a body we could not interpret.
    #[error("invalid response: {message}")]
    InvalidResponse { message: String },

    /// Database error while resolving credentials.
    #[error("database error: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl ConnectorError {
    /// Check if this error is transient and a later run may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ConnectorError::ConnectionFailed { .. } | ConnectorError::Timeout { .. } => true,
            ConnectorError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Check if this error is permanent and retry won't help.
    pub fn is_permanent(&self) -> bool {
        !self.is_transient()
    }

    /// A coarse, user-safe description of this error.
    ///
    /// Returned to client-facing callers (e.g. the connection-test surface)
    /// instead of the raw error: upstream response bodies can contain
    /// secrets or internal topology and are never forwarded.
    pub fn user_message(&self) -> String {
        match self {
            ConnectorError::ConnectionFailed { .. } => {
                "could not connect to the remote system".to_string()
            }
            ConnectorError::Timeout { .. } => "the remote system did not respond".to_string(),
            ConnectorError::AuthenticationFailed => "authentication failed".to_string(),
            ConnectorError::InvalidCredentialFormat { .. } => {
                "invalid credential format".to_string()
            }
            ConnectorError::Api { status, .. } => {
                format!("the remote system returned HTTP {status}")
            }
            ConnectorError::RecordNotFound { .. } => {
                "a referenced record was not found".to_string()
            }
            ConnectorError::InvalidResponse { .. } => {
                "unexpected response from the remote system".to_string()
            }
            ConnectorError::Database { .. } => "internal error".to_string(),
        }
    }

    // Convenience constructors

    /// Create a connection failed error.
    pub fn connection_failed(message: impl Into<String>) -> Self {
        ConnectorError::ConnectionFailed {
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection failed error with source.
    pub fn connection_failed_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        ConnectorError::ConnectionFailed {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an invalid response error.
    pub fn invalid_response(message: impl Into<String>) -> Self {
        ConnectorError::InvalidResponse {
            message: message.into(),
        }
    }

    /// Create a database error with source.
    pub fn database_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        ConnectorError::Database {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Result type for connector operations.
pub type ConnectorResult<T> = Result<T, ConnectorError>;
