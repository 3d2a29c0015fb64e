//! Client error types
//!
//! Error definitions with transient/permanent classification so callers can
//! decide whether a retry is worthwhile.

use thiserror::Error;

/// Error that can occur while talking to a directory server.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Failed to establish a connection to the directory.
    #[error("connection failed: {message}")]
    ConnectionFailed {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The bind identity or credential was rejected.
    #[error("bind failed: invalid credentials")]
    InvalidCredentials,

    /// A remote operation completed with a non-zero result code.
    #[error("directory operation failed with code {code}: {message}")]
    Operation { code: u32, message: String },

    /// The target entry does not exist (result code 32).
    #[error("no such object: {dn}")]
    NoSuchObject { dn: String },

    /// The entry already exists (result code 68).
    #[error("entry already exists: {dn}")]
    AlreadyExists { dn: String },

    /// The client configuration is invalid.
    #[error("invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    /// Protocol-level failure below the operation layer.
    #[error("protocol error: {message}")]
    Protocol {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl ClientError {
    /// Check if this error is transient and the operation may be retried.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ClientError::ConnectionFailed { .. } | ClientError::Protocol { .. }
        )
    }

    /// Check if this error is permanent and retry won't help.
    pub fn is_permanent(&self) -> bool {
        !self.is_transient()
    }

    /// The remote result code carried by this error, if any.
    ///
    /// Operation-level failures map onto LDAP result codes; connection and
    /// configuration problems have none.
    pub fn result_code(&self) -> Option<u32> {
        match self {
            ClientError::Operation { code, .. } => Some(*code),
            ClientError::NoSuchObject { .. } => Some(crate::RC_NO_SUCH_OBJECT),
            ClientError::AlreadyExists { .. } => Some(crate::RC_ALREADY_EXISTS),
            ClientError::InvalidCredentials => Some(crate::RC_INVALID_CREDENTIALS),
            _ => None,
        }
    }

    // Convenience constructors

    /// Create a connection failed error.
    pub fn connection_failed(message: impl Into<String>) -> Self {
        ClientError::ConnectionFailed {
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection failed error with source.
    pub fn connection_failed_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        ClientError::ConnectionFailed {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an operation error from a remote result code, mapping the
    /// well-known codes onto their dedicated variants.
    pub fn operation(code: u32, dn: impl Into<String>, message: impl Into<String>) -> Self {
        match code {
            crate::RC_NO_SUCH_OBJECT => ClientError::NoSuchObject { dn: dn.into() },
            crate::RC_ALREADY_EXISTS => ClientError::AlreadyExists { dn: dn.into() },
            crate::RC_INVALID_CREDENTIALS => ClientError::InvalidCredentials,
            _ => ClientError::Operation {
                code,
                message: message.into(),
            },
        }
    }

    /// Create a protocol error with source.
    pub fn protocol_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        ClientError::Protocol {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Result type for directory client operations.
pub type ClientResult<T> = Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ClientError::connection_failed("down").is_transient());
        assert!(!ClientError::connection_failed("down").is_permanent());
        assert!(ClientError::InvalidCredentials.is_permanent());
        assert!(ClientError::operation(50, "", "insufficient access").is_permanent());
    }

    #[test]
    fn test_operation_code_mapping() {
        let err = ClientError::operation(32, "cn=x,dc=example,dc=com", "no such object");
        assert!(matches!(err, ClientError::NoSuchObject { .. }));
        assert_eq!(err.result_code(), Some(32));

        let err = ClientError::operation(68, "cn=x,dc=example,dc=com", "exists");
        assert!(matches!(err, ClientError::AlreadyExists { .. }));
        assert_eq!(err.result_code(), Some(68));

        let err = ClientError::operation(49, "", "bad creds");
        assert!(matches!(err, ClientError::InvalidCredentials));

        let err = ClientError::operation(19, "", "constraint violation");
        assert_eq!(err.result_code(), Some(19));
    }

    #[test]
    fn test_result_code_absent_for_connection_errors() {
        assert_eq!(ClientError::connection_failed("down").result_code(), None);
    }
}
