//! Error types for Access Grant operations

use crate::auth::Challenge;
use crate::credentials::CredentialKind;

/// Result type for Access Grant operations
pub type Result<T> = std::result::Result<T, AccessGrantError>;

/// Access Grant errors
#[derive(Debug, thiserror::Error)]
pub enum AccessGrantError {
    /// The credential document is malformed or incomplete
    #[error("Invalid access credential: {message}")]
    InvalidCredential {
        /// Summary of the failure
        message: String,
        /// Individual invariants the document violated
        violations: Vec<String>,
    },

    /// The credential is well formed but of a different variant than requested
    #[error("Credential type mismatch: expected {expected}, found {actual}")]
    TypeMismatch {
        /// Variant the caller asked for
        expected: CredentialKind,
        /// Variant the document declared
        actual: CredentialKind,
    },

    /// The server answered a well-formed request with a non-2xx status
    #[error("{message}: HTTP error {status}")]
    Status {
        /// What the client was trying to do
        message: String,
        /// HTTP status code
        status: u16,
    },

    /// The server requires (different) authentication
    #[error("{message}: HTTP error 401")]
    Unauthorized {
        /// What the client was trying to do
        message: String,
        /// Challenges advertised in `WWW-Authenticate`
        challenges: Vec<Challenge>,
    },

    /// The issuer's service metadata is missing or unusable
    #[error("Invalid service metadata: {0}")]
    Discovery(String),

    /// The operation is not defined for the given credential or type
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Transport failure reaching an endpoint
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Local I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failure serializing an outgoing body
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl AccessGrantError {
    /// Build a validation error with no itemized violations
    pub fn invalid(message: impl Into<String>) -> Self {
        AccessGrantError::InvalidCredential {
            message: message.into(),
            violations: Vec::new(),
        }
    }

    /// Get the HTTP status code associated with this error, if any
    pub fn status_code(&self) -> Option<u16> {
        match self {
            AccessGrantError::Status { status, .. } => Some(*status),
            AccessGrantError::Unauthorized { .. } => Some(401),
            AccessGrantError::Http(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Check if a caller could reasonably retry the operation.
    ///
    /// The client itself never retries.
    pub fn is_retryable(&self) -> bool {
        match self {
            AccessGrantError::Http(_) | AccessGrantError::Io(_) => true,
            AccessGrantError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Check if this error carries an authentication challenge
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, AccessGrantError::Unauthorized { .. })
    }
}

impl From<toml::de::Error> for AccessGrantError {
    fn from(err: toml::de::Error) -> Self {
        AccessGrantError::Config(format!("Failed to parse config: {}", err))
    }
}
