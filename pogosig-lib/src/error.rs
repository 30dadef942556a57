use thiserror::Error;

/// The primary error type for the `pogosig-lib` library.
#[derive(Error, Debug)]
pub enum SigError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Protocol error: {message}")]
    Protocol { message: String, body: String },

    /// A failed exchange with the hash service. `status` is 0 when no HTTP
    /// response was received at all.
    #[error("{message} (status {status})")]
    Service {
        message: String,
        status: u16,
        body: String,
        retry: bool,
    },

    #[error("Missing hashing parameter: {0}")]
    MissingParameter(&'static str),

    #[error("Encryption failed: {0}")]
    Encryption(String),

    /// The completion future was dropped before it finished
    #[error("Operation cancelled before completion")]
    Cancelled,

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SigError {
    pub(crate) fn service(message: impl Into<String>, status: u16, body: impl Into<String>, retry: bool) -> Self {
        SigError::Service {
            message: message.into(),
            status,
            body: body.into(),
            retry,
        }
    }

    pub(crate) fn protocol(message: impl Into<String>, body: impl Into<String>) -> Self {
        SigError::Protocol {
            message: message.into(),
            body: body.into(),
        }
    }

    /// Whether the caller may back off and try the same call again
    pub fn is_retryable(&self) -> bool {
        matches!(self, SigError::Service { retry: true, .. })
    }

    /// HTTP status attached to a service failure, 0 for anything else
    pub fn status(&self) -> u16 {
        match self {
            SigError::Service { status, .. } => *status,
            _ => 0,
        }
    }
}
