//! Error types for the task sync crate.

use thiserror::Error;

/// Result type alias for task sync operations.
pub type Result<T> = std::result::Result<T, TaskSyncError>;

/// PostgREST code for "JSON object requested, multiple (or no) rows returned".
const PGRST_SINGULAR_RESPONSE: &str = "PGRST116";

/// Retry policy class for remote failures. The client never retries on its
/// own; callers use this to decide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiRetryClass {
    Retryable,
    Permanent,
    ReauthRequired,
}

/// Errors that can occur during task sync operations.
#[derive(Debug, Error)]
pub enum TaskSyncError {
    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Error response from the remote store
    #[error("API error ({status}): {message}")]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
    },

    /// Invalid request (missing required data, etc.)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Authentication error (missing or malformed key/token)
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Missing or invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Realtime channel could not be joined or was closed during setup
    #[error("Channel error: {0}")]
    Channel(String),

    /// Websocket transport error
    #[error("WebSocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),

    /// The shared remote client was used before `init_shared`
    #[error("Remote client is not initialized")]
    NotInitialized,
}

impl From<tokio_tungstenite::tungstenite::Error> for TaskSyncError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(err))
    }
}

impl TaskSyncError {
    /// Create an API error from status and message
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            code: None,
            message: message.into(),
        }
    }

    /// Create an API error carrying the remote error code
    pub fn api_with_code(status: u16, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            code: Some(code.into()),
            message: message.into(),
        }
    }

    /// Create an invalid request error
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// Create an auth error
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth(message.into())
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a channel error
    pub fn channel(message: impl Into<String>) -> Self {
        Self::Channel(message.into())
    }

    /// HTTP status if this is an API error.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Remote error code if this is an API error that carried one.
    pub fn api_code(&self) -> Option<&str> {
        match self {
            Self::Api { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// True when a single-row write matched no row, i.e. the record does not exist.
    ///
    /// A 404 alone is not enough: PostgREST also uses it for unknown tables
    /// and routes.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::Api { code: Some(code), .. } if code == PGRST_SINGULAR_RESPONSE
        )
    }

    /// Classify error for retry policy.
    pub fn retry_class(&self) -> ApiRetryClass {
        match self {
            Self::Api { status, .. } => match *status {
                401 | 403 => ApiRetryClass::ReauthRequired,
                408 | 409 | 423 | 425 | 429 => ApiRetryClass::Retryable,
                500..=599 => ApiRetryClass::Retryable,
                _ => ApiRetryClass::Permanent,
            },
            Self::Http(_) | Self::WebSocket(_) | Self::Channel(_) => ApiRetryClass::Retryable,
            Self::Json(_) | Self::InvalidRequest(_) | Self::Config(_) | Self::NotInitialized => {
                ApiRetryClass::Permanent
            }
            Self::Auth(_) => ApiRetryClass::ReauthRequired,
        }
    }
}
