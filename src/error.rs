use thiserror::Error;

pub type Result<T> = std::result::Result<T, QuarryError>;

/// Coarse classification of errors.
///
/// The retry helper matches on kinds rather than full error values, so
/// callers can declare e.g. "retry timeouts and transport errors" without
/// caring how those errors were produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidUrl,
    Http,
    Timeout,
    Io,
    Parse,
    Storage,
    Other,
}

#[derive(Debug, Error)]
pub enum QuarryError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("http error: {0}")]
    Http(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("storage error during {operation}: {message}")]
    Storage { operation: String, message: String },

    #[error("{0}")]
    Other(String),
}

impl QuarryError {
    pub fn storage_error(operation: &str, message: impl Into<String>) -> Self {
        QuarryError::Storage {
            operation: operation.to_string(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            QuarryError::InvalidUrl(_) => ErrorKind::InvalidUrl,
            QuarryError::Http(_) => ErrorKind::Http,
            QuarryError::Timeout(_) => ErrorKind::Timeout,
            QuarryError::Io(_) => ErrorKind::Io,
            QuarryError::Json(_) => ErrorKind::Parse,
            QuarryError::Storage { .. } => ErrorKind::Storage,
            QuarryError::Other(_) => ErrorKind::Other,
        }
    }
}

/* Conversions so `?` works smoothly */
impl From<reqwest::Error> for QuarryError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            QuarryError::Timeout(e.to_string())
        } else {
            QuarryError::Http(e.to_string())
        }
    }
}
