//! Единый тип ошибок публичного API.

use thiserror::Error;

/// Конфликты административного бэкенда, которые нельзя считать успехом.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AdminConflict {
    /// 403: лимит EBICS-пользователей исчерпан.
    #[error("EBICS user limit exceeded")]
    UserLimitExceeded,
    /// 409: User ID уже занят другим клиентом.
    #[error("User ID not available")]
    UserIdUnavailable,
}

#[derive(Debug, Error)]
pub enum EbicsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("HTTP status {status}")]
    Http { status: u16 },

    #[error("EBICS return code {code}: {text}")]
    Protocol { code: String, text: String },

    #[error("admin backend: {0}")]
    Admin(AdminConflict),

    #[error("failed to remove EBICS user registration (HTTP {status})")]
    DeregistrationFailed { status: u16 },

    #[error("validation error: {0}")]
    Validation(String),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("keyring error: {0}")]
    Keyring(String),

    #[error("XML error: {0}")]
    Xml(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("PDF error: {0}")]
    Pdf(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("document stream not drained, {remaining} document(s) left")]
    StreamNotDrained { remaining: usize },

    #[error("transaction sink: {0}")]
    Sink(String),

    #[error("keyring store: {0}")]
    Store(String),
}

impl EbicsError {
    /// Ошибки, которые планировщик хоста может повторить.
    pub fn is_retryable(&self) -> bool {
        match self {
            EbicsError::Transport(_) | EbicsError::Io(_) => true,
            EbicsError::Http { status } => *status >= 500,
            _ => false,
        }
    }

    pub(crate) fn xml<E: std::fmt::Display>(e: E) -> Self {
        EbicsError::Xml(e.to_string())
    }

    pub(crate) fn crypto<E: std::fmt::Display>(e: E) -> Self {
        EbicsError::Crypto(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EbicsError>;
