use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Why a single capture attempt failed
///
/// Capture failures are data: they end up on the stored record instead of
/// failing the request that triggered them.
#[derive(Debug, Clone, Error)]
pub enum CaptureError {
    #[error("navigation did not finish within {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("no element matched selector '{0}'")]
    SelectorNotFound(String),

    #[error("browser unavailable: {0}")]
    BrowserUnavailable(String),

    #[error("capture failed: {0}")]
    Render(String),
}

impl CaptureError {
    pub fn kind(&self) -> FailureKind {
        match self {
            CaptureError::Timeout(_) => FailureKind::Timeout,
            CaptureError::SelectorNotFound(_) => FailureKind::SelectorNotFound,
            CaptureError::BrowserUnavailable(_) => FailureKind::BrowserUnavailable,
            CaptureError::Navigation(text) | CaptureError::Render(text) => {
                FailureKind::classify(text)
            }
        }
    }

    /// Message stored on the failed record: `<kind>: <detail>`
    pub fn record_message(&self) -> String {
        format!("{}: {}", self.kind(), self)
    }

    /// Map a CDP error raised while the given timeout was in force
    ///
    /// A dead connection to Chrome means the browser is gone, not that the page failed.
    pub fn from_cdp(err: chromiumoxide::error::CdpError, timeout: Duration) -> Self {
        use chromiumoxide::error::CdpError;

        match err {
            CdpError::Timeout => CaptureError::Timeout(timeout),
            err @ (CdpError::Ws(_) | CdpError::NoResponse) => {
                CaptureError::BrowserUnavailable(err.to_string())
            }
            other => CaptureError::Render(other.to_string()),
        }
    }
}

/// Failure taxonomy recorded with unsuccessful captures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    Timeout,
    NameResolution,
    ConnectionRefused,
    Certificate,
    SelectorNotFound,
    BrowserUnavailable,
    Unknown,
}

impl FailureKind {
    /// Classify a Chrome network error text such as `net::ERR_NAME_NOT_RESOLVED`
    pub fn classify(text: &str) -> Self {
        let upper = text.to_ascii_uppercase();
        if upper.contains("ERR_NAME_NOT_RESOLVED") || upper.contains("ERR_NAME_RESOLUTION_FAILED")
        {
            FailureKind::NameResolution
        } else if upper.contains("ERR_CONNECTION_REFUSED") {
            FailureKind::ConnectionRefused
        } else if upper.contains("ERR_CERT") || upper.contains("ERR_SSL") {
            FailureKind::Certificate
        } else if upper.contains("ERR_TIMED_OUT")
            || upper.contains("ERR_CONNECTION_TIMED_OUT")
            || upper.contains("TIMEOUT")
        {
            FailureKind::Timeout
        } else {
            FailureKind::Unknown
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Timeout => "timeout",
            FailureKind::NameResolution => "name-resolution",
            FailureKind::ConnectionRefused => "connection-refused",
            FailureKind::Certificate => "certificate",
            FailureKind::SelectorNotFound => "selector-not-found",
            FailureKind::BrowserUnavailable => "browser-unavailable",
            FailureKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced to API and CLI callers
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<tokio::task::JoinError> for AppError {
    fn from(err: tokio::task::JoinError) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<bcrypt::BcryptError> for AppError {
    fn from(err: bcrypt::BcryptError) -> Self {
        AppError::Internal(format!("bcrypt: {err}"))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::Validation(ref msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Auth(ref msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            AppError::NotFound(ref what) => (StatusCode::NOT_FOUND, format!("{what} not found")),
            AppError::Database(ref e) => {
                tracing::error!("Database error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Database error".to_string())
            }
            AppError::Migration(ref e) => {
                tracing::error!("Migration error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Database error".to_string())
            }
            AppError::Io(ref e) => {
                tracing::error!("Storage error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Storage error".to_string())
            }
            AppError::Browser(ref msg) => {
                tracing::error!("Browser error: {}", msg);
                (StatusCode::SERVICE_UNAVAILABLE, "Browser unavailable".to_string())
            }
            AppError::Internal(ref msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = Json(json!({
            "error": error_message,
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

pub type Result<T, E = AppError> = std::result::Result<T, E>;
