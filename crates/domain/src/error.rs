//! Shared error type for the listkeeper workspace.

use std::io;

/// Workspace-wide error type. Each variant names a distinct failure
/// family from the error handling design (auth, transient remote,
/// terminal account, data integrity, ...).
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] io::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("http: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("dns: {0}")]
    Dns(String),

    #[error("auth: {0}")]
    Auth(String),

    #[error("api client error (status {status}, code {code:?}): {message}")]
    ApiClient {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("terminal account {did}: {reason}")]
    TerminalAccount { did: String, reason: String },

    #[error("data integrity: {0}")]
    DataIntegrity(String),

    #[error("config: {0}")]
    Config(String),

    #[error("cache: {0}")]
    Cache(String),

    #[error("shutdown")]
    Shutdown,

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this error represents a transient condition worth retrying
    /// (transient remote failure, DNS/socket failure, timeout).
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Timeout(_) | Error::Dns(_) => true,
            Error::ApiClient { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Whether this error represents an expired/invalid auth token that
    /// warrants a single re-auth-and-retry.
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, Error::Auth(_))
            || matches!(self, Error::ApiClient { status, .. } if *status == 401)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
