use std::time::Duration;

use thiserror::Error;

/// Process-level failures: startup, configuration and store bootstrap.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failure to retrieve a source page.
///
/// Timeouts, transient network errors and pages that are not ready yet are
/// retried within the same pass; everything else skips the source until the
/// next pass.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("transient network error: {0}")]
    Transient(String),

    #[error("page not ready: {0}")]
    NotReady(String),

    #[error("unreachable: {0}")]
    Unreachable(String),

    #[error("browser error: {0}")]
    Browser(String),

    #[error("unexpected response: {0}")]
    InvalidResponse(String),
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchError::Timeout(_) | FetchError::Transient(_) | FetchError::NotReady(_)
        )
    }

    /// Classify a browser-automation error by its message.
    ///
    /// headless_chrome surfaces Chrome's `net::ERR_*` codes and its own
    /// timeout errors as plain `anyhow` chains.
    pub fn from_browser(context: &str, err: &anyhow::Error) -> Self {
        let message = format!("{}: {:#}", context, err);
        let lowered = message.to_lowercase();

        if lowered.contains("err_name_not_resolved")
            || lowered.contains("err_address_unreachable")
            || lowered.contains("err_invalid_url")
            || lowered.contains("err_cert")
        {
            FetchError::Unreachable(message)
        } else if lowered.contains("timeout") || lowered.contains("timed out") {
            FetchError::Transient(message)
        } else if lowered.contains("err_connection")
            || lowered.contains("err_network")
            || lowered.contains("err_internet_disconnected")
            || lowered.contains("err_empty_response")
        {
            FetchError::Transient(message)
        } else if lowered.contains("no element found") || lowered.contains("element not found") {
            FetchError::NotReady(message)
        } else {
            FetchError::Browser(message)
        }
    }
}

/// A single listing entry (or a whole page) that could not be turned into a record.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractError {
    #[error("row {row}: missing {field}")]
    MissingField { row: usize, field: &'static str },

    #[error("row {row}: invalid url '{url}'")]
    InvalidUrl { row: usize, url: String },

    #[error("invalid selector '{selector}': {message}")]
    InvalidSelector { selector: String, message: String },

    #[error("malformed content: {0}")]
    MalformedContent(String),
}

impl ExtractError {
    /// Page-level errors make the whole source fail for the pass; row-level
    /// errors only skip the row.
    pub fn is_row_level(&self) -> bool {
        matches!(
            self,
            ExtractError::MissingField { .. } | ExtractError::InvalidUrl { .. }
        )
    }
}

/// Failure to write or read persisted tenders.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PersistError {
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    #[error("insert failed for {source_name}/{external_id}: {message}")]
    Insert {
        source_name: String,
        external_id: String,
        message: String,
    },

    #[error("query failed: {0}")]
    Query(String),
}

impl PersistError {
    pub fn from_sqlx(err: &sqlx::Error) -> Self {
        if is_connection_error(err) {
            PersistError::ConnectionLost(err.to_string())
        } else {
            PersistError::Query(err.to_string())
        }
    }

    pub fn is_connection_lost(&self) -> bool {
        matches!(self, PersistError::ConnectionLost(_))
    }
}

/// Errors that mean the backend itself is gone rather than one statement failing.
pub fn is_connection_error(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Io(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
            | sqlx::Error::Tls(_)
    )
}

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("webhook request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("webhook rejected message with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("invalid e-mail address '{address}': {message}")]
    Address { address: String, message: String },

    #[error("could not build e-mail: {0}")]
    Message(#[from] lettre::error::Error),

    #[error("SMTP delivery failed: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;
