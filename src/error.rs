//! Unified error type for all facade command handlers.
//!
//! `AppError` is the single error type returned by every facade operation.
//! It serializes as `{ "kind": "...", "message": "..." }` so the UI bridge can
//! programmatically distinguish error categories.

use serde::ser::SerializeStruct;

/// Application-level error returned by all facade commands.
///
/// Each variant maps to a distinct failure domain. The bridge receives a JSON
/// object with `kind` (variant name) and `message` (human-readable description).
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Errors originating from SQLite / database operations.
    #[error("{0}")]
    Database(String),

    /// I/O and OS-level errors (filesystem, process spawning, log reads).
    #[error("{0}")]
    Io(String),

    /// A rule, domain, or department that does not exist.
    #[error("{0}")]
    NotFound(String),

    /// An entity with the same unique key already exists.
    #[error("{0}")]
    DuplicateName(String),

    /// Malformed input (domain, subnet, port, settings value).
    #[error("{0}")]
    InvalidField(String),

    /// OS-level apply/retract of a policy effect failed; the store was left
    /// unchanged.
    #[error("{0}")]
    EnforcementFailed(String),

    /// IDS start requested while the process is not stopped.
    #[error("{0}")]
    AlreadyRunning(String),

    /// Operation requires a running IDS process.
    #[error("{0}")]
    NotRunning(String),
}

impl AppError {
    /// Returns the error kind as a string matching the variant name.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Database(_) => "Database",
            AppError::Io(_) => "Io",
            AppError::NotFound(_) => "NotFound",
            AppError::DuplicateName(_) => "DuplicateName",
            AppError::InvalidField(_) => "InvalidField",
            AppError::EnforcementFailed(_) => "EnforcementFailed",
            AppError::AlreadyRunning(_) => "AlreadyRunning",
            AppError::NotRunning(_) => "NotRunning",
        }
    }
}

/// Custom Serialize: produces `{ "kind": "Variant", "message": "..." }` for the bridge.
impl serde::Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut s = serializer.serialize_struct("AppError", 2)?;
        s.serialize_field("kind", self.kind())?;
        s.serialize_field("message", &self.to_string())?;
        s.end()
    }
}

// ---- From implementations for ergonomic error conversion ----

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Database(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Io(err.to_string())
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(err: rusqlite::Error) -> Self {
        AppError::Database(err.to_string())
    }
}
