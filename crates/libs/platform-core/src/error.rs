//! Error types for platform-core operations.
//!
//! Errors fall into the taxonomy laid out by the platform's error handling
//! design: a small set of domain-shaped variants that the server layer maps
//! onto HTTP status codes, plus `#[from]` conversions for the external
//! errors that occur at the storage boundary (libsql, subprocess I/O,
//! JSON).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // -- External errors from dependencies
    #[error("database error: {0}")]
    Libsql(#[from] libsql::Error),

    #[error("serde json error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    // -- Authn/authz
    #[error("authentication required")]
    AuthRequired,

    #[error("forbidden: {0}")]
    Forbidden(String),

    // -- Generic domain errors
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    Invalid(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("already running: {0}")]
    AlreadyRunning(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("upstream failure: {0}")]
    Upstream(String),

    #[error("internal error: {0}")]
    Internal(String),

    // -- Entity-specific not-found errors, used where the caller needs to
    //    distinguish "which kind of thing" programmatically rather than by
    //    parsing the message.
    #[error("user not found: {0}")]
    UserNotFound(String),

    #[error("repository not found: {0}")]
    RepositoryNotFound(String),

    #[error("access token not found or revoked: {0}")]
    AccessTokenNotFound(String),

    #[error("workspace not found: {0}")]
    WorkspaceNotFound(String),

    #[error("action not found: {0}")]
    ActionNotFound(i64),

    #[error("action run not found: {0}")]
    ActionRunNotFound(i64),

    #[error("lock timeout on {resource}, held since {held_since_secs}s ago")]
    LockTimeout {
        resource: String,
        held_since_secs: u64,
    },

    #[error("validation error: {0}")]
    Validation(#[from] crate::utils::validation::ValidationError),
}

impl Error {
    /// True for errors that represent a resource that simply doesn't
    /// exist, used by handlers that want to map 404s distinctly from
    /// other 4xx/5xx responses.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::NotFound(_)
                | Error::UserNotFound(_)
                | Error::RepositoryNotFound(_)
                | Error::AccessTokenNotFound(_)
                | Error::WorkspaceNotFound(_)
                | Error::ActionNotFound(_)
                | Error::ActionRunNotFound(_)
        )
    }
}

pub type Result<T> = core::result::Result<T, Error>;
