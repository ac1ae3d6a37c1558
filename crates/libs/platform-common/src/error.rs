//! Error type for platform-common operations.
//!
//! Config loading and logging setup happen before a request context exists,
//! so they get their own small error type rather than reusing
//! `platform_core::Error`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("AUTH_SECRET is required but was not set")]
    MissingAuthSecret,

    #[error("logging already initialized")]
    TracingAlreadyInitialized,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = core::result::Result<T, Error>;
