//! Error types for sandbox and workspace container operations.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("core error: {0}")]
    Core(#[from] platform_core::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("container runtime failure: {0}")]
    ContainerRuntime(String),

    #[error("no ports available in the configured workspace range")]
    NoPortsAvailable,

    #[error("action run {0} already has an in-flight sandbox")]
    AlreadyRunning(i64),

    #[error("sandbox exec timed out after {0:?}")]
    Timeout(std::time::Duration),
}

pub type Result<T> = std::result::Result<T, Error>;
