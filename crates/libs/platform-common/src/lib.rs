//! # platform-common: configuration, logging, and shared primitives
//!
//! Ambient infrastructure shared by every other crate in the platform:
//! layered configuration loading (§6.4), `tracing` subscriber setup, and
//! a small error type for failures that occur before a `Ctx` even exists
//! (e.g. config loading, log init).

pub mod config;
pub mod error;
pub mod tracing_init;

pub use config::AppConfig;
pub use error::{Error, Result};
