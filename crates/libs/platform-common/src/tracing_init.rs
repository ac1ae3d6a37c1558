//! `tracing` subscriber setup.
//!
//! Grounded on the teacher's `setup_tracing` helper: an `EnvFilter` built
//! from `RUST_LOG` (falling back to a sane per-crate default) feeding a
//! `fmt` layer that is either pretty (local dev) or JSON (anything that
//! ships logs to a collector). Adds a rolling file appender, since the
//! platform runs as a long-lived daemon rather than a one-shot CLI.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{Error, Result};

/// Holds the non-blocking writer guard for a file appender. Drop it only on
/// process shutdown or buffered log lines are lost.
pub struct TracingGuard(#[allow(dead_code)] Option<WorkerGuard>);

/// Initialize the global `tracing` subscriber.
///
/// `json_format` selects structured JSON output (production) over pretty
/// terminal output (local dev). `log_dir` additionally mirrors output to a
/// daily-rotated file under that directory.
pub fn setup_tracing(json_format: bool, log_dir: Option<&Path>) -> Result<TracingGuard> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,tower_http=debug,axum=debug,platform=debug")
    });

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "platform.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .json();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let registry = tracing_subscriber::registry().with(env_filter).with(file_layer);

    let result = if json_format {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init()
    };

    result.map_err(|_| Error::TracingAlreadyInitialized)?;
    Ok(TracingGuard(guard))
}
