//! Shared building blocks for the rxfer tools
//!
//! - [`error`]: the [`Error`] type with its [`ErrorKind`] and retryable flag
//! - [`retry`]: bounded retries with backoff
//! - [`progress`]: transfer progress, countdowns and counters
//! - [`patterns`]: wildcard matching for URLs, group names and files
//! - [`url`]: splitting URLs into directory URL and file name
//! - [`notation`]: dependency notation parsing
//! - [`context`]: the per-run [`Context`] owning the worker pool
//!
//! Binaries call [`run`] which sets up logging and the tokio runtime around their async main.

use std::fmt::Display;
use std::future::Future;

pub mod config;
pub mod context;
pub mod error;
pub mod notation;
pub mod patterns;
pub mod progress;
pub mod retry;
pub mod testutils;
pub mod url;

pub use config::{OutputConfig, RuntimeConfig};
pub use context::Context;
pub use error::{Error, ErrorKind, Result, Retryable, TransferContext};
pub use progress::{ProgressSettings, ProgressType};
pub use retry::{Backoff, Retry};

fn init_tracing(output: &OutputConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(output.filter_directive()));
    // a subscriber may already be installed, e.g. by a test harness
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Runs `func` on a freshly built tokio runtime
///
/// Returns `None` when the runtime could not be created or `func` failed; the error is logged
/// unless `output.quiet` is set.
pub fn run<Fut, Summary, Error>(
    output: OutputConfig,
    runtime: RuntimeConfig,
    func: impl FnOnce() -> Fut,
) -> Option<Summary>
where
    Fut: Future<Output = std::result::Result<Summary, Error>>,
    Summary: Display,
    Error: Display,
{
    init_tracing(&output);
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if runtime.max_workers > 0 {
        builder.worker_threads(runtime.max_workers);
    }
    if runtime.max_blocking_threads > 0 {
        builder.max_blocking_threads(runtime.max_blocking_threads);
    }
    let tokio_runtime = match builder.build() {
        Ok(tokio_runtime) => tokio_runtime,
        Err(error) => {
            if !output.quiet {
                tracing::error!("failed to start tokio runtime: {:#}", error);
            }
            return None;
        }
    };
    let result = tokio_runtime.block_on(func());
    match result {
        Ok(summary) => {
            if output.print_summary || output.verbose > 0 {
                println!("{summary}");
            }
            Some(summary)
        }
        Err(error) => {
            if !output.quiet {
                tracing::error!("{:#}", error);
            }
            None
        }
    }
}
