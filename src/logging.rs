//! Tracing setup for the server process.
//!
//! - **stderr**: compact human format, or JSON lines with `--log-json`
//! - **file** (optional): daily rolling log under `<data_dir>/logs`
//!
//! Filtering follows `RUST_LOG` and defaults to `info`. Progress events for
//! observers go through the broadcaster, not through tracing.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const LOG_FILE_PREFIX: &str = "gap-foundry.log";

/// Install the global subscriber.
///
/// The returned guard flushes the file writer on drop, so keep it alive for
/// the life of the process. A second call is a no-op.
///
/// # Example
/// ```bash
/// RUST_LOG=gap_foundry=debug gap-foundry serve --dry-run
/// ```
pub fn init(json: bool, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (json_layer, compact_layer) = if json {
        (Some(fmt::layer().json().with_writer(std::io::stderr)), None)
    } else {
        (None, Some(fmt::layer().with_writer(std::io::stderr).compact()))
    };

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(compact_layer)
        .with(file_layer)
        .try_init();

    guard
}
