//! Centralised tracing initialisation for mergeward binaries.
//!
//! Call [`init_tracing`] once at program start. The console layer honours
//! `RUST_LOG` and can emit JSON; the optional file layer writes plain text to
//! a daily-rolling file whose lines keep the `run{category=.. run_id=..}`
//! span prefix the summary log scanner relies on.

use std::path::Path;

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::summary::LOG_FILE_PREFIX;

/// Initialise the global tracing subscriber.
///
/// * `json` - newline-delimited JSON on the console instead of text.
/// * `level` - default verbosity when `RUST_LOG` is not set.
/// * `log_dir` - when set, also write to `<log_dir>/mergeward.<date>`.
///
/// Returns the file writer's guard; keep it alive until exit so buffered
/// lines are flushed. Only the first call in a process takes effect.
pub fn init_tracing(json: bool, level: Level, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    let mut file_error = None;
    let (file_layer, guard) = match log_dir.map(file_appender) {
        Some(Ok(appender)) => {
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        Some(Err(err)) => {
            file_error = Some(err);
            (None, None)
        }
        None => (None, None),
    };

    let json_layer = json.then(|| fmt::layer().with_target(false).json());
    let text_layer = (!json).then(|| fmt::layer().with_target(false));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .with(file_layer)
        .try_init()
        .ok();

    if let Some(err) = file_error {
        tracing::warn!(error = %err, "file logging disabled");
    }
    guard
}

fn file_appender(dir: &Path) -> Result<RollingFileAppender, tracing_appender::rolling::InitError> {
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .build(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_init_is_harmless() {
        let dir = tempfile::tempdir().unwrap();
        let _first = init_tracing(false, Level::INFO, Some(dir.path()));
        let _second = init_tracing(true, Level::DEBUG, None);
    }
}
