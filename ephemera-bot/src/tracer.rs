//! Log sink setup.

use shared::config::{LogFormat, LoggingConfig};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, fmt};

/// Installs the global subscriber. `RUST_LOG` wins over the configured level.
///
/// Returns the configured default level.
pub fn initialize_tracing(logging: &LoggingConfig) -> String {
    let fmt_builder = fmt::fmt()
        .with_env_filter(build_env_filter(logging))
        .with_target(false)
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false);

    // A second init (tests, embedding) keeps the first subscriber.
    let installed = if matches!(logging.format, LogFormat::Json) {
        fmt_builder.json().with_ansi(false).try_init()
    } else {
        fmt_builder.with_ansi(true).try_init()
    };
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }

    logging.level.clone()
}

fn build_env_filter(logging: &LoggingConfig) -> EnvFilter {
    let default_level = logging
        .level
        .parse::<LevelFilter>()
        .unwrap_or(LevelFilter::INFO);

    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::builder()
            .with_default_directive(default_level.into())
            .from_env_lossy()
    })
}
