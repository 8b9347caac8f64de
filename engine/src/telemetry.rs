//! Telemetry
//!
//! Sets up `tracing-subscriber` for the binary. Logs are written to stderr so
//! that command output on stdout (including `--json` output) stays parseable.
//!
//! Filter priority: `RUST_LOG` > `--log` > config `core.log_level` > "info".

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// How log lines are rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable multi-line output
    Pretty,
    /// One JSON object per line, including the current span (the run id)
    Json,
}

impl LogFormat {
    /// Pretty in debug builds, JSON in release builds
    pub fn for_build() -> Self {
        if cfg!(debug_assertions) {
            LogFormat::Pretty
        } else {
            LogFormat::Json
        }
    }
}

/// Default filter for a level; sqlx statement chatter stays at warn
pub fn filter_directive(log_level: &str) -> String {
    format!("{0},cadence_engine={0},sqlx=warn", log_level)
}

/// Install the global subscriber
///
/// Returns false if a subscriber was already installed.
pub fn init_telemetry(log_level: &str, format: LogFormat) -> bool {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(log_level)));

    let registry = tracing_subscriber::registry().with(env_filter);
    let installed = match format {
        LogFormat::Pretty => registry
            .with(fmt::layer().pretty().with_target(false).with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
    };
    installed.is_ok()
}

/// Install the subscriber with the format for this build
pub fn init_telemetry_with_level(log_level: &str) -> bool {
    init_telemetry(log_level, LogFormat::for_build())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_directive_is_valid() {
        for level in ["error", "warn", "info", "debug", "trace"] {
            assert!(EnvFilter::try_new(filter_directive(level)).is_ok());
        }
    }

    #[test]
    fn test_format_follows_build_profile() {
        let expected = if cfg!(debug_assertions) {
            LogFormat::Pretty
        } else {
            LogFormat::Json
        };
        assert_eq!(LogFormat::for_build(), expected);
    }
}
