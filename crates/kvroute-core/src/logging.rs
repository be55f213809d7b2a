//! Log subscriber setup for the `kvroute` binary.
//!
//! - `RUST_LOG` controls log levels (default: info).
//! - `KVROUTE_LOG_FORMAT=json` switches from pretty output to JSON lines.
//!
//! Logs go to stderr so reports printed on stdout stay machine-readable.

use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
    EnvFilter,
};

pub const LOG_FORMAT_ENV: &str = "KVROUTE_LOG_FORMAT";

/// Log format mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Pretty-printed human-readable logs (default).
    Pretty,
    /// JSON-formatted logs for log aggregation.
    Json,
}

impl LogFormat {
    /// `"json"` in any case selects JSON; anything else is pretty.
    pub fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Pretty
        }
    }

    /// Detect log format from `KVROUTE_LOG_FORMAT`.
    pub fn from_env() -> Self {
        Self::parse(&std::env::var(LOG_FORMAT_ENV).unwrap_or_default())
    }
}

/// Install the global subscriber.
///
/// `level` is used when `RUST_LOG` is unset; `None` means `info`. Fails if a
/// subscriber is already installed.
pub fn init(level: Option<&str>, format: LogFormat) -> Result<(), TryInitError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.unwrap_or("info")));

    match format {
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .try_init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_span_events(FmtSpan::CLOSE)
                    .with_current_span(true)
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .try_init(),
    }
}
