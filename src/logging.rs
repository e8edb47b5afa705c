//! Tracing subscriber setup for hosts and demos.
//!
//! The library itself only emits `tracing` events; installing a subscriber
//! is the host's call. `init` is a convenience for hosts that have none.

use std::env;
use std::str::FromStr;

use tracing_subscriber::EnvFilter;

/// Environment variable selecting the output format (`json` or `pretty`).
pub const LOG_FORMAT_ENV: &str = "SEALGATE_LOG_FORMAT";

const DEFAULT_FILTER: &str = "sealgate=info";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

impl LogFormat {
    /// Read `SEALGATE_LOG_FORMAT`, falling back to `Pretty`.
    pub fn from_env() -> Self {
        env::var(LOG_FORMAT_ENV)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or_default()
    }
}

/// Install a global fmt subscriber. `RUST_LOG` overrides the default filter.
///
/// Returns `false` if a global subscriber was already installed.
pub fn init(format: LogFormat) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match format {
        LogFormat::Pretty => builder.try_init().is_ok(),
        LogFormat::Json => builder.json().try_init().is_ok(),
    }
}
