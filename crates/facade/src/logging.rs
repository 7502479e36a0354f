//! Subscriber setup for binaries and tests that want to see the
//! `tracing` events emitted by the workspace crates.
//!
//! Library code only emits events; installing a subscriber is left to the
//! caller through [`init_logging`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_subscriber::EnvFilter;

use dpfl_core::{FedError, Result};

/// Crates whose events the default filter enables.
const WORKSPACE_TARGETS: [&str; 4] = ["dpfl", "dpfl_core", "dpfl_data", "dpfl_optim"];

/// Verbosity of the installed subscriber.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Everything, including per-evaluation losses.
    Trace,
    /// Loss evaluations and solver convergence.
    Debug,
    /// Trial and algorithm progress.
    #[default]
    Info,
    /// Divergence and solver non-convergence only.
    Warn,
    /// Errors only.
    Error,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        };
        f.write_str(name)
    }
}

impl FromStr for LogLevel {
    type Err = FedError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(FedError::config(format!("unknown log level: {other}"))),
        }
    }
}

/// Filter directive enabling `level` for the workspace crates.
pub fn default_directive(level: LogLevel) -> String {
    WORKSPACE_TARGETS
        .iter()
        .map(|target| format!("{target}={level}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Install a formatting subscriber at `level`.
///
/// `RUST_LOG`, when set, replaces the default directive. Fails with
/// [`FedError::ConfigError`] if a global subscriber is already installed.
pub fn init_logging(level: LogLevel) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(level)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| FedError::config(format!("installing log subscriber: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_level_names() {
        assert_eq!("DEBUG".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert_eq!(" warning ".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!("trace".parse::<LogLevel>().unwrap(), LogLevel::Trace);
        assert!(matches!(
            "verbose".parse::<LogLevel>(),
            Err(FedError::ConfigError { .. })
        ));
    }

    #[test]
    fn display_round_trips_through_from_str() {
        for level in [
            LogLevel::Trace,
            LogLevel::Debug,
            LogLevel::Info,
            LogLevel::Warn,
            LogLevel::Error,
        ] {
            assert_eq!(level.to_string().parse::<LogLevel>().unwrap(), level);
        }
    }

    #[test]
    fn directive_covers_every_workspace_crate() {
        let d = default_directive(LogLevel::Debug);
        assert_eq!(d, "dpfl=debug,dpfl_core=debug,dpfl_data=debug,dpfl_optim=debug");
    }

    #[test]
    fn second_install_is_an_error() {
        // Another test in this binary may have installed one already.
        let _ = init_logging(LogLevel::Warn);
        assert!(init_logging(LogLevel::Warn).is_err());
    }
}
