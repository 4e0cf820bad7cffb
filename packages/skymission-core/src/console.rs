use serde::Deserialize;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::error::{MissionError, Result};

/// Output style for console logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Pretty,
}

/// Builds the filter used by the console subscriber.
/// `RUST_LOG` wins over the configured level when it is set.
pub fn console_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Install the global tracing subscriber that writes to stderr.
///
/// Fails if a subscriber was already installed in this process.
pub fn init_console_logging(level: &str, format: LogFormat) -> Result<()> {
    let filter = console_filter(level);
    let registry = tracing_subscriber::registry().with(filter);

    let outcome = match format {
        LogFormat::Compact => registry
            .with(fmt::layer().compact().with_target(false).with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Pretty => registry
            .with(fmt::layer().pretty().with_writer(std::io::stderr))
            .try_init(),
    };

    outcome.map_err(|e| MissionError::Logging { message: e.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_install_is_rejected() {
        let _ = init_console_logging("debug", LogFormat::Compact);
        let err = init_console_logging("info", LogFormat::Pretty).unwrap_err();
        assert!(matches!(err, MissionError::Logging { .. }));
    }

    #[test]
    fn log_format_reads_lowercase_names() {
        let format: LogFormat = serde_json::from_str("\"pretty\"").unwrap();
        assert_eq!(format, LogFormat::Pretty);
    }
}
