//! Logging setup shared by the GaleFling binaries
//!
//! All output goes to stderr so stdout stays free for post reports.
//!
//! ```no_run
//! use libgalefling::logging::{LogFormat, LoggingConfig};
//!
//! LoggingConfig::new(LogFormat::Json, "debug").init();
//!
//! // or honour GALEFLING_LOG_FORMAT / GALEFLING_LOG_LEVEL
//! libgalefling::logging::init_default();
//! ```

use std::str::FromStr;
use tracing_subscriber::EnvFilter;

pub const LOG_FORMAT_ENV: &str = "GALEFLING_LOG_FORMAT";
pub const LOG_LEVEL_ENV: &str = "GALEFLING_LOG_LEVEL";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Plain lines without colour, suitable for piping
    #[default]
    Text,
    /// One JSON object per line
    Json,
    /// Multi-line coloured output for development
    Pretty,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            other => Err(format!(
                "Invalid log format: '{}'. Valid options: text, json, pretty",
                other
            )),
        }
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LogFormat::Text => "text",
            LogFormat::Json => "json",
            LogFormat::Pretty => "pretty",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub format: LogFormat,
    pub level: String,
}

impl LoggingConfig {
    pub fn new(format: LogFormat, level: impl Into<String>) -> Self {
        Self {
            format,
            level: level.into(),
        }
    }

    /// Reads format and level from the environment
    ///
    /// `verbose` forces `debug` regardless of `GALEFLING_LOG_LEVEL`. Unknown
    /// format strings fall back to text.
    pub fn from_env(verbose: bool) -> Self {
        let format = std::env::var(LOG_FORMAT_ENV)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or_default();

        let level = if verbose {
            "debug".to_string()
        } else {
            std::env::var(LOG_LEVEL_ENV).unwrap_or_else(|_| "info".to_string())
        };

        Self { format, level }
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level))
    }

    /// Installs the global subscriber
    ///
    /// A second call is a no-op; the first subscriber stays installed.
    pub fn init(&self) {
        let filter = self.filter();
        let installed = match self.format {
            LogFormat::Json => tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_current_span(true)
                .flatten_event(true)
                .with_target(true)
                .try_init(),
            LogFormat::Pretty => tracing_subscriber::fmt()
                .pretty()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_line_number(true)
                .with_file(true)
                .try_init(),
            LogFormat::Text => tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_ansi(false)
                .try_init(),
        };

        if installed.is_err() {
            tracing::debug!("Logging subscriber already installed");
        }
    }
}

/// Initializes logging from `GALEFLING_LOG_FORMAT` and `GALEFLING_LOG_LEVEL`
pub fn init_default() {
    LoggingConfig::from_env(false).init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_log_format_from_str() {
        assert_eq!("text".parse::<LogFormat>().unwrap(), LogFormat::Text);
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!(" Pretty ".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
    }

    #[test]
    fn test_log_format_from_str_invalid() {
        let err = "yaml".parse::<LogFormat>().unwrap_err();
        assert!(err.contains("Invalid log format: 'yaml'"));
    }

    #[test]
    fn test_log_format_display_round_trip() {
        for format in [LogFormat::Text, LogFormat::Json, LogFormat::Pretty] {
            assert_eq!(format.to_string().parse::<LogFormat>().unwrap(), format);
        }
    }

    #[test]
    #[serial]
    fn test_from_env_reads_variables() {
        std::env::set_var(LOG_FORMAT_ENV, "json");
        std::env::set_var(LOG_LEVEL_ENV, "warn");

        let config = LoggingConfig::from_env(false);
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.level, "warn");

        std::env::remove_var(LOG_FORMAT_ENV);
        std::env::remove_var(LOG_LEVEL_ENV);
    }

    #[test]
    #[serial]
    fn test_from_env_verbose_overrides_level() {
        std::env::set_var(LOG_LEVEL_ENV, "error");

        let config = LoggingConfig::from_env(true);
        assert_eq!(config.level, "debug");

        std::env::remove_var(LOG_LEVEL_ENV);
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        std::env::remove_var(LOG_FORMAT_ENV);
        std::env::remove_var(LOG_LEVEL_ENV);

        let config = LoggingConfig::from_env(false);
        assert_eq!(config.format, LogFormat::Text);
        assert_eq!(config.level, "info");
    }

    #[test]
    fn test_init_twice_does_not_panic() {
        LoggingConfig::new(LogFormat::Text, "info").init();
        LoggingConfig::new(LogFormat::Json, "debug").init();
    }
}
