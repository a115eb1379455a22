//! Logging setup for the ioc-bridge command line.
//!
//! Events go to stderr so pulled records and push results on stdout stay
//! parseable. Plugin crates log at the configured level; everything else,
//! such as the HTTP and TLS stacks, only surfaces warnings.

use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
    EnvFilter, Layer,
};

/// Crates that log at the configured level when `RUST_LOG` is not set.
pub const PLUGIN_TARGETS: [&str; 3] = ["ib_plugins", "ib_observability", "ib_cli"];

/// Level applied to every other crate when `RUST_LOG` is not set.
pub const DEPENDENCY_LEVEL: Level = Level::WARN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    /// One JSON object per event, for log shippers.
    Json,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: Level,
    pub format: LogFormat,
    /// Log when each plugin span opens and closes, with its duration.
    pub plugin_spans: bool,
    /// Include file and line.
    pub location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Text,
            plugin_spans: false,
            location: false,
        }
    }
}

impl LoggingConfig {
    /// Maps the `--verbose` and `--format` flags onto a configuration.
    ///
    /// Verbose runs log at debug and time every plugin call. JSON output never
    /// carries source locations.
    pub fn for_cli(verbose: bool, format: LogFormat) -> Self {
        Self {
            level: if verbose { Level::DEBUG } else { Level::INFO },
            format,
            plugin_spans: verbose,
            location: verbose && format == LogFormat::Text,
        }
    }

    /// Filter directives used when `RUST_LOG` is not set.
    pub fn default_directives(&self) -> String {
        std::iter::once(DEPENDENCY_LEVEL.to_string())
            .chain(
                PLUGIN_TARGETS
                    .iter()
                    .map(|target| format!("{}={}", target, self.level)),
            )
            .collect::<Vec<_>>()
            .join(",")
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.default_directives()))
    }
}

/// Installs the global subscriber. Fails if one is already installed.
pub fn init(config: &LoggingConfig) -> Result<(), TryInitError> {
    let span_events = if config.plugin_spans {
        FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_span_events(span_events)
        .with_file(config.location)
        .with_line_number(config.location);
    let layer = match config.format {
        LogFormat::Json => layer.json().with_filter(config.env_filter()).boxed(),
        LogFormat::Text => layer.with_filter(config.env_filter()).boxed(),
    };

    tracing_subscriber::registry().with(layer).try_init()
}

/// Opens the span every plugin operation runs in.
///
/// Events logged inside carry the plugin name and operation, which is how
/// concurrent runs of different plugins are told apart in JSON output.
#[macro_export]
macro_rules! plugin_span {
    ($plugin:expr, $operation:expr) => {
        tracing::info_span!("plugin", plugin = %$plugin, operation = %$operation)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quiet_text_run() {
        let config = LoggingConfig::for_cli(false, LogFormat::Text);
        assert_eq!(config.level, Level::INFO);
        assert!(!config.plugin_spans);
        assert!(!config.location);
    }

    #[test]
    fn test_verbose_json_run_has_no_locations() {
        let config = LoggingConfig::for_cli(true, LogFormat::Json);
        assert_eq!(config.level, Level::DEBUG);
        assert!(config.plugin_spans);
        assert!(!config.location);
    }

    #[test]
    fn test_directives_keep_dependencies_at_warn() {
        let config = LoggingConfig::for_cli(true, LogFormat::Text);
        assert_eq!(
            config.default_directives(),
            "WARN,ib_plugins=DEBUG,ib_observability=DEBUG,ib_cli=DEBUG"
        );
        assert!(config
            .default_directives()
            .parse::<EnvFilter>()
            .is_ok());
    }

    #[test]
    fn test_second_init_fails() {
        let config = LoggingConfig::default();
        let _ = init(&config);
        assert!(init(&config).is_err());
    }
}
