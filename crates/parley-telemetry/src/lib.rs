use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("invalid log level: {0}")]
    InvalidLevel(String),
    #[error("tracing subscriber already installed: {0}")]
    AlreadyInitialized(String),
}

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG env var.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "parley_client::connection" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            json: false,
        }
    }
}

impl TelemetryConfig {
    /// Build a config from a textual level such as `"debug"`.
    pub fn from_level_str(level: &str, json: bool) -> Result<Self, TelemetryError> {
        Ok(Self {
            log_level: parse_level(level)?,
            json,
            ..Default::default()
        })
    }

    pub fn with_module_level(mut self, module: impl Into<String>, level: Level) -> Self {
        self.module_levels.push((module.into(), level));
        self
    }

    /// Filter directive string, e.g. `info,parley_client=debug`.
    pub fn filter_directives(&self) -> String {
        let mut filter = self.log_level.to_string().to_lowercase();
        for (module, level) in &self.module_levels {
            filter.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
        }
        filter
    }
}

pub fn parse_level(level: &str) -> Result<Level, TelemetryError> {
    Level::from_str(level.trim()).map_err(|_| TelemetryError::InvalidLevel(level.to_string()))
}

/// Initialize logging. Call once at startup. Output goes to stderr so it
/// never interleaves with answers written to stdout.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.filter_directives()));

    let json_layer = config.json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .with_writer(std::io::stderr)
    });
    let text_layer = (!config.json).then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr)
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .map_err(|e| TelemetryError::AlreadyInitialized(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_includes_module_overrides() {
        let config = TelemetryConfig::default()
            .with_module_level("parley_client::connection", Level::DEBUG)
            .with_module_level("tokio_tungstenite", Level::WARN);
        assert_eq!(
            config.filter_directives(),
            "info,parley_client::connection=debug,tokio_tungstenite=warn"
        );
    }

    #[test]
    fn level_parsing() {
        assert_eq!(parse_level("debug").unwrap(), Level::DEBUG);
        assert_eq!(parse_level(" WARN ").unwrap(), Level::WARN);
        assert!(matches!(parse_level("loud"), Err(TelemetryError::InvalidLevel(_))));
    }

    #[test]
    fn config_from_level_str() {
        let config = TelemetryConfig::from_level_str("trace", true).unwrap();
        assert_eq!(config.log_level, Level::TRACE);
        assert!(config.json);
        assert!(config.module_levels.is_empty());
    }

    #[test]
    fn second_init_is_an_error_not_a_panic() {
        let config = TelemetryConfig::default();
        let _ = init_telemetry(&config);
        assert!(matches!(
            init_telemetry(&config),
            Err(TelemetryError::AlreadyInitialized(_))
        ));
    }
}
