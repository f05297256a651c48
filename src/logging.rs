//! Logging infrastructure - structured tracing for the marshaling core
//!
//! Design: every component emits `tracing` events under its own target
//! (`frame`, `handle`, `lifetime`, `variant`, `registry`, `api`). The host
//! decides where they go; `init_logging` is a convenience for hosts that
//! have no subscriber of their own.
//!
//! `RUST_LOG` overrides the configured filter.

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

static LOGGER_INITIALIZED: OnceCell<()> = OnceCell::new();

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    /// Daily rolling files `<directory>/<prefix>.YYYY-MM-DD`
    File { directory: PathBuf, prefix: String },
}

/// Logging configuration (`[logging]` table)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// trace, debug, info, warn or error
    #[serde(default = "default_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,

    #[serde(default)]
    pub output: LogOutput,

    /// Full filter directives, replacing `level` when set
    #[serde(default)]
    pub filter: Option<String>,

    /// Emit span enter/exit events
    #[serde(default)]
    pub span_events: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::default(),
            output: LogOutput::default(),
            filter: None,
            span_events: false,
        }
    }
}

impl LogConfig {
    /// Config from `GDMARSHAL_LOG_*` environment variables
    pub fn from_env() -> Self {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Config from `GDMARSHAL_LOG_*` values supplied by `var`
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        // GDMARSHAL_LOG_LEVEL: trace, debug, info, warn, error
        if let Some(level) = var("GDMARSHAL_LOG_LEVEL") {
            config.level = level.to_lowercase();
        }

        // GDMARSHAL_LOG_FORMAT: pretty, compact, json
        if let Some(format) = var("GDMARSHAL_LOG_FORMAT") {
            config.format = match format.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "compact" => LogFormat::Compact,
                _ => LogFormat::Pretty,
            };
        }

        // GDMARSHAL_LOG_DIR: daily rolling files in this directory
        if let Some(directory) = var("GDMARSHAL_LOG_DIR") {
            config.output = LogOutput::File {
                directory: directory.into(),
                prefix: "gdmarshal.log".to_string(),
            };
        }

        config.span_events = var("GDMARSHAL_LOG_SPANS").is_some();
        config
    }

    /// Verbose console logging for tests and debugging sessions
    pub fn debug() -> Self {
        Self {
            level: "trace".to_string(),
            format: LogFormat::Compact,
            output: LogOutput::Stderr,
            filter: None,
            span_events: true,
        }
    }

    /// Filter directives this config stands for
    pub fn directives(&self) -> String {
        match &self.filter {
            Some(filter) => filter.clone(),
            None => {
                let level = &self.level;
                ["gdmarshal", "frame", "handle", "lifetime", "variant", "registry", "api"]
                    .iter()
                    .map(|target| format!("{target}={level}"))
                    .collect::<Vec<_>>()
                    .join(",")
            }
        }
    }
}

/// Install a global subscriber for `config`
///
/// Returns the writer guard; keep it alive for as long as events should be
/// flushed. `None` when a subscriber was already installed.
pub fn init_logging(config: &LogConfig) -> Option<WorkerGuard> {
    if is_initialized() {
        return None;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.directives()));

    let span_events = if config.span_events {
        FmtSpan::ENTER | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let (writer, guard) = match &config.output {
        LogOutput::Stdout => tracing_appender::non_blocking(std::io::stdout()),
        LogOutput::Stderr => tracing_appender::non_blocking(std::io::stderr()),
        LogOutput::File { directory, prefix } => {
            tracing_appender::non_blocking(tracing_appender::rolling::daily(directory, prefix))
        }
    };

    let layer = fmt::layer()
        .with_writer(writer)
        .with_span_events(span_events)
        .with_target(true)
        .with_thread_ids(cfg!(debug_assertions))
        .with_line_number(cfg!(debug_assertions));

    let installed = match config.format {
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(layer.pretty())
            .try_init(),
        LogFormat::Compact => tracing_subscriber::registry()
            .with(filter)
            .with(layer.compact())
            .try_init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(layer.json())
            .try_init(),
    };

    match installed {
        Ok(()) => {
            let _ = LOGGER_INITIALIZED.set(());
            Some(guard)
        }
        Err(_) => None,
    }
}

/// Install logging from the environment
pub fn init() -> Option<WorkerGuard> {
    init_logging(&LogConfig::from_env())
}

pub fn is_initialized() -> bool {
    LOGGER_INITIALIZED.get().is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_creation() {
        let config = LogConfig::default();
        assert_eq!(config.level, "info");
        assert_eq!(config.output, LogOutput::Stdout);

        let debug = LogConfig::debug();
        assert_eq!(debug.level, "trace");
        assert!(debug.span_events);
    }

    #[test]
    fn test_from_vars() {
        let vars: std::collections::HashMap<&str, &str> = [
            ("GDMARSHAL_LOG_LEVEL", "DEBUG"),
            ("GDMARSHAL_LOG_FORMAT", "compact"),
            ("GDMARSHAL_LOG_DIR", "/var/log/engine"),
            ("GDMARSHAL_LOG_SPANS", "1"),
        ]
        .into_iter()
        .collect();
        let config = LogConfig::from_vars(|name| vars.get(name).map(|v| v.to_string()));
        assert_eq!(config.level, "debug");
        assert_eq!(config.format, LogFormat::Compact);
        assert_eq!(
            config.output,
            LogOutput::File {
                directory: PathBuf::from("/var/log/engine"),
                prefix: "gdmarshal.log".to_string(),
            }
        );
        assert!(config.span_events);

        let unset = LogConfig::from_vars(|_| None);
        assert_eq!(unset.level, "info");
        assert_eq!(unset.output, LogOutput::Stdout);
        assert!(!unset.span_events);
    }

    #[test]
    fn test_from_env() {
        std::env::set_var("GDMARSHAL_LOG_FORMAT", "json");
        let config = LogConfig::from_env();
        std::env::remove_var("GDMARSHAL_LOG_FORMAT");
        assert_eq!(config.format, LogFormat::Json);
    }

    #[test]
    fn test_directives() {
        let config = LogConfig::default();
        assert!(config.directives().starts_with("gdmarshal=info"));
        assert!(config.directives().contains("lifetime=info"));

        let custom = LogConfig {
            filter: Some("frame=trace".to_string()),
            ..LogConfig::default()
        };
        assert_eq!(custom.directives(), "frame=trace");
    }

    #[test]
    fn test_file_output_parses() {
        let config: LogConfig = toml::from_str(
            r#"
level = "warn"
output = { file = { directory = "logs", prefix = "engine.log" } }
"#,
        )
        .unwrap();
        assert_eq!(
            config.output,
            LogOutput::File {
                directory: PathBuf::from("logs"),
                prefix: "engine.log".to_string(),
            }
        );
    }

    #[test]
    fn test_init_idempotent() {
        let config = LogConfig {
            level: "error".to_string(),
            output: LogOutput::Stderr,
            ..LogConfig::default()
        };
        let first = init_logging(&config);
        let second = init_logging(&config);
        assert!(second.is_none());
        drop(first);
    }
}
