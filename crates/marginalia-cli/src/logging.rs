//! Tracing subscriber setup.
//!
//! Environment variables:
//!   LOG_FORMAT  - "json" or "text" (default: "text")
//!   LOG_FILE    - path to log file (optional, enables file logging)
//!   LOG_ANSI    - "true"/"false" override ANSI colors (auto-detected by default)
//!   RUST_LOG    - standard env filter (default: info for the marginalia_* crates)

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_FILTER: &str =
    "marginalia_cli=info,marginalia_core=info,marginalia_inference=info,marginalia_jobs=info,marginalia_chat=info";

/// Resolved logging settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub json: bool,
    pub file: Option<String>,
    pub ansi: Option<bool>,
}

impl LogSettings {
    pub fn from_env() -> Self {
        Self::from_values(
            std::env::var("LOG_FORMAT").ok().as_deref(),
            std::env::var("LOG_FILE").ok(),
            std::env::var("LOG_ANSI").ok().as_deref(),
        )
    }

    fn from_values(format: Option<&str>, file: Option<String>, ansi: Option<&str>) -> Self {
        Self {
            json: format.is_some_and(|f| f.eq_ignore_ascii_case("json")),
            file: file.filter(|f| !f.trim().is_empty()),
            ansi: ansi.map(|v| v == "true" || v == "1"),
        }
    }

    pub fn format_name(&self) -> &'static str {
        if self.json {
            "json"
        } else {
            "text"
        }
    }
}

/// Install the global subscriber.
///
/// Logs go to stderr so command output on stdout stays clean. The returned
/// guard must live until exit or buffered file output is lost.
pub fn init(settings: &LogSettings) -> Option<WorkerGuard> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_FILTER.into());
    let registry = tracing_subscriber::registry().with(env_filter);

    if let Some(ref path) = settings.file {
        let file_dir = Path::new(path).parent().unwrap_or(Path::new("."));
        let file_name = Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("marginalia.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if settings.json {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(settings.ansi.unwrap_or(false));
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        if settings.json {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(std::io::stderr),
                )
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
            if let Some(ansi) = settings.ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_to_text_console() {
        let settings = LogSettings::from_values(None, None, None);
        assert!(!settings.json);
        assert_eq!(settings.file, None);
        assert_eq!(settings.ansi, None);
        assert_eq!(settings.format_name(), "text");
    }

    #[test]
    fn test_json_file_and_ansi() {
        let settings =
            LogSettings::from_values(Some("JSON"), Some("/var/log/m.log".into()), Some("1"));
        assert!(settings.json);
        assert_eq!(settings.file.as_deref(), Some("/var/log/m.log"));
        assert_eq!(settings.ansi, Some(true));
    }

    #[test]
    fn test_blank_log_file_ignored() {
        let settings = LogSettings::from_values(Some("text"), Some("  ".into()), Some("no"));
        assert_eq!(settings.file, None);
        assert_eq!(settings.ansi, Some(false));
    }
}
