//! Tracing setup for the server process.
//!
//! Two output modes are selected from the environment:
//! - **Production**: JSON engine log in a daily rolling file, plus compact
//!   stdout for the journal
//! - **Development**: pretty stdout with span open/close events
//!
//! Without `RUST_LOG`, the filter keeps the engine crates at the requested
//! level and quiets the HTTP stack, whose per-request spans would otherwise
//! drown out sensor events.

use std::path::PathBuf;
use std::sync::OnceLock;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Level for the engine crates when `RUST_LOG` is unset.
pub const LOG_LEVEL_ENV: &str = "PERIMETER_LOG_LEVEL";

/// Selects production logging when set to `production`.
pub const ENVIRONMENT_ENV: &str = "PERIMETER_ENV";

/// Overrides the production log directory.
pub const LOG_DIR_ENV: &str = "PERIMETER_LOG_DIR";

/// File name prefix of the rolling engine log.
pub const LOG_FILE_PREFIX: &str = "perimeter-engine.log";

const DEFAULT_LEVEL: &str = "info";

static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();
static STDOUT_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Where log output goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogMode {
    Production,
    Development,
}

/// Resolved logging settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingOptions {
    pub mode: LogMode,
    /// Level applied to the engine and server crates.
    pub level: String,
    /// Directory of the rolling file (production only).
    pub directory: PathBuf,
}

impl LoggingOptions {
    /// Read the options from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mode = match lookup(ENVIRONMENT_ENV) {
            Some(value) if value.eq_ignore_ascii_case("production") => LogMode::Production,
            _ => LogMode::Development,
        };
        let level = lookup(LOG_LEVEL_ENV)
            .map(|level| level.trim().to_ascii_lowercase())
            .filter(|level| !level.is_empty())
            .unwrap_or_else(|| DEFAULT_LEVEL.to_string());
        let directory = lookup(LOG_DIR_ENV).map_or_else(default_log_directory, PathBuf::from);

        Self {
            mode,
            level,
            directory,
        }
    }

    /// Filter directives used when `RUST_LOG` is unset.
    #[must_use]
    pub fn default_directives(&self) -> String {
        let level = &self.level;
        format!(
            "warn,perimeter_core={level},perimeter_server={level},tower_http=warn,axum=warn"
        )
    }

    fn env_filter(&self) -> anyhow::Result<EnvFilter> {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return Ok(filter);
        }
        Ok(EnvFilter::try_new(self.default_directives())?)
    }
}

/// Install the global subscriber.
///
/// # Errors
///
/// Returns an error if the filter directives cannot be parsed.
pub fn init(options: &LoggingOptions) -> anyhow::Result<()> {
    let env_filter = options.env_filter()?;

    match options.mode {
        LogMode::Production => init_production(env_filter, options),
        LogMode::Development => init_development(env_filter),
    }

    tracing::debug!(
        mode = ?options.mode,
        level = %options.level,
        directory = %options.directory.display(),
        "Logging initialized"
    );
    Ok(())
}

fn init_production(env_filter: EnvFilter, options: &LoggingOptions) {
    if let Err(err) = std::fs::create_dir_all(&options.directory) {
        eprintln!(
            "cannot create log directory {}: {err}",
            options.directory.display()
        );
    }

    let file_appender =
        RollingFileAppender::new(Rotation::DAILY, &options.directory, LOG_FILE_PREFIX);
    let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);
    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());

    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(file_writer)
        .with_target(true)
        .with_current_span(true)
        .with_file(true)
        .with_line_number(true);

    // journald adds its own timestamps
    let stdout_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(stdout_writer)
        .with_target(false)
        .without_time()
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();

    let _ = FILE_GUARD.set(file_guard);
    let _ = STDOUT_GUARD.set(stdout_guard);
}

fn init_development(env_filter: EnvFilter) {
    let stdout_layer = tracing_subscriber::fmt::layer()
        .pretty()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .init();
}

fn default_log_directory() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/var/log/perimeter")
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "perimeter")
            .map(|dirs| dirs.data_dir().join("logs"))
            .unwrap_or_else(|| PathBuf::from("./logs"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn options(vars: &[(&str, &str)]) -> LoggingOptions {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        LoggingOptions::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults_to_development_at_info() {
        let options = options(&[]);
        assert_eq!(options.mode, LogMode::Development);
        assert_eq!(options.level, "info");
        assert!(!options.directory.as_os_str().is_empty());
    }

    #[test]
    fn test_production_mode_and_overrides() {
        let options = options(&[
            (ENVIRONMENT_ENV, "Production"),
            (LOG_LEVEL_ENV, " DEBUG "),
            (LOG_DIR_ENV, "/tmp/perimeter-logs"),
        ]);
        assert_eq!(options.mode, LogMode::Production);
        assert_eq!(options.level, "debug");
        assert_eq!(options.directory, PathBuf::from("/tmp/perimeter-logs"));
    }

    #[test]
    fn test_default_directives_target_engine_crates() {
        let options = options(&[(LOG_LEVEL_ENV, "trace")]);
        let directives = options.default_directives();
        assert!(directives.contains("perimeter_core=trace"));
        assert!(directives.contains("perimeter_server=trace"));
        assert!(directives.contains("tower_http=warn"));
        assert!(EnvFilter::try_new(directives).is_ok());
    }
}
