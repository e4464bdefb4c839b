//! Log setup for the terminal client. Logs go to stderr or a file so they
//! never interleave with the feed painted on stdout.

use std::fs::OpenOptions;
use std::path::PathBuf;

use clap::ValueEnum;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Replaces the computed filter entirely.
const FILTER_VAR: &str = "FEED_LOG_FILTER";
/// Lets HTTP stack internals log at trace along with the feed crates.
const TRACE_DEPS_VAR: &str = "FEED_TRACE_DEPS";

const FEED_TARGETS: &[&str] = &["feed", "feed_core", "feed_http", "feed_cli"];
const NOISY_DEPS: &[&str] = &["hyper", "hyper_util", "reqwest", "rustls", "h2"];

#[derive(Clone, Copy, Debug, Default, ValueEnum, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error,
    #[default]
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn directive(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct LogConfig {
    pub level: LogLevel,
    pub file: Option<PathBuf>,
}

#[derive(thiserror::Error, Debug)]
pub enum InitError {
    #[error("failed to open log file {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to install logger: {0}")]
    Install(String),
}

/// Installs the global subscriber. Keep the guard alive for the life of the
/// process; dropping it flushes and closes the background writer.
pub fn init(config: &LogConfig) -> Result<WorkerGuard, InitError> {
    let directives = match std::env::var(FILTER_VAR) {
        Ok(custom) => custom,
        Err(_) => {
            let trace_deps =
                std::env::var(TRACE_DEPS_VAR).is_ok_and(|v| v != "0" && !v.is_empty());
            filter_directives(config.level, trace_deps)
        }
    };

    let (writer, guard) = match &config.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| InitError::Io {
                    path: path.clone(),
                    source,
                })?;
            tracing_appender::non_blocking(file)
        }
        None => tracing_appender::non_blocking(std::io::stderr()),
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(directives))
        .with_target(config.level >= LogLevel::Debug)
        .with_ansi(config.file.is_none())
        .with_writer(writer)
        .try_init()
        .map_err(|err| InitError::Install(err.to_string()))?;
    Ok(guard)
}

/// Debug and trace apply to the feed crates only; everything else stays at
/// info. Under trace the HTTP stack is held at info unless `trace_deps`.
fn filter_directives(level: LogLevel, trace_deps: bool) -> String {
    if level < LogLevel::Debug {
        return level.directive().to_owned();
    }
    let mut directives = vec!["info".to_owned()];
    directives.extend(
        FEED_TARGETS
            .iter()
            .map(|target| format!("{target}={}", level.directive())),
    );
    if level == LogLevel::Trace && !trace_deps {
        directives.extend(NOISY_DEPS.iter().map(|dep| format!("{dep}=info")));
    }
    directives.join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiet_levels_are_global() {
        assert_eq!(filter_directives(LogLevel::Warn, false), "warn");
        assert_eq!(filter_directives(LogLevel::Info, true), "info");
    }

    #[test]
    fn debug_targets_only_feed_crates() {
        let filter = filter_directives(LogLevel::Debug, false);
        assert!(filter.starts_with("info,"));
        assert!(filter.contains("feed_http=debug"));
        assert!(!filter.contains("reqwest"));
    }

    #[test]
    fn trace_holds_http_stack_at_info_unless_asked() {
        let capped = filter_directives(LogLevel::Trace, false);
        assert!(capped.contains("feed_core=trace"));
        assert!(capped.contains("reqwest=info"));

        let open = filter_directives(LogLevel::Trace, true);
        assert!(!open.contains("reqwest"));
    }
}
