//! File-based logging with per-component files.
//!
//! Every event goes to the root `ldlm.log`; events are additionally routed by
//! their `tracing` target into component files. Files rotate daily unless
//! `ldlm.logs.rotation` says `hourly` or `never`:
//!
//! | Log File   | Component                          | Target Prefixes                                          |
//! |------------|------------------------------------|----------------------------------------------------------|
//! | ldlm.log   | Root logger (all components)       | (all)                                                    |
//! | lease.log  | Sessions, leases and reaping       | ldlm_core::lease, ldlm_core::reaper                      |
//! | lock.log   | Lock table and wait queues         | ldlm_core::table, ldlm_core::scheduler, ldlm_core::service |
//! | remote.log | HTTP transport                     | ldlm_server::api, actix_web                              |
//!
//! Log files are stored in `~/ldlm/logs` by default.
//! Override with `LDLM_LOG_DIR` environment variable or `ldlm.logs.path` config.

use std::path::PathBuf;
use std::str::FromStr;

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::{LevelFilter, Targets};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

use ldlm_common::LdlmError;

const ROOT_LOG_FILE: &str = "ldlm.log";

struct ComponentLogDef {
    file_name: &'static str,
    targets: &'static [&'static str],
}

const COMPONENT_LOGS: &[ComponentLogDef] = &[
    ComponentLogDef {
        file_name: "lease.log",
        targets: &["ldlm_core::lease", "ldlm_core::reaper", "ldlm_core::snapshot"],
    },
    ComponentLogDef {
        file_name: "lock.log",
        targets: &[
            "ldlm_core::table",
            "ldlm_core::scheduler",
            "ldlm_core::service",
        ],
    },
    ComponentLogDef {
        file_name: "remote.log",
        targets: &["ldlm_server::api", "actix_web"],
    },
];

/// Log rotation policy
#[derive(Debug, Clone, Copy)]
pub enum LogRotation {
    Daily,
    Hourly,
    Never,
}

impl FromStr for LogRotation {
    type Err = LdlmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "daily" => Ok(LogRotation::Daily),
            "hourly" => Ok(LogRotation::Hourly),
            "never" => Ok(LogRotation::Never),
            _ => Err(LdlmError::ConfigError(format!(
                "unknown log rotation '{}'",
                s
            ))),
        }
    }
}

impl From<LogRotation> for Rotation {
    fn from(rotation: LogRotation) -> Self {
        match rotation {
            LogRotation::Daily => Rotation::DAILY,
            LogRotation::Hourly => Rotation::HOURLY,
            LogRotation::Never => Rotation::NEVER,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Base log directory (default: `~/ldlm/logs`)
    pub log_dir: PathBuf,
    pub console_output: bool,
    pub console_level: Level,
    pub file_logging: bool,
    pub file_level: Level,
    pub rotation: LogRotation,
}

fn default_log_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(format!("{}/ldlm/logs", home))
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
            console_output: true,
            console_level: Level::INFO,
            file_logging: false,
            file_level: Level::INFO,
            rotation: LogRotation::Daily,
        }
    }
}

impl LoggingConfig {
    /// Create from application configuration. `LDLM_LOG_DIR` wins over
    /// the configured path; unknown levels fall back to `info` and unknown
    /// rotations to daily.
    pub fn from_config(
        log_dir: Option<String>,
        console_output: bool,
        file_logging: bool,
        level: String,
        rotation: String,
    ) -> Self {
        let log_dir = std::env::var("LDLM_LOG_DIR")
            .ok()
            .or(log_dir)
            .map(PathBuf::from)
            .unwrap_or_else(default_log_dir);

        let level = level.parse().unwrap_or(Level::INFO);
        let rotation = rotation.parse().unwrap_or(LogRotation::Daily);

        Self {
            log_dir,
            console_output,
            console_level: level,
            file_logging,
            file_level: level,
            rotation,
        }
    }
}

/// Keeps the non-blocking file writers alive; dropping it flushes them.
pub struct LoggingGuard {
    _file_guards: Vec<WorkerGuard>,
}

/// Install the global subscriber.
///
/// Console and root file levels come from `RUST_LOG` when set, otherwise from
/// `config`. Component files take everything their targets emit.
pub fn init_logging(config: &LoggingConfig) -> Result<LoggingGuard, LdlmError> {
    if config.file_logging {
        std::fs::create_dir_all(&config.log_dir).map_err(|e| {
            LdlmError::ConfigError(format!(
                "cannot create log directory {}: {}",
                config.log_dir.display(),
                e
            ))
        })?;
    }

    let mut guards: Vec<WorkerGuard> = Vec::new();
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    if config.console_output {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.console_level.to_string()));
        let console_layer = fmt::layer()
            .with_target(true)
            .with_thread_names(true)
            .with_filter(filter);
        layers.push(Box::new(console_layer));
    }

    if config.file_logging {
        let root_appender =
            RollingFileAppender::new(config.rotation.into(), &config.log_dir, ROOT_LOG_FILE);
        let (root_nb, root_guard) = tracing_appender::non_blocking(root_appender);
        guards.push(root_guard);

        let root_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.file_level.to_string()));
        let root_layer = fmt::layer()
            .with_writer(root_nb)
            .with_target(true)
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true)
            .with_ansi(false)
            .with_filter(root_filter);
        layers.push(Box::new(root_layer));

        for component in COMPONENT_LOGS {
            let appender = RollingFileAppender::new(
                config.rotation.into(),
                &config.log_dir,
                component.file_name,
            );
            let (nb, guard) = tracing_appender::non_blocking(appender);
            guards.push(guard);

            let mut targets = Targets::new();
            for target in component.targets {
                targets = targets.with_target(*target, LevelFilter::TRACE);
            }

            let layer = fmt::layer()
                .with_writer(nb)
                .with_target(true)
                .with_thread_names(true)
                .with_ansi(false)
                .with_filter(targets);
            layers.push(Box::new(layer));
        }
    }

    Registry::default()
        .with(layers)
        .try_init()
        .map_err(|e| LdlmError::ConfigError(format!("failed to initialize logging: {}", e)))?;

    if config.file_logging {
        tracing::info!(
            log_dir = %config.log_dir.display(),
            "File logging initialized: {} (root) + {} component log files",
            ROOT_LOG_FILE,
            COMPONENT_LOGS.len()
        );
    }

    Ok(LoggingGuard {
        _file_guards: guards,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_config_default() {
        let config = LoggingConfig::default();
        assert!(config.console_output);
        assert!(!config.file_logging);
        assert_eq!(config.console_level, Level::INFO);
        assert!(config.log_dir.ends_with("ldlm/logs"));
    }

    #[test]
    fn test_logging_config_from_config() {
        let config = LoggingConfig::from_config(
            Some("/tmp/ldlm-test-logs".to_string()),
            false,
            true,
            "debug".to_string(),
            "hourly".to_string(),
        );
        if std::env::var("LDLM_LOG_DIR").is_err() {
            assert_eq!(config.log_dir, PathBuf::from("/tmp/ldlm-test-logs"));
        }
        assert!(!config.console_output);
        assert!(config.file_logging);
        assert_eq!(config.file_level, Level::DEBUG);
        assert!(matches!(config.rotation, LogRotation::Hourly));
    }

    #[test]
    fn test_unknown_level_falls_back_to_info() {
        let config = LoggingConfig::from_config(
            None,
            true,
            false,
            "chatty".to_string(),
            "weekly".to_string(),
        );
        assert_eq!(config.console_level, Level::INFO);
        assert!(matches!(config.rotation, LogRotation::Daily));
    }

    #[test]
    fn test_rotation_names() {
        assert!(matches!("NEVER".parse::<LogRotation>(), Ok(LogRotation::Never)));
        assert!(matches!("daily".parse::<LogRotation>(), Ok(LogRotation::Daily)));
        assert!("weekly".parse::<LogRotation>().is_err());
    }

    #[test]
    fn test_component_targets_cover_core_modules() {
        let targets: Vec<&str> = COMPONENT_LOGS
            .iter()
            .flat_map(|c| c.targets.iter().copied())
            .collect();
        for module in ["lease", "reaper", "table", "scheduler", "service"] {
            assert!(targets.contains(&format!("ldlm_core::{}", module).as_str()));
        }
        for component in COMPONENT_LOGS {
            assert!(component.file_name.ends_with(".log"));
        }
    }
}
