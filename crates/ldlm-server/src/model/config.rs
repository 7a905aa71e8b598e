//! Configuration management for the LDLM server
//!
//! Sources, lowest precedence first: `conf/application.yml` (or the file
//! given with `--config`), `LDLM`-prefixed environment variables, then
//! command line flags. Environment keys nest with `__`, so
//! `LDLM_SERVER__PORT` sets `server.port` and
//! `LDLM_LDLM__LEASE__DEFAULT_TTL_MS` sets `ldlm.lease.default_ttl_ms`.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use config::{Config, Environment};

use ldlm_common::LdlmError;
use ldlm_core::LockManagerOptions;
use ldlm_core::config::{
    DEFAULT_MAX_LOCKS, DEFAULT_MAX_SESSIONS, DEFAULT_MAX_TTL_MS, DEFAULT_MAX_WAIT_TIMEOUT_MS,
    DEFAULT_REAPER_INTERVAL_MS, DEFAULT_TTL_MS,
};

use crate::startup::LoggingConfig;

pub const DEFAULT_CONFIG_FILE: &str = "conf/application.yml";
pub const DEFAULT_SERVER_PORT: u16 = 3144;
pub const DEFAULT_SAVE_INTERVAL_MS: u64 = 30_000;
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 5;

/// Command line arguments for the server
#[derive(Debug, Default, Parser)]
#[command(name = "ldlm-server", version, about = "Lease-based distributed lock manager")]
pub struct Cli {
    /// Configuration file
    #[arg(short = 'c', long = "config", env = "LDLM_CONFIG")]
    pub config: Option<PathBuf>,
    /// HTTP bind address
    #[arg(long = "address")]
    pub address: Option<String>,
    /// HTTP bind port
    #[arg(short = 'p', long = "port")]
    pub port: Option<u16>,
    /// Snapshot file restored on startup and written on shutdown
    #[arg(long = "state-file", env = "LDLM_STATE_FILE")]
    pub state_file: Option<String>,
    /// Log level for console and files
    #[arg(long = "log-level")]
    pub log_level: Option<String>,
}

/// Application configuration loaded from config files and environment
#[derive(Clone, Debug, Default)]
pub struct Configuration {
    pub config: Config,
}

impl Configuration {
    /// Load configuration using the process command line.
    pub fn new() -> Result<Self, LdlmError> {
        Self::from_cli(Cli::parse())
    }

    pub fn from_cli(args: Cli) -> Result<Self, LdlmError> {
        let file = args
            .config
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

        let mut builder = Config::builder()
            .add_source(config::File::from(file).required(args.config.is_some()))
            .add_source(
                Environment::with_prefix("LDLM")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        if let Some(v) = args.address {
            builder = builder.set_override("server.address", v).map_err(config_error)?;
        }
        if let Some(v) = args.port {
            builder = builder
                .set_override("server.port", i64::from(v))
                .map_err(config_error)?;
        }
        if let Some(v) = args.state_file {
            builder = builder.set_override("ldlm.state.file", v).map_err(config_error)?;
        }
        if let Some(v) = args.log_level {
            builder = builder.set_override("ldlm.logs.level", v).map_err(config_error)?;
        }

        let config = builder.build().map_err(config_error)?;
        Ok(Configuration { config })
    }

    /// Wrap an already built `Config`.
    pub fn from_config(config: Config) -> Self {
        Configuration { config }
    }

    // ========================================================================
    // Server Configuration
    // ========================================================================

    pub fn server_address(&self) -> String {
        self.config
            .get_string("server.address")
            .unwrap_or("0.0.0.0".to_string())
    }

    pub fn server_port(&self) -> u16 {
        self.config
            .get_int("server.port")
            .ok()
            .and_then(|v| u16::try_from(v).ok())
            .unwrap_or(DEFAULT_SERVER_PORT)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.get_u64("ldlm.shutdown.timeout_secs", DEFAULT_SHUTDOWN_TIMEOUT_SECS))
    }

    // ========================================================================
    // Lock Manager Configuration
    // ========================================================================

    pub fn default_ttl_ms(&self) -> u64 {
        self.get_u64("ldlm.lease.default_ttl_ms", DEFAULT_TTL_MS)
    }

    pub fn max_ttl_ms(&self) -> u64 {
        self.get_u64("ldlm.lease.max_ttl_ms", DEFAULT_MAX_TTL_MS)
    }

    pub fn reaper_interval_ms(&self) -> u64 {
        self.get_u64("ldlm.reaper.interval_ms", DEFAULT_REAPER_INTERVAL_MS)
    }

    pub fn max_wait_timeout_ms(&self) -> u64 {
        self.get_u64("ldlm.lock.max_wait_timeout_ms", DEFAULT_MAX_WAIT_TIMEOUT_MS)
    }

    pub fn max_sessions(&self) -> usize {
        self.get_u64("ldlm.session.max_sessions", DEFAULT_MAX_SESSIONS as u64) as usize
    }

    pub fn max_locks(&self) -> usize {
        self.get_u64("ldlm.lock.max_locks", DEFAULT_MAX_LOCKS as u64) as usize
    }

    pub fn shared_batching(&self) -> bool {
        self.config
            .get_bool("ldlm.lock.shared_batching")
            .unwrap_or(true)
    }

    /// Options handed to the lock service. Rejects values the core cannot run with.
    pub fn lock_manager_options(&self) -> Result<LockManagerOptions, LdlmError> {
        let max_ttl_ms = self.max_ttl_ms();
        let reaper_interval_ms = self.reaper_interval_ms();
        if max_ttl_ms == 0 {
            return Err(LdlmError::ConfigError(
                "ldlm.lease.max_ttl_ms must be greater than zero".to_string(),
            ));
        }
        if reaper_interval_ms == 0 {
            return Err(LdlmError::ConfigError(
                "ldlm.reaper.interval_ms must be greater than zero".to_string(),
            ));
        }

        Ok(LockManagerOptions {
            default_ttl: Duration::from_millis(self.default_ttl_ms()),
            max_ttl: Duration::from_millis(max_ttl_ms),
            reaper_interval: Duration::from_millis(reaper_interval_ms),
            max_wait_timeout: Duration::from_millis(self.max_wait_timeout_ms()),
            max_sessions: self.max_sessions(),
            max_locks: self.max_locks(),
            shared_batching: self.shared_batching(),
        })
    }

    // ========================================================================
    // State Snapshot Configuration
    // ========================================================================

    pub fn state_file(&self) -> Option<PathBuf> {
        self.config
            .get_string("ldlm.state.file")
            .ok()
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
    }

    pub fn state_save_interval(&self) -> Duration {
        Duration::from_millis(
            self.get_u64("ldlm.state.save_interval_ms", DEFAULT_SAVE_INTERVAL_MS)
                .max(1),
        )
    }

    // ========================================================================
    // Logging Configuration
    // ========================================================================

    pub fn log_dir(&self) -> Option<String> {
        self.config.get_string("ldlm.logs.path").ok()
    }

    pub fn log_level(&self) -> String {
        self.config
            .get_string("ldlm.logs.level")
            .unwrap_or("info".to_string())
    }

    pub fn log_console(&self) -> bool {
        self.config.get_bool("ldlm.logs.console").unwrap_or(true)
    }

    pub fn log_file(&self) -> bool {
        self.config.get_bool("ldlm.logs.file").unwrap_or(false)
    }

    pub fn log_rotation(&self) -> String {
        self.config
            .get_string("ldlm.logs.rotation")
            .unwrap_or("daily".to_string())
    }

    pub fn logging_config(&self) -> LoggingConfig {
        LoggingConfig::from_config(
            self.log_dir(),
            self.log_console(),
            self.log_file(),
            self.log_level(),
            self.log_rotation(),
        )
    }

    fn get_u64(&self, key: &str, default: u64) -> u64 {
        self.config
            .get_int(key)
            .ok()
            .and_then(|v| u64::try_from(v).ok())
            .unwrap_or(default)
    }
}

fn config_error(e: config::ConfigError) -> LdlmError {
    LdlmError::ConfigError(e.to_string())
}
