//! Configuration handling for the fleet backend.
//!
//! Every setting can be given as a CLI flag or an environment variable; a
//! `.env` file in the working directory is loaded before parsing.

use clap::{Args, Parser};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 3001;

// Pool configuration defaults
pub const DEFAULT_DB_USER: &str = "postgres";
pub const DEFAULT_DB_HOST: &str = "localhost";
pub const DEFAULT_DB_DATABASE: &str = "postgres";
pub const DEFAULT_DB_PORT: u16 = 5432;
pub const DEFAULT_MAX_CLIENTS: u32 = 20;
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_CONNECTION_TIMEOUT_MS: u64 = 2_000;
pub const DEFAULT_LEASE_IDLE_WARNING_MS: u64 = 5_000;
pub const DEFAULT_IDLE_CHECK_INTERVAL_MS: u64 = 10_000;

// Rate limiting defaults: 100 requests per 15 minutes
pub const DEFAULT_RATE_LIMIT_WINDOW_MS: u64 = 15 * 60 * 1000;
pub const DEFAULT_RATE_LIMIT_MAX: u32 = 100;

/// Execution environment, read from `NODE_ENV`.
///
/// Only `production` changes behavior (error detail is redacted); any other
/// value is treated as development.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    #[default]
    Development,
    Production,
}

impl RunMode {
    pub fn from_env_value(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("production") {
            Self::Production
        } else {
            Self::Development
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Development => write!(f, "development"),
            Self::Production => write!(f, "production"),
        }
    }
}

fn parse_run_mode(value: &str) -> Result<RunMode, String> {
    Ok(RunMode::from_env_value(value))
}

/// PostgreSQL pool settings.
#[derive(Debug, Clone, Args)]
pub struct DatabaseSettings {
    #[arg(long, env = "DB_USER", default_value = DEFAULT_DB_USER)]
    pub db_user: String,

    #[arg(long, env = "DB_HOST", default_value = DEFAULT_DB_HOST)]
    pub db_host: String,

    #[arg(long, env = "DB_DATABASE", default_value = DEFAULT_DB_DATABASE)]
    pub db_database: String,

    /// Contains sensitive data - never log
    #[arg(long, env = "DB_PASSWORD", hide_env_values = true)]
    pub db_password: Option<String>,

    #[arg(long, env = "DB_PORT", default_value_t = DEFAULT_DB_PORT)]
    pub db_port: u16,

    /// Maximum number of pooled connections
    #[arg(long, env = "DB_MAX_CLIENTS", default_value_t = DEFAULT_MAX_CLIENTS)]
    pub db_max_clients: u32,

    /// Idle connection timeout in milliseconds (0 keeps idle connections forever)
    #[arg(long, env = "DB_IDLE_TIMEOUT", default_value_t = DEFAULT_IDLE_TIMEOUT_MS)]
    pub db_idle_timeout: u64,

    /// Connection acquisition timeout in milliseconds
    #[arg(
        long,
        env = "DB_CONNECTION_TIMEOUT",
        default_value_t = DEFAULT_CONNECTION_TIMEOUT_MS
    )]
    pub db_connection_timeout: u64,

    /// Statement timeout in milliseconds (unset: no timeout)
    #[arg(long, env = "DB_QUERY_TIMEOUT")]
    pub db_query_timeout: Option<u64>,

    /// Log a warning when a lease is held this long without release (milliseconds)
    #[arg(
        long,
        env = "DB_LEASE_IDLE_WARNING",
        default_value_t = DEFAULT_LEASE_IDLE_WARNING_MS
    )]
    pub db_lease_idle_warning: u64,

    /// Interval between idle connection probes in milliseconds (0 disables)
    #[arg(
        long,
        env = "DB_IDLE_CHECK_INTERVAL",
        default_value_t = DEFAULT_IDLE_CHECK_INTERVAL_MS
    )]
    pub db_idle_check_interval: u64,
}

impl DatabaseSettings {
    /// `None` when idle connections should never be reaped.
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.db_idle_timeout > 0).then(|| Duration::from_millis(self.db_idle_timeout))
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.db_connection_timeout)
    }

    pub fn query_timeout(&self) -> Option<Duration> {
        self.db_query_timeout.map(Duration::from_millis)
    }

    pub fn lease_idle_warning(&self) -> Duration {
        Duration::from_millis(self.db_lease_idle_warning)
    }

    /// `None` when the idle monitor is disabled.
    pub fn idle_check_interval(&self) -> Option<Duration> {
        (self.db_idle_check_interval > 0).then(|| Duration::from_millis(self.db_idle_check_interval))
    }

    /// Validate pool settings and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.db_max_clients == 0 {
            return Err("DB_MAX_CLIENTS must be greater than 0".to_string());
        }
        if self.db_connection_timeout == 0 {
            return Err("DB_CONNECTION_TIMEOUT must be greater than 0".to_string());
        }
        if self.db_lease_idle_warning == 0 {
            return Err("DB_LEASE_IDLE_WARNING must be greater than 0".to_string());
        }
        if self.db_query_timeout == Some(0) {
            return Err("DB_QUERY_TIMEOUT must be greater than 0 when set".to_string());
        }
        Ok(())
    }
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            db_user: DEFAULT_DB_USER.to_string(),
            db_host: DEFAULT_DB_HOST.to_string(),
            db_database: DEFAULT_DB_DATABASE.to_string(),
            db_password: None,
            db_port: DEFAULT_DB_PORT,
            db_max_clients: DEFAULT_MAX_CLIENTS,
            db_idle_timeout: DEFAULT_IDLE_TIMEOUT_MS,
            db_connection_timeout: DEFAULT_CONNECTION_TIMEOUT_MS,
            db_query_timeout: None,
            db_lease_idle_warning: DEFAULT_LEASE_IDLE_WARNING_MS,
            db_idle_check_interval: DEFAULT_IDLE_CHECK_INTERVAL_MS,
        }
    }
}

/// Log output settings.
#[derive(Debug, Clone, Args)]
pub struct LogSettings {
    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Directory for combined.log and error.log
    #[arg(long, env = "LOG_DIR", default_value = ".")]
    pub log_dir: PathBuf,

    /// Emit JSON instead of human-readable lines on stdout
    #[arg(long, env = "LOG_JSON")]
    pub log_json: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: PathBuf::from("."),
            log_json: false,
        }
    }
}

/// Configuration for the fleet backend.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "fleet-backend",
    about = "REST backend for the fleet service",
    version,
    author
)]
pub struct Config {
    #[command(flatten)]
    pub database: DatabaseSettings,

    #[command(flatten)]
    pub logging: LogSettings,

    /// HTTP host to bind to
    #[arg(long, env = "HOST", default_value = DEFAULT_HOST)]
    pub host: String,

    /// HTTP port to bind to
    #[arg(long, env = "PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// HS256 secret used to verify bearer tokens
    #[arg(long, env = "JWT_SECRET", hide_env_values = true)]
    pub jwt_secret: String,

    /// Execution environment; "production" hides error details from clients
    #[arg(
        long = "node-env",
        env = "NODE_ENV",
        default_value = "development",
        value_parser = parse_run_mode
    )]
    pub run_mode: RunMode,

    /// Rate limit window in milliseconds
    #[arg(
        long,
        env = "RATE_LIMIT_WINDOW_MS",
        default_value_t = DEFAULT_RATE_LIMIT_WINDOW_MS
    )]
    pub rate_limit_window_ms: u64,

    /// Maximum requests per client IP within one window
    #[arg(long, env = "RATE_LIMIT_MAX", default_value_t = DEFAULT_RATE_LIMIT_MAX)]
    pub rate_limit_max: u32,
}

impl Config {
    /// Create a default configuration (useful for testing).
    pub fn default_config() -> Self {
        Self {
            database: DatabaseSettings::default(),
            logging: LogSettings::default(),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            jwt_secret: String::new(),
            run_mode: RunMode::Development,
            rate_limit_window_ms: DEFAULT_RATE_LIMIT_WINDOW_MS,
            rate_limit_max: DEFAULT_RATE_LIMIT_MAX,
        }
    }

    /// Get the HTTP bind address.
    pub fn http_bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_millis(self.rate_limit_window_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        self.database.validate()?;
        if self.jwt_secret.trim().is_empty() {
            return Err("JWT_SECRET must be set".to_string());
        }
        if self.rate_limit_max == 0 {
            return Err("RATE_LIMIT_MAX must be greater than 0".to_string());
        }
        if self.rate_limit_window_ms == 0 {
            return Err("RATE_LIMIT_WINDOW_MS must be greater than 0".to_string());
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}
