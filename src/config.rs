//! Configuration management for the focus-session engine
//!
//! Handles environment variables and application settings.

use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use tracing::{info, warn};

use crate::models::TimerSettings;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" | "console" => Ok(LogFormat::Pretty),
            _ => Err(ConfigError::InvalidLogFormat(s.to_string())),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server bind address
    pub host: String,

    /// Server port
    pub port: u16,

    /// Database URL (SQLite file)
    pub database_url: String,

    /// Environment (development, production)
    pub environment: String,

    /// Log level used when RUST_LOG is unset
    pub log_level: String,

    pub log_format: LogFormat,

    /// CORS origins (empty means allow all)
    pub cors_origins: Vec<String>,

    /// Defaults applied to newly created sessions
    pub timer_defaults: TimerSettings,

    /// Threshold for routine cleanup sweeps
    pub stale_session_max_age_hours: i64,

    /// Threshold when looking for a session to resume
    pub resume_lookup_max_age_hours: i64,

    /// Period of the background stale sweep in seconds
    pub sweep_interval_secs: u64,

    /// Period of the interval-completion ticker in milliseconds
    pub tick_interval_ms: u64,

    /// Capacity of the change-feed and completion broadcast channels
    pub channel_capacity: usize,

    /// Delete session rows once they reach `terminated`
    pub delete_terminated_sessions: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            database_url: "sqlite:pomodoro-sync.db".to_string(),
            environment: "development".to_string(),
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            cors_origins: vec![],
            timer_defaults: TimerSettings::default(),
            stale_session_max_age_hours: 24,
            resume_lookup_max_age_hours: 48,
            sweep_interval_secs: 900,
            tick_interval_ms: 1000,
            channel_capacity: 1000,
            delete_terminated_sessions: false,
        }
    }
}

fn parse_var<T: FromStr>(
    name: &str,
    target: &mut T,
    err: fn(String) -> ConfigError,
) -> Result<(), ConfigError> {
    if let Ok(raw) = env::var(name) {
        *target = raw.parse().map_err(|_| err(raw))?;
    }
    Ok(())
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        // Server configuration
        if let Ok(host) = env::var("POMODORO_HOST") {
            config.host = host;
        }
        parse_var("POMODORO_PORT", &mut config.port, ConfigError::InvalidPort)?;

        // Database configuration
        if let Ok(database_url) = env::var("POMODORO_DATABASE_URL") {
            config.database_url = database_url;
        }

        // Environment and logging
        if let Ok(environment) = env::var("POMODORO_ENVIRONMENT") {
            config.environment = environment;
        }
        if let Ok(log_level) = env::var("POMODORO_LOG_LEVEL") {
            config.log_level = log_level;
        }
        if let Ok(log_format) = env::var("POMODORO_LOG_FORMAT") {
            config.log_format = log_format.parse()?;
        }

        // CORS origins
        if let Ok(cors_origins) = env::var("POMODORO_CORS_ORIGINS") {
            config.cors_origins = cors_origins
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        // Timer defaults
        let defaults = &mut config.timer_defaults;
        parse_var("POMODORO_WORK_MINUTES", &mut defaults.work_duration, ConfigError::InvalidNumber)?;
        parse_var(
            "POMODORO_SHORT_BREAK_MINUTES",
            &mut defaults.short_break_duration,
            ConfigError::InvalidNumber,
        )?;
        parse_var(
            "POMODORO_LONG_BREAK_MINUTES",
            &mut defaults.long_break_duration,
            ConfigError::InvalidNumber,
        )?;
        parse_var(
            "POMODORO_SESSIONS_UNTIL_LONG_BREAK",
            &mut defaults.sessions_until_long_break,
            ConfigError::InvalidNumber,
        )?;

        // Staleness
        parse_var(
            "POMODORO_STALE_MAX_AGE_HOURS",
            &mut config.stale_session_max_age_hours,
            ConfigError::InvalidNumber,
        )?;
        parse_var(
            "POMODORO_RESUME_MAX_AGE_HOURS",
            &mut config.resume_lookup_max_age_hours,
            ConfigError::InvalidNumber,
        )?;
        parse_var(
            "POMODORO_SWEEP_INTERVAL_SECS",
            &mut config.sweep_interval_secs,
            ConfigError::InvalidNumber,
        )?;

        // Background processing
        parse_var(
            "POMODORO_TICK_INTERVAL_MS",
            &mut config.tick_interval_ms,
            ConfigError::InvalidNumber,
        )?;
        parse_var(
            "POMODORO_CHANNEL_CAPACITY",
            &mut config.channel_capacity,
            ConfigError::InvalidNumber,
        )?;
        parse_var(
            "POMODORO_DELETE_TERMINATED",
            &mut config.delete_terminated_sessions,
            ConfigError::InvalidBool,
        )?;

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidPort(self.port.to_string()));
        }

        if self.database_url.is_empty() {
            return Err(ConfigError::EmptyDatabaseUrl);
        }
        if !self.database_url.starts_with("sqlite:") {
            return Err(ConfigError::UnsupportedDatabaseUrl(self.mask_database_url()));
        }

        self.timer_defaults
            .validate()
            .map_err(|e| ConfigError::InvalidTimerDefaults(e.to_string()))?;

        if self.stale_session_max_age_hours <= 0 {
            return Err(ConfigError::InvalidStaleThreshold(self.stale_session_max_age_hours));
        }
        if self.resume_lookup_max_age_hours < self.stale_session_max_age_hours {
            return Err(ConfigError::ResumeThresholdTooAggressive {
                resume: self.resume_lookup_max_age_hours,
                sweep: self.stale_session_max_age_hours,
            });
        }

        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::InvalidNumber(self.sweep_interval_secs.to_string()));
        }
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::InvalidNumber(self.tick_interval_ms.to_string()));
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::InvalidNumber(self.channel_capacity.to_string()));
        }

        Ok(())
    }

    /// Get server bind address
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if running in production mode
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// Log configuration (excluding sensitive data)
    pub fn log_config(&self) {
        info!("Configuration loaded:");
        info!("  Environment: {}", self.environment);
        info!("  Bind address: {}", self.bind_address());
        info!("  Database URL: {}", self.mask_database_url());
        info!("  Log level: {} ({:?})", self.log_level, self.log_format);
        info!("  CORS origins: {:?}", self.cors_origins);
        info!("  Timer defaults: {:?}", self.timer_defaults);
        info!(
            "  Stale thresholds: sweep {}h, resume {}h",
            self.stale_session_max_age_hours, self.resume_lookup_max_age_hours
        );
        info!("  Sweep interval: {}s", self.sweep_interval_secs);
        info!("  Tick interval: {}ms", self.tick_interval_ms);
        info!("  Delete terminated sessions: {}", self.delete_terminated_sessions);

        if self.cors_origins.is_empty() && self.is_production() {
            warn!("CORS allows any origin in production");
        }
    }

    /// Mask database URL for logging
    fn mask_database_url(&self) -> String {
        if self.database_url.starts_with("sqlite:") {
            self.database_url.clone()
        } else if let Some((scheme, _)) = self.database_url.split_once("://") {
            format!("{}://***", scheme)
        } else {
            "***".to_string()
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid port: {0}")]
    InvalidPort(String),

    #[error("Invalid number: {0}")]
    InvalidNumber(String),

    #[error("Invalid boolean value: {0}")]
    InvalidBool(String),

    #[error("Invalid log format: {0} (expected json or pretty)")]
    InvalidLogFormat(String),

    #[error("Empty database URL")]
    EmptyDatabaseUrl,

    #[error("Unsupported database URL: {0}")]
    UnsupportedDatabaseUrl(String),

    #[error("Invalid timer defaults: {0}")]
    InvalidTimerDefaults(String),

    #[error("Stale session threshold must be positive, got {0}h")]
    InvalidStaleThreshold(i64),

    #[error("Resume lookup threshold {resume}h is below the sweep threshold {sweep}h")]
    ResumeThresholdTooAggressive { resume: i64, sweep: i64 },
}
