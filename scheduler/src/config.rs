// Configuration management with layered configuration (file, env)

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main settings structure containing all configuration options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub database: DatabaseConfig,
    pub queue: QueueConfig,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Filesystem path of the SQLite database file
    pub path: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_seconds: u64,
}

/// Tunables of the queue runner
///
/// The defaults match the host environments this queue was built for:
/// batches of 25 tasks, a 180 second budget per invocation, stale recovery
/// after 5 minutes, and a 30 day retention window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum tasks claimed per batch
    pub batch_size: u32,
    /// Maximum rows per multi-row INSERT when enqueueing in bulk
    pub insert_batch_size: usize,
    /// Wall-clock budget of one invocation, checked between batches
    pub run_time_budget_seconds: u64,
    /// Age after which a `running` task is considered crashed
    pub stale_after_seconds: u64,
    /// Tasks older than this are purged regardless of status
    pub retention_days: u32,
    /// Interval between invocations when driven by `Scheduler::start`
    pub tick_interval_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
}

impl Settings {
    /// Load configuration with layered precedence: defaults → file → env
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path("config")
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Start with built-in defaults so a bare environment still loads
            .add_source(Config::try_from(&Settings::default())?)
            // Add default configuration file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Add local configuration (not committed to git)
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            // Add environment-specific configuration
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Validate configuration settings
    pub fn validate(&self) -> Result<(), String> {
        // Validate database config
        if self.database.path.is_empty() {
            return Err("Database path cannot be empty".to_string());
        }
        if self.database.max_connections == 0 {
            return Err("Database max_connections must be greater than 0".to_string());
        }

        // Validate queue config
        if self.queue.batch_size == 0 {
            return Err("Queue batch_size must be greater than 0".to_string());
        }
        if self.queue.insert_batch_size == 0 {
            return Err("Queue insert_batch_size must be greater than 0".to_string());
        }
        if self.queue.run_time_budget_seconds == 0 {
            return Err("Queue run_time_budget_seconds must be greater than 0".to_string());
        }
        if self.queue.stale_after_seconds == 0 {
            return Err("Queue stale_after_seconds must be greater than 0".to_string());
        }
        if self.queue.retention_days == 0 {
            return Err("Queue retention_days must be greater than 0".to_string());
        }
        if self.queue.tick_interval_seconds == 0 {
            return Err("Queue tick_interval_seconds must be greater than 0".to_string());
        }

        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            queue: QueueConfig::default(),
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
            },
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "data/scheduler.db".to_string(),
            max_connections: 5,
            min_connections: 1,
            connect_timeout_seconds: 30,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            batch_size: 25,
            insert_batch_size: 50,
            run_time_budget_seconds: 180,
            stale_after_seconds: 300,
            retention_days: 30,
            tick_interval_seconds: 60,
        }
    }
}
