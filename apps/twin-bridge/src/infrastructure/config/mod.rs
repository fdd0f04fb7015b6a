//! Configuration Module
//!
//! Layered configuration for the bridge:
//!
//! 1. built-in defaults
//! 2. optional YAML file (`./config/config.yaml`, or `DIGITAL_EGIZ_CONFIG`)
//! 3. `DIGITAL_EGIZ_<SECTION>_<KEY>` environment overrides
//!
//! # Usage
//!
//! ```rust,ignore
//! use twin_bridge::infrastructure::config::Config;
//!
//! let config = Config::load()?;
//! println!("brokers: {}", config.kafka.brokers);
//! ```

mod sections;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub use sections::{
    DatabaseSettings, DittoSettings, JwtSettings, KafkaSettings, LogSettings, MlSettings,
    ServerSettings,
};

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "DIGITAL_EGIZ";

/// Variable naming an alternative config file.
pub const CONFIG_PATH_VAR: &str = "DIGITAL_EGIZ_CONFIG";

/// Default config file location.
pub const DEFAULT_CONFIG_PATH: &str = "./config/config.yaml";

/// Keys that accept an environment override.
const OVERRIDABLE_KEYS: &[&str] = &[
    "server.port",
    "server.host",
    "server.read_timeout_secs",
    "server.write_timeout_secs",
    "server.idle_timeout_secs",
    "server.environment",
    "database.host",
    "database.port",
    "database.user",
    "database.password",
    "database.dbname",
    "database.sslmode",
    "database.timezone",
    "database.max_open_conns",
    "database.max_idle_conns",
    "database.conn_max_lifetime_secs",
    "ditto.url",
    "ditto.username",
    "ditto.password",
    "ditto.api_token",
    "kafka.brokers",
    "kafka.consumer_group",
    "kafka.security_enable",
    "kafka.security_user",
    "kafka.security_pass",
    "jwt.secret",
    "jwt.expiration_hours",
    "jwt.refresh_secret",
    "jwt.refresh_expiration_hours",
    "log.level",
    "log.format",
    "log.output_path",
];

/// List-valued keys; the environment value is comma separated.
const LIST_KEYS: &[&str] = &["ml.enabled_features"];

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A source could not be read or merged.
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    /// The merged configuration is not usable.
    #[error("invalid configuration: {0}")]
    Validation(String),
}

/// Complete bridge configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP server.
    pub server: ServerSettings,
    /// Postgres.
    pub database: DatabaseSettings,
    /// Twin registry.
    pub ditto: DittoSettings,
    /// Broker.
    pub kafka: KafkaSettings,
    /// Token signing.
    pub jwt: JwtSettings,
    /// Logging.
    pub log: LogSettings,
    /// ML forwarding.
    pub ml: MlSettings,
}

impl Config {
    /// Load from the default file location and the process environment.
    ///
    /// # Errors
    ///
    /// Returns `Load` if the file is malformed or a value has the wrong
    /// type, and `Validation` if required settings are missing.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_PATH_VAR)
            .map_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);
        Self::load_from(&path, |key| std::env::var(key).ok())
    }

    /// Load from `path` (optional) with overrides looked up through `env`.
    ///
    /// # Errors
    ///
    /// See [`Config::load`].
    pub fn load_from<F>(path: &Path, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&Self::default())?)
            .add_source(
                config::File::from(path)
                    .format(config::FileFormat::Yaml)
                    .required(false),
            );

        for key in OVERRIDABLE_KEYS {
            if let Some(value) = env(&env_var_name(key)) {
                builder = builder.set_override(*key, value)?;
            }
        }
        for key in LIST_KEYS {
            if let Some(value) = env(&env_var_name(key)) {
                let items: Vec<String> = value
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect();
                builder = builder.set_override(*key, items)?;
            }
        }

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Check required settings.
    ///
    /// # Errors
    ///
    /// Returns `Validation` naming the first missing setting, or when
    /// SASL/SSL is requested from a build without the `kafka-ssl` feature.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.kafka.brokers.trim().is_empty() {
            return Err(ConfigError::Validation("kafka.brokers is required".to_string()));
        }
        if self.ditto.url.trim().is_empty() {
            return Err(ConfigError::Validation("ditto.url is required".to_string()));
        }
        if !self.ditto.url.starts_with("http://") && !self.ditto.url.starts_with("https://") {
            return Err(ConfigError::Validation(format!(
                "ditto.url must be an http(s) URL, got '{}'",
                self.ditto.url
            )));
        }
        if self.kafka.security_enable && !cfg!(feature = "kafka-ssl") {
            return Err(ConfigError::Validation(
                "kafka.security_enable requires a build with the kafka-ssl feature".to_string(),
            ));
        }

        if self.server.is_development() {
            return Ok(());
        }
        for (key, value) in [
            ("jwt.secret", &self.jwt.secret),
            ("jwt.refresh_secret", &self.jwt.refresh_secret),
            ("database.password", &self.database.password),
        ] {
            if value.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "{key} is required outside development"
                )));
            }
        }
        Ok(())
    }
}

/// `kafka.consumer_group` -> `DIGITAL_EGIZ_KAFKA_CONSUMER_GROUP`.
#[must_use]
pub fn env_var_name(key: &str) -> String {
    format!("{ENV_PREFIX}_{}", key.replace('.', "_").to_uppercase())
}
