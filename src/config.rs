//! Configuration with defaults, validation and environment overrides
//!
//! Load order: TOML file (optional) -> `ROUNDHOUSE_*` environment variables ->
//! command line flags (applied by the binary) -> `validate()`.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::env;
use std::path::Path;
use std::time::Duration;

use crate::errors::{ConfigurationError, RoundhouseResult};
use crate::fairness::DEFAULT_CLIENT_SEED;
use crate::games::orchestrator::OrchestratorSettings;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RoundhouseConfig {
    pub server: ServerConfig,
    pub rounds: RoundsConfig,
    pub crash: CrashConfig,
    pub roulette: RouletteConfig,
    pub storage: StorageConfig,
    pub monitoring: MonitoringConfig,
    pub identities: IdentitiesConfig,
}

/// HTTP / WebSocket listener
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout_secs: u64,
    pub cors_origins: Vec<String>,
    /// Capacity of each game type's broadcast channel
    pub event_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            request_timeout_secs: 30,
            cors_origins: vec!["*".to_string()],
            event_buffer: 1024,
        }
    }
}

/// Lifecycle and betting parameters shared by both game types
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RoundsConfig {
    pub client_seed: String,
    pub min_bet: f64,
    pub io_timeout_ms: u64,
    pub waiting_period_ms: u64,
    pub start_poll_interval_ms: u64,
    pub cooldown_secs: u64,
    pub commit_retry_interval_ms: u64,
    /// Hold a round in WAITING until someone is connected to its game
    pub require_subscribers: bool,
}

impl Default for RoundsConfig {
    fn default() -> Self {
        Self {
            client_seed: DEFAULT_CLIENT_SEED.to_string(),
            min_bet: 0.1,
            io_timeout_ms: 2_000,
            waiting_period_ms: 2_000,
            start_poll_interval_ms: 500,
            cooldown_secs: 10,
            commit_retry_interval_ms: 1_000,
            require_subscribers: true,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CrashConfig {
    pub enabled: bool,
    pub tick_interval_ms: u64,
    /// `r` in `(1 + r)^t`
    pub growth_rate: f64,
    pub max_duration_secs: u64,
}

impl Default for CrashConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_interval_ms: 50,
            growth_rate: 0.075,
            max_duration_secs: 100,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RouletteConfig {
    pub enabled: bool,
    pub reveal_delay_ms: u64,
}

impl Default for RouletteConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            reveal_delay_ms: 5_000,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: String,
    /// Keep archived rounds in memory only
    pub in_memory: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "./DB/roundhouse".to_string(),
            in_memory: false,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub enable_metrics: bool,
    /// `EnvFilter` directives used when `RUST_LOG` is unset
    pub log_filter: String,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enable_metrics: true,
            log_filter: "roundhouse=info,tower_http=info".to_string(),
        }
    }
}

/// Static token table for the reference identity resolver
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentitiesConfig {
    pub default_balance: f64,
    pub users: Vec<IdentityEntry>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct IdentityEntry {
    pub token: String,
    pub user_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance: Option<f64>,
}

impl Default for IdentitiesConfig {
    fn default() -> Self {
        Self {
            default_balance: 1_000.0,
            users: Vec::new(),
        }
    }
}

impl RoundhouseConfig {
    /// Short phases for local development
    pub fn development() -> Self {
        Self {
            rounds: RoundsConfig {
                waiting_period_ms: 500,
                cooldown_secs: 3,
                require_subscribers: false,
                ..Default::default()
            },
            storage: StorageConfig {
                in_memory: true,
                ..Default::default()
            },
            identities: IdentitiesConfig {
                users: vec![
                    IdentityEntry {
                        token: "dev-token-1".to_string(),
                        user_id: 1,
                        balance: None,
                    },
                    IdentityEntry {
                        token: "dev-token-2".to_string(),
                        user_id: 2,
                        balance: None,
                    },
                ],
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.server.port == 0 {
            return Err(ConfigValidationError::InvalidValue("server.port must be > 0".to_string()));
        }
        if self.server.event_buffer == 0 {
            return Err(ConfigValidationError::InvalidValue("server.event_buffer must be > 0".to_string()));
        }

        if !self.rounds.min_bet.is_finite() || self.rounds.min_bet <= 0.0 {
            return Err(ConfigValidationError::InvalidValue("rounds.min_bet must be > 0".to_string()));
        }
        if self.rounds.io_timeout_ms == 0 {
            return Err(ConfigValidationError::InvalidValue("rounds.io_timeout_ms must be > 0".to_string()));
        }
        if self.rounds.start_poll_interval_ms == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "rounds.start_poll_interval_ms must be > 0".to_string(),
            ));
        }
        if self.rounds.client_seed.is_empty() {
            return Err(ConfigValidationError::MissingRequired("rounds.client_seed".to_string()));
        }

        if self.crash.tick_interval_ms == 0 {
            return Err(ConfigValidationError::InvalidValue("crash.tick_interval_ms must be > 0".to_string()));
        }
        if !self.crash.growth_rate.is_finite() || self.crash.growth_rate <= 0.0 {
            return Err(ConfigValidationError::InvalidValue("crash.growth_rate must be > 0".to_string()));
        }
        if self.crash.max_duration_secs * 1000 < self.crash.tick_interval_ms {
            return Err(ConfigValidationError::LogicalInconsistency(
                "crash.max_duration_secs is shorter than one tick".to_string(),
            ));
        }
        if !self.crash.enabled && !self.roulette.enabled {
            return Err(ConfigValidationError::LogicalInconsistency(
                "at least one game type must be enabled".to_string(),
            ));
        }

        if !self.storage.in_memory && self.storage.data_dir.is_empty() {
            return Err(ConfigValidationError::MissingRequired("storage.data_dir".to_string()));
        }

        let mut tokens = HashSet::new();
        let mut users = HashSet::new();
        for entry in &self.identities.users {
            if entry.token.is_empty() {
                return Err(ConfigValidationError::InvalidValue(format!(
                    "identity for user {} has an empty token",
                    entry.user_id
                )));
            }
            if !tokens.insert(entry.token.as_str()) {
                return Err(ConfigValidationError::LogicalInconsistency(format!(
                    "identity token '{}' is used more than once",
                    entry.token
                )));
            }
            if !users.insert(entry.user_id) {
                return Err(ConfigValidationError::LogicalInconsistency(format!(
                    "user {} is listed more than once",
                    entry.user_id
                )));
            }
        }

        Ok(())
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.rounds.io_timeout_ms)
    }

    pub fn waiting_period(&self) -> Duration {
        Duration::from_millis(self.rounds.waiting_period_ms)
    }

    pub fn start_poll_interval(&self) -> Duration {
        Duration::from_millis(self.rounds.start_poll_interval_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.rounds.cooldown_secs)
    }

    pub fn commit_retry_interval(&self) -> Duration {
        Duration::from_millis(self.rounds.commit_retry_interval_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.crash.tick_interval_ms)
    }

    pub fn max_duration(&self) -> Duration {
        Duration::from_secs(self.crash.max_duration_secs)
    }

    pub fn reveal_delay(&self) -> Duration {
        Duration::from_millis(self.roulette.reveal_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    /// Orchestrator parameters; `first_nonce` continues an archived sequence
    pub fn orchestrator_settings(&self, first_nonce: u64) -> OrchestratorSettings {
        OrchestratorSettings {
            client_seed: self.rounds.client_seed.clone(),
            min_bet: self.rounds.min_bet,
            io_timeout: self.io_timeout(),
            waiting_period: self.waiting_period(),
            start_poll_interval: self.start_poll_interval(),
            cooldown: self.cooldown(),
            commit_retry_interval: self.commit_retry_interval(),
            first_nonce,
        }
    }
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValidationError {
    InvalidValue(String),
    LogicalInconsistency(String),
    MissingRequired(String),
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigValidationError::InvalidValue(msg) => write!(f, "Invalid configuration value: {}", msg),
            ConfigValidationError::LogicalInconsistency(msg) => {
                write!(f, "Configuration logical inconsistency: {}", msg)
            }
            ConfigValidationError::MissingRequired(msg) => write!(f, "Missing required configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigValidationError {}

impl From<ConfigValidationError> for ConfigurationError {
    fn from(e: ConfigValidationError) -> Self {
        ConfigurationError::ValidationFailed(e.to_string())
    }
}

/// Configuration loader with environment variable support
#[derive(Debug, Default)]
pub struct ConfigLoader {
    config_path: Option<String>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    pub fn with_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_string_lossy().to_string());
        self
    }

    /// File (or defaults), then environment overrides. Validation is left to
    /// the caller so command line flags can be applied first.
    pub fn load(&self) -> RoundhouseResult<RoundhouseConfig> {
        let mut config = match self.config_path {
            Some(ref path) => Self::load_from_file(path)?,
            None => RoundhouseConfig::default(),
        };
        apply_env_overrides(&mut config, |key| env::var(key).ok())?;
        Ok(config)
    }

    fn load_from_file(path: &str) -> RoundhouseResult<RoundhouseConfig> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigurationError::LoadFailed(format!("Failed to read {}: {}", path, e)))?;

        toml::from_str(&content)
            .map_err(|e| ConfigurationError::LoadFailed(format!("Failed to parse TOML: {}", e)).into())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: String, reason: &str) -> Result<T, ConfigurationError> {
    value.parse().map_err(|_| ConfigurationError::InvalidValue {
        field: key.to_string(),
        value,
        reason: reason.to_string(),
    })
}

/// Apply `ROUNDHOUSE_*` overrides read through `lookup`
pub fn apply_env_overrides<F>(config: &mut RoundhouseConfig, lookup: F) -> Result<(), ConfigurationError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(host) = lookup("ROUNDHOUSE_HOST") {
        config.server.host = host;
    }
    if let Some(port) = lookup("ROUNDHOUSE_PORT") {
        config.server.port = parse_env("ROUNDHOUSE_PORT", port, "Invalid port number")?;
    }
    if let Some(data_dir) = lookup("ROUNDHOUSE_DATA_DIR") {
        config.storage.data_dir = data_dir;
    }
    if let Some(in_memory) = lookup("ROUNDHOUSE_IN_MEMORY") {
        config.storage.in_memory = parse_env("ROUNDHOUSE_IN_MEMORY", in_memory, "Invalid boolean value")?;
    }
    if let Some(min_bet) = lookup("ROUNDHOUSE_MIN_BET") {
        config.rounds.min_bet = parse_env("ROUNDHOUSE_MIN_BET", min_bet, "Invalid amount")?;
    }
    if let Some(seed) = lookup("ROUNDHOUSE_CLIENT_SEED") {
        config.rounds.client_seed = seed;
    }
    if let Some(cooldown) = lookup("ROUNDHOUSE_COOLDOWN_SECS") {
        config.rounds.cooldown_secs = parse_env("ROUNDHOUSE_COOLDOWN_SECS", cooldown, "Invalid number of seconds")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = RoundhouseConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.tick_interval(), Duration::from_millis(50));
        assert_eq!(config.reveal_delay(), Duration::from_secs(5));
        assert_eq!(config.cooldown(), Duration::from_secs(10));
        assert_eq!(config.io_timeout(), Duration::from_secs(2));
        assert!(RoundhouseConfig::development().validate().is_ok());
    }

    #[test]
    fn test_validation_failures() {
        let mut config = RoundhouseConfig::default();
        config.crash.tick_interval_ms = 0;
        assert!(matches!(config.validate(), Err(ConfigValidationError::InvalidValue(_))));

        let mut config = RoundhouseConfig::default();
        config.rounds.min_bet = 0.0;
        assert!(config.validate().is_err());

        let mut config = RoundhouseConfig::default();
        config.crash.enabled = false;
        config.roulette.enabled = false;
        assert!(matches!(config.validate(), Err(ConfigValidationError::LogicalInconsistency(_))));

        let mut config = RoundhouseConfig::development();
        config.identities.users[1].token = config.identities.users[0].token.clone();
        assert!(matches!(config.validate(), Err(ConfigValidationError::LogicalInconsistency(_))));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [("ROUNDHOUSE_PORT", "9001"), ("ROUNDHOUSE_MIN_BET", "0.5")].into();
        let mut config = RoundhouseConfig::default();
        apply_env_overrides(&mut config, |k| vars.get(k).map(|v| v.to_string())).expect("overrides");
        assert_eq!(config.server.port, 9001);
        assert_eq!(config.rounds.min_bet, 0.5);

        let bad: HashMap<&str, &str> = [("ROUNDHOUSE_PORT", "not-a-port")].into();
        let err = apply_env_overrides(&mut config, |k| bad.get(k).map(|v| v.to_string())).unwrap_err();
        assert!(err.to_string().contains("ROUNDHOUSE_PORT"));
    }

    #[test]
    fn test_partial_toml_file() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(
            file,
            "[crash]\ngrowth_rate = 0.1\n\n[[identities.users]]\ntoken = \"abc\"\nuser_id = 7\nbalance = 50.0\n"
        )
        .expect("write");

        let config = ConfigLoader::new().with_path(file.path()).load().expect("load");
        assert_eq!(config.crash.growth_rate, 0.1);
        assert_eq!(config.crash.tick_interval_ms, 50);
        assert_eq!(config.identities.users.len(), 1);
        assert_eq!(config.identities.users[0].balance, Some(50.0));
        assert_eq!(config.rounds.min_bet, 0.1);
    }
}
