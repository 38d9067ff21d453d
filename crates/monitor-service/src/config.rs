//! Service configuration.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use monitor_core::{DEFAULT_ENDPOINTS_URL, StateSelector, SyncSettings, ThrottlePolicy};

/// Service configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage settings.
    pub storage: StorageConfig,
    /// Remote API settings.
    pub api: ApiConfig,
    /// Freshness and throttling.
    pub sync: SyncConfig,
    /// Scheduled sync passes.
    pub schedule: ScheduleConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Save configuration to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Write {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Validate the configuration and return any errors.
    ///
    /// ```
    /// use monitor_service::Config;
    ///
    /// let config = Config::default();
    /// config.validate().expect("Default config should be valid");
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        errors.extend(self.storage.validate());
        errors.extend(self.api.validate());
        errors.extend(self.sync.validate());
        errors.extend(self.schedule.validate());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Load and validate configuration from a file.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Engine settings derived from the `[api]` and `[sync]` sections.
    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            things_freshness: minutes(self.sync.things_freshness_mins),
            states_freshness: minutes(self.sync.states_freshness_mins),
            endpoints_url: self.api.endpoints_url.clone(),
        }
    }
}

/// Storage configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file path.
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: monitor_store::default_db_path(),
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.path.as_os_str().is_empty() {
            errors.push(ValidationError {
                field: "storage.path".to_string(),
                message: "database path cannot be empty".to_string(),
            });
        }

        errors
    }
}

/// Remote API configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Endpoint discovery URL.
    pub endpoints_url: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

/// Maximum request timeout in seconds (10 minutes).
pub const MAX_TIMEOUT_SECS: u64 = 600;

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            endpoints_url: DEFAULT_ENDPOINTS_URL.to_string(),
            timeout_secs: 30,
        }
    }
}

impl ApiConfig {
    /// Validate API configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if !self.endpoints_url.starts_with("http://") && !self.endpoints_url.starts_with("https://")
        {
            errors.push(ValidationError {
                field: "api.endpoints_url".to_string(),
                message: format!(
                    "URL must start with http:// or https://, got: '{}'",
                    self.endpoints_url
                ),
            });
        }

        if self.timeout_secs == 0 || self.timeout_secs > MAX_TIMEOUT_SECS {
            errors.push(ValidationError {
                field: "api.timeout_secs".to_string(),
                message: format!(
                    "timeout {} must be between 1 and {} seconds",
                    self.timeout_secs, MAX_TIMEOUT_SECS
                ),
            });
        }

        errors
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Freshness windows, throttle bounds and concurrency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Minutes a thing listing stays fresh.
    pub things_freshness_mins: u64,
    /// Minutes a states read stays fresh.
    pub states_freshness_mins: u64,
    /// Requests per query before giving up on a throttled source
    /// (0 keeps waiting until shutdown).
    pub max_throttle_attempts: u32,
    /// Upper bound on the total throttle wait of one query, in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_throttle_wait_secs: Option<u64>,
    /// Accounts synced at the same time during a pass.
    pub concurrency: usize,
}

/// Maximum accounts synced at once.
pub const MAX_CONCURRENCY: usize = 16;

/// Longest freshness window (one year).
pub const MAX_FRESHNESS_MINS: u64 = 365 * 24 * 60;

fn minutes(mins: u64) -> Duration {
    Duration::from_secs(mins.saturating_mul(60))
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            things_freshness_mins: 10,
            states_freshness_mins: 120,
            max_throttle_attempts: 20,
            max_throttle_wait_secs: None,
            concurrency: 2,
        }
    }
}

impl SyncConfig {
    /// Validate sync configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        for (field, mins) in [
            ("sync.things_freshness_mins", self.things_freshness_mins),
            ("sync.states_freshness_mins", self.states_freshness_mins),
        ] {
            if mins > MAX_FRESHNESS_MINS {
                errors.push(ValidationError {
                    field: field.to_string(),
                    message: format!(
                        "freshness window {} exceeds the maximum of {} minutes",
                        mins, MAX_FRESHNESS_MINS
                    ),
                });
            }
        }

        if self.concurrency == 0 || self.concurrency > MAX_CONCURRENCY {
            errors.push(ValidationError {
                field: "sync.concurrency".to_string(),
                message: format!(
                    "concurrency {} must be between 1 and {}",
                    self.concurrency, MAX_CONCURRENCY
                ),
            });
        }

        if self.max_throttle_wait_secs == Some(0) {
            errors.push(ValidationError {
                field: "sync.max_throttle_wait_secs".to_string(),
                message: "wait budget cannot be 0 (omit it for no budget)".to_string(),
            });
        }

        errors
    }

    /// Throttle policy for the fetcher.
    pub fn throttle_policy(&self) -> ThrottlePolicy {
        let mut policy = match self.max_throttle_attempts {
            0 => ThrottlePolicy::unbounded(),
            n => ThrottlePolicy::new(n),
        };
        if let Some(secs) = self.max_throttle_wait_secs {
            policy = policy.max_wait(Duration::from_secs(secs));
        }
        policy
    }
}

/// Scheduled sync configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Seconds between sync passes.
    pub interval_secs: u64,
    /// State selectors synced each pass: `"all"` or an attribute name.
    pub selectors: Vec<String>,
}

/// Minimum interval between passes in seconds (1 minute).
pub const MIN_INTERVAL_SECS: u64 = 60;

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_secs: 12 * 60 * 60,
            selectors: vec!["all".to_string(), "temperature".to_string()],
        }
    }
}

impl ScheduleConfig {
    /// Validate schedule configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.interval_secs < MIN_INTERVAL_SECS {
            errors.push(ValidationError {
                field: "schedule.interval_secs".to_string(),
                message: format!(
                    "interval {} is too short (minimum {} seconds)",
                    self.interval_secs, MIN_INTERVAL_SECS
                ),
            });
        }

        if self.selectors.is_empty() {
            errors.push(ValidationError {
                field: "schedule.selectors".to_string(),
                message: "at least one selector is required".to_string(),
            });
        }

        let mut seen = HashSet::new();
        for (i, selector) in self.selectors.iter().enumerate() {
            let field = format!("schedule.selectors[{}]", i);
            if selector.trim().is_empty() {
                errors.push(ValidationError {
                    field,
                    message: "selector cannot be empty".to_string(),
                });
            } else if !seen.insert(selector.trim()) {
                errors.push(ValidationError {
                    field,
                    message: format!("duplicate selector '{}'", selector),
                });
            }
        }

        errors
    }

    /// Parsed selectors. Empty entries are dropped.
    pub fn selectors(&self) -> Vec<StateSelector> {
        self.selectors
            .iter()
            .filter_map(|s| s.parse().ok())
            .collect()
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// The field path (e.g., `sync.concurrency` or `schedule.selectors[0]`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("monitor")
        .join("service.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(result: Result<(), ConfigError>) -> Vec<String> {
        match result {
            Err(ConfigError::Validation(errors)) => errors.into_iter().map(|e| e.field).collect(),
            Err(e) => panic!("unexpected error: {}", e),
            Ok(()) => Vec::new(),
        }
    }

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.api.endpoints_url, DEFAULT_ENDPOINTS_URL);
        assert_eq!(config.api.timeout_secs, 30);
        assert_eq!(config.sync.things_freshness_mins, 10);
        assert_eq!(config.sync.states_freshness_mins, 120);
        assert_eq!(config.schedule.interval_secs, 43_200);
        assert_eq!(config.schedule.selectors, vec!["all", "temperature"]);
    }

    #[test]
    fn test_storage_config_default() {
        let config = StorageConfig::default();
        assert_eq!(config.path, monitor_store::default_db_path());
    }

    #[test]
    fn test_default_config_validates() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_sync_settings() {
        let config = Config::default();
        let settings = config.sync_settings();
        assert_eq!(settings, SyncSettings::default());
    }

    #[test]
    fn test_sync_settings_saturate_huge_windows() {
        let mut config = Config::default();
        config.sync.things_freshness_mins = u64::MAX;
        config.sync.states_freshness_mins = MAX_FRESHNESS_MINS;

        let settings = config.sync_settings();
        assert_eq!(settings.things_freshness, Duration::from_secs(u64::MAX));
        assert_eq!(
            settings.states_freshness,
            Duration::from_secs(MAX_FRESHNESS_MINS * 60)
        );
        assert_eq!(
            fields(config.validate()),
            vec!["sync.things_freshness_mins"]
        );
    }

    #[test]
    fn test_throttle_policy() {
        let sync = SyncConfig::default();
        assert_eq!(sync.throttle_policy(), ThrottlePolicy::default());

        let sync = SyncConfig {
            max_throttle_attempts: 0,
            max_throttle_wait_secs: Some(300),
            ..Default::default()
        };
        let policy = sync.throttle_policy();
        assert_eq!(policy.max_attempts, None);
        assert_eq!(policy.max_wait, Some(Duration::from_secs(300)));
    }

    #[test]
    fn test_selectors_parse() {
        let schedule = ScheduleConfig::default();
        assert_eq!(
            schedule.selectors(),
            vec![
                StateSelector::All,
                StateSelector::Named("temperature".to_string())
            ]
        );
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let toml = r#"
            [sync]
            states_freshness_mins = 30
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.sync.states_freshness_mins, 30);
        assert_eq!(config.sync.things_freshness_mins, 10);
        assert_eq!(config.schedule, ScheduleConfig::default());
    }

    #[test]
    fn test_config_full_toml() {
        let toml = r#"
            [storage]
            path = "/data/monitor.db"

            [api]
            endpoints_url = "https://api.example.com/endpoints"
            timeout_secs = 10

            [sync]
            things_freshness_mins = 5
            states_freshness_mins = 60
            max_throttle_attempts = 3
            max_throttle_wait_secs = 120
            concurrency = 4

            [schedule]
            interval_secs = 3600
            selectors = ["humidity"]
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.storage.path, PathBuf::from("/data/monitor.db"));
        assert_eq!(config.api.timeout(), Duration::from_secs(10));
        assert_eq!(config.sync.concurrency, 4);
        assert_eq!(config.sync.max_throttle_wait_secs, Some(120));
        assert_eq!(config.schedule.interval(), Duration::from_secs(3600));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_save_and_load() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("nested").join("service.toml");

        let config = Config {
            storage: StorageConfig {
                path: PathBuf::from("/tmp/test.db"),
            },
            schedule: ScheduleConfig {
                interval_secs: 600,
                selectors: vec!["temperature".to_string()],
            },
            ..Default::default()
        };

        config.save(&config_path).unwrap();
        let loaded = Config::load(&config_path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_config_load_nonexistent() {
        let result = Config::load("/nonexistent/path/config.toml");
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_config_load_invalid_toml() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("invalid.toml");
        std::fs::write(&config_path, "this is not valid { toml").unwrap();

        let result = Config::load(&config_path);
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_load_validated_rejects_invalid() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("service.toml");
        std::fs::write(&config_path, "[sync]\nconcurrency = 0\n").unwrap();

        let result = Config::load_validated(&config_path);
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_default_config_path() {
        let path = default_config_path();
        assert!(path.ends_with("monitor/service.toml"));
    }

    #[test]
    fn test_api_validation() {
        let mut config = Config::default();
        config.api.endpoints_url = "ftp://example.com".to_string();
        config.api.timeout_secs = 0;
        assert_eq!(
            fields(config.validate()),
            vec!["api.endpoints_url", "api.timeout_secs"]
        );
    }

    #[test]
    fn test_sync_validation() {
        let mut config = Config::default();
        config.sync.concurrency = MAX_CONCURRENCY + 1;
        config.sync.max_throttle_wait_secs = Some(0);
        assert_eq!(
            fields(config.validate()),
            vec!["sync.concurrency", "sync.max_throttle_wait_secs"]
        );
    }

    #[test]
    fn test_schedule_validation() {
        let mut config = Config::default();
        config.schedule.interval_secs = 10;
        config.schedule.selectors = vec![
            "temperature".to_string(),
            " ".to_string(),
            "temperature".to_string(),
        ];
        assert_eq!(
            fields(config.validate()),
            vec![
                "schedule.interval_secs",
                "schedule.selectors[1]",
                "schedule.selectors[2]"
            ]
        );

        config.schedule.selectors.clear();
        assert!(fields(config.validate()).contains(&"schedule.selectors".to_string()));
    }

    #[test]
    fn test_storage_path_validation() {
        let mut config = Config::default();
        config.storage.path = PathBuf::new();
        assert_eq!(fields(config.validate()), vec!["storage.path"]);
    }

    #[test]
    fn test_config_validation_error_display() {
        let err = ConfigError::Validation(vec![
            ValidationError {
                field: "sync.concurrency".to_string(),
                message: "concurrency 0 must be between 1 and 16".to_string(),
            },
            ValidationError {
                field: "schedule.selectors".to_string(),
                message: "at least one selector is required".to_string(),
            },
        ]);
        let display = err.to_string();
        assert!(display.contains("Configuration validation failed"));
        assert!(display.contains("  - sync.concurrency: concurrency 0"));
        assert!(display.contains("  - schedule.selectors: at least one"));
    }
}
