use std::collections::HashSet;
use std::{env, fmt, fs, io, path};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::monitoring::{Service, ValidationError, validate_service};
use crate::notifier::ChannelConfig;
use crate::orchestrator::RetentionPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    ReadFailed(#[source] io::Error),

    #[error("Failed to write config: {0}")]
    WriteFailed(#[source] io::Error),

    #[error("Failed to parse config: {0}")]
    ParseFailed(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    SerializeFailed(#[from] toml::ser::Error),

    #[error("Invalid config: {0}")]
    Invalid(#[from] ValidationError),

    #[error("Invalid config: service id {0} is defined twice")]
    DuplicateService(i64),

    #[error("No config path: neither XDG_CONFIG_HOME nor a home directory is available")]
    ConfigPathUnavailable,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: Database,
    pub logging: Logging,
    pub retention: Retention,
    pub services: Vec<Service>,
    pub notifiers: Vec<ChannelConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Database {
    pub path: String,
    pub pool_size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Logging {
    /// Default filter directive, overridden by RUST_LOG
    pub level: String,
    /// `compact` or `json`, overridden by RUST_LOG_FORMAT
    pub format: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Retention {
    pub days: i64,
}

impl Default for Database {
    fn default() -> Self {
        Self { path: "upkeep.db".into(), pool_size: 8 }
    }
}

impl Default for Logging {
    fn default() -> Self {
        Self { level: "info".into(), format: "compact".into() }
    }
}

impl Default for Retention {
    fn default() -> Self {
        Self { days: RetentionPolicy::default().days }
    }
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().is_none_or(|ext| ext != "toml") {
        path.set_extension("toml");
    }
    path
}

/// Get default config path ($XDG_CONFIG_HOME/upkeep/config.toml or
/// $HOME/.config/...)
pub fn default_config_path() -> Result<path::PathBuf, ConfigError> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".config")
    } else {
        return Err(ConfigError::ConfigPathUnavailable);
    };

    Ok(path.join("upkeep/config.toml"))
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str, value: &dyn fmt::Display| {
                writeln!(f, "  {:indent$}{}: {}", "", label, value, indent = level * 2)
            }
        };
        let write_title_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str| writeln!(f, "{:indent$}{}", "", label, indent = level * 2)
        };

        let write_title_1 = write_title_indented(1);
        let write_1 = write_indented(1);
        let write_2 = write_indented(2);

        writeln!(f, "Current Internal Configuration State:")?;
        write_title_1(f, "Database")?;
        write_1(f, "Path", &self.database.path)?;
        write_1(f, "Pool Size", &self.database.pool_size)?;

        write_title_1(f, "Logging")?;
        write_1(f, "Level", &self.logging.level)?;
        write_1(f, "Format", &self.logging.format)?;

        write_title_1(f, "Retention")?;
        write_1(f, "Days", &self.retention.days)?;

        write_title_1(f, "Services")?;
        for service in &self.services {
            write_1(f, &format!("#{} {}", service.id, service.name), &service.address())?;
            write_2(f, "Protocol", &service.protocol)?;
            write_2(f, "Interval", &format!("{:?}", service.duration()))?;
            write_2(f, "Timeout", &format!("{}s", service.timeout))?;
        }

        write_title_1(f, "Notifiers")?;
        for notifier in &self.notifiers {
            let state = if notifier.enabled { "enabled" } else { "disabled" };
            write_1(f, &format!("#{} {}", notifier.id, notifier.method), &state)?;
        }

        Ok(())
    }
}

impl Config {
    /// Generate Config structure from file
    ///
    /// Creates a default config in ~/.config/upkeep/config.toml
    ///  or the specified path, with the name config.toml if one does not exist
    ///
    /// ```rust,no_run
    /// let cfg = upkeep::config::Config::from_config(None::<&std::path::Path>).unwrap();
    /// println!("{}", cfg);
    /// ```
    pub fn from_config(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, ConfigError> {
        let config_path: path::PathBuf = if let Some(path) = optional_path {
            normalize_toml_path(path.as_ref())
        } else {
            default_config_path()?
        };

        if config_path.exists() {
            let raw_string = fs::read_to_string(&config_path).map_err(ConfigError::ReadFailed)?;
            let config: Self = toml::from_str(raw_string.as_str())?;
            config.validate()?;
            Ok(config)
        } else {
            let config = Self::default();
            config.write_config(&config_path)?;
            Ok(config)
        }
    }

    /// Serialize and write a config to a file
    pub fn write_config(&self, path: &path::Path) -> Result<(), ConfigError> {
        let config_str: String = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(ConfigError::WriteFailed)?;
        }

        fs::write(path, config_str).map_err(ConfigError::WriteFailed)
    }

    /// Check every seed service and reject duplicate ids
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for service in &self.services {
            validate_service(service)?;
            if !seen.insert(service.id) {
                return Err(ConfigError::DuplicateService(service.id));
            }
        }
        Ok(())
    }

    pub fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy { days: self.retention.days }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::Protocol;
    use tempfile::tempdir;

    const SAMPLE: &str = r#"
[database]
path = "/var/lib/upkeep/upkeep.db"

[logging]
format = "json"

[[services]]
id = 1
name = "Homepage"
target = "https://example.com"
protocol = "http"
interval = 60
expected = "Example Domain"

[[services]]
id = 2
name = "Postgres"
target = "db.internal"
port = 5432
protocol = "tcp"

[[notifiers]]
id = 1
method = "slack"
limits = 3

[notifiers.params]
host = "https://hooks.slack.com/services/T000/B000/XXXX"
"#;

    #[test]
    fn test_missing_config_is_created_with_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/config");

        let config = Config::from_config(Some(&path)).unwrap();

        assert_eq!(config, Config::default());
        assert!(dir.path().join("nested/config.toml").exists());
    }

    #[test]
    fn test_parse_sample() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        config.validate().unwrap();

        assert_eq!(config.database.path, "/var/lib/upkeep/upkeep.db");
        assert_eq!(config.database.pool_size, 8);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.retention.days, 90);

        assert_eq!(config.services.len(), 2);
        assert_eq!(config.services[0].timeout, 30);
        assert_eq!(config.services[0].expected_status, 200);
        assert_eq!(config.services[1].protocol, Protocol::Tcp);
        assert_eq!(config.services[1].address(), "db.internal:5432");

        let slack = &config.notifiers[0];
        assert!(slack.enabled);
        assert_eq!(slack.limits, 3);
        assert_eq!(slack.capacity, 1000);
        assert_eq!(slack.params["host"], "https://hooks.slack.com/services/T000/B000/XXXX");
    }

    #[test]
    fn test_written_config_reads_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let config: Config = toml::from_str(SAMPLE).unwrap();

        config.write_config(&path).unwrap();
        assert_eq!(Config::from_config(Some(&path)).unwrap(), config);
    }

    #[test]
    fn test_invalid_service_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let raw = SAMPLE.replace("https://example.com", "ftp://example.com");
        fs::write(&path, raw).unwrap();

        let err = Config::from_config(Some(&path)).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(ValidationError::InvalidScheme { id: 1, .. })));
    }

    #[test]
    fn test_duplicate_service_ids_are_rejected() {
        let mut config: Config = toml::from_str(SAMPLE).unwrap();
        config.services[1].id = 1;
        assert!(matches!(config.validate(), Err(ConfigError::DuplicateService(1))));
    }

    #[test]
    fn test_display_lists_services() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        let shown = config.to_string();
        assert!(shown.contains("#1 Homepage: https://example.com"));
        assert!(shown.contains("#1 slack: enabled"));
    }
}
