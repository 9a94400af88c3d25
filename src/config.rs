//! Service configuration.
//!
//! Settings come from the environment (with `.env` support), or from a
//! TOML file when one is passed on the command line. Database parameters
//! are required; everything else has defaults matching the production
//! deployment.

use std::env;
use std::path::Path;

use serde::Deserialize;

use crate::model::DEFAULT_LOOKBACK_DAYS;

const DEFAULT_DIRECTORY_URL: &str = "https://www.meteo.co.me/Hidrologija/aws_h.php";
const DEFAULT_GRAPH_URL: &str = "https://www.meteo.co.me/Hidrologija/aws-graph-h.php";

const DEFAULT_INTERVAL_MINUTES: u64 = 15;
const DEFAULT_POLL_SECONDS: u64 = 60;

// ---------------------------------------------------------------------------
// Config types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub scrape: ScrapeConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub dbname: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Minutes between cycle starts (start-to-start, not end-to-start).
    pub interval_minutes: u64,
    /// Seconds between pending/shutdown checks while idle.
    pub poll_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScrapeConfig {
    /// Directory page listing all stations.
    pub directory_url: String,
    /// Base URL of the per-station graph page.
    pub graph_url: String,
    /// Days of history requested from the graph page.
    pub lookback_days: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            interval_minutes: DEFAULT_INTERVAL_MINUTES,
            poll_seconds: DEFAULT_POLL_SECONDS,
        }
    }
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        ScrapeConfig {
            directory_url: DEFAULT_DIRECTORY_URL.to_string(),
            graph_url: DEFAULT_GRAPH_URL.to_string(),
            lookback_days: DEFAULT_LOOKBACK_DAYS,
        }
    }
}

impl DatabaseConfig {
    /// Connection string in the key/value format the driver expects.
    pub fn connection_string(&self) -> String {
        format!(
            "host={} port={} user={} password={} dbname={}",
            self.host, self.port, self.user, self.password, self.dbname
        )
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl Config {
    /// Loads from a TOML file when a path is given, from the environment
    /// otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => Self::from_env(),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }

    /// Reads `POSTGRES_*` and `SCHEDULER_INTERVAL_MINUTES` from the
    /// environment. Database variables are required.
    pub fn from_env() -> Result<Self, ConfigError> {
        let database = DatabaseConfig {
            host: require_env("POSTGRES_HOST")?,
            port: parse_env("POSTGRES_PORT")?,
            user: require_env("POSTGRES_USER")?,
            password: require_env("POSTGRES_PASSWORD")?,
            dbname: require_env("POSTGRES_DB")?,
        };

        let mut scheduler = SchedulerConfig::default();
        if env::var("SCHEDULER_INTERVAL_MINUTES").is_ok() {
            scheduler.interval_minutes = parse_env("SCHEDULER_INTERVAL_MINUTES")?;
        }

        Ok(Config {
            database,
            scheduler,
            scrape: ScrapeConfig::default(),
        })
    }
}

fn require_env(name: &'static str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::MissingVar(name))
}

fn parse_env<T: std::str::FromStr>(name: &'static str) -> Result<T, ConfigError> {
    require_env(name)?
        .parse()
        .map_err(|_| ConfigError::InvalidVar(name))
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum ConfigError {
    MissingVar(&'static str),
    InvalidVar(&'static str),
    Io(std::io::Error),
    Parse(toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::MissingVar(name) => {
                write!(f, "Missing environment variable: {}", name)
            }
            ConfigError::InvalidVar(name) => {
                write!(f, "Invalid value for environment variable: {}", name)
            }
            ConfigError::Io(err) => write!(f, "Config file error: {}", err),
            ConfigError::Parse(err) => write!(f, "Config parse error: {}", err),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::Parse(err)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toml_file_fills_unspecified_sections_with_defaults() {
        let raw = concat!(
            "[database]\n",
            "host = \"localhost\"\n",
            "port = 5432\n",
            "user = \"hydromon\"\n",
            "password = \"secret\"\n",
            "dbname = \"hydromon_db\"\n",
        );
        let config: Config = toml::from_str(raw).expect("minimal config parses");
        assert_eq!(config.scheduler.interval_minutes, 15);
        assert_eq!(config.scheduler.poll_seconds, 60);
        assert_eq!(config.scrape.lookback_days, 14);
        assert!(config.scrape.directory_url.contains("aws_h.php"));
    }

    #[test]
    fn test_toml_file_overrides_scheduler_and_scrape() {
        let raw = concat!(
            "[database]\n",
            "host = \"localhost\"\n",
            "port = 5432\n",
            "user = \"u\"\n",
            "password = \"p\"\n",
            "dbname = \"d\"\n",
            "\n",
            "[scheduler]\n",
            "interval_minutes = 1\n",
            "\n",
            "[scrape]\n",
            "lookback_days = 3\n",
        );
        let config: Config = toml::from_str(raw).expect("config parses");
        assert_eq!(config.scheduler.interval_minutes, 1);
        // Unset keys inside a present section still default.
        assert_eq!(config.scheduler.poll_seconds, 60);
        assert_eq!(config.scrape.lookback_days, 3);
    }

    #[test]
    fn test_connection_string_format() {
        let db = DatabaseConfig {
            host: "db.internal".into(),
            port: 5433,
            user: "hydromon".into(),
            password: "pw".into(),
            dbname: "hydromon_db".into(),
        };
        assert_eq!(
            db.connection_string(),
            "host=db.internal port=5433 user=hydromon password=pw dbname=hydromon_db"
        );
    }
}
