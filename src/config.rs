//! Configuration for flowtrack.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (FLOWTRACK_HOME, FLOWTRACK_DATABASE,
//!    FLOWTRACK_TIME_ZONE, FLOWTRACK_QUERY_TIMEOUT_SECONDS)
//! 2. Config file (.flowtrack/config.yaml)
//! 3. Defaults (~/.flowtrack)
//!
//! Config file discovery:
//! - Searches current directory and parents for .flowtrack/config.yaml
//! - Relative paths in the config file resolve against the project root
//!   (the directory holding `.flowtrack/`)

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono_tz::Tz;
use serde::Deserialize;

use crate::core::QuerySettings;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

const DEFAULT_TIME_ZONE: &str = "Europe/Oslo";
const DEFAULT_TIMEOUT_SECONDS: u64 = 30;
const DEFAULT_PAGE_SIZE: u32 = 20;
const MAX_PAGE_SIZE: u32 = 500;

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub query: QueryConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
    /// Event log database (relative to project root)
    pub database: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryConfig {
    pub time_zone: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub default_page_size: Option<u32>,
    pub max_page_size: Option<u32>,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Absolute path to flowtrack home
    pub home: PathBuf,
    /// Event log database file
    pub database: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub query: QueryDefaults,
}

#[derive(Debug, Clone, Copy)]
pub struct QueryDefaults {
    pub time_zone: Tz,
    pub timeout: Duration,
    pub default_page_size: u32,
    pub max_page_size: u32,
}

impl Default for QueryDefaults {
    fn default() -> Self {
        Self {
            time_zone: chrono_tz::Europe::Oslo,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECONDS),
            default_page_size: DEFAULT_PAGE_SIZE,
            max_page_size: MAX_PAGE_SIZE,
        }
    }
}

impl ResolvedConfig {
    /// Settings handed to the flow service
    pub fn query_settings(&self) -> QuerySettings {
        QuerySettings {
            time_zone: self.query.time_zone,
            timeout: self.query.timeout,
            max_page_size: self.query.max_page_size,
        }
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".flowtrack").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the project root
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}

fn parse_time_zone(name: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|_| anyhow::anyhow!("Unknown time zone '{}'", name))
}

/// Combine a parsed config file with environment overrides
fn resolve(
    default_home: PathBuf,
    file: Option<(PathBuf, ConfigFile)>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<ResolvedConfig> {
    let (config_file, storage, query) = match file {
        Some((path, config)) => (Some(path), config.storage, config.query),
        None => (None, StorageConfig::default(), QueryConfig::default()),
    };

    // Base directory is the parent of .flowtrack/ (i.e., grandparent of config.yaml)
    let base_dir = config_file
        .as_deref()
        .and_then(Path::parent)
        .and_then(Path::parent)
        .unwrap_or(Path::new("."))
        .to_path_buf();

    let home = env("FLOWTRACK_HOME")
        .map(PathBuf::from)
        .unwrap_or(default_home);

    let database = if let Some(env_db) = env("FLOWTRACK_DATABASE") {
        PathBuf::from(env_db)
    } else if let Some(ref db_path) = storage.database {
        resolve_path(&base_dir, db_path)
    } else {
        home.join("events.db")
    };

    let time_zone = match env("FLOWTRACK_TIME_ZONE").or(query.time_zone) {
        Some(name) => parse_time_zone(&name)?,
        None => parse_time_zone(DEFAULT_TIME_ZONE)?,
    };

    let timeout_seconds = match env("FLOWTRACK_QUERY_TIMEOUT_SECONDS") {
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .with_context(|| format!("Invalid FLOWTRACK_QUERY_TIMEOUT_SECONDS: {}", raw))?,
        None => query.timeout_seconds.unwrap_or(DEFAULT_TIMEOUT_SECONDS),
    };
    if timeout_seconds == 0 {
        anyhow::bail!("Query timeout must be at least one second");
    }

    let max_page_size = query.max_page_size.unwrap_or(MAX_PAGE_SIZE);
    let default_page_size = query.default_page_size.unwrap_or(DEFAULT_PAGE_SIZE);
    if max_page_size == 0 || default_page_size == 0 || default_page_size > max_page_size {
        anyhow::bail!(
            "Page sizes must satisfy 1 <= default_page_size ({}) <= max_page_size ({})",
            default_page_size,
            max_page_size
        );
    }

    Ok(ResolvedConfig {
        home,
        database,
        config_file,
        query: QueryDefaults {
            time_zone,
            timeout: Duration::from_secs(timeout_seconds),
            default_page_size,
            max_page_size,
        },
    })
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".flowtrack");

    let file = match find_config_file() {
        Some(path) => {
            let config = load_config_file(&path)?;
            Some((path, config))
        }
        None => None,
    };

    resolve(default_home, file, |name| std::env::var(name).ok())
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| format!("{:#}", e)));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Force reload configuration (useful for testing)
pub fn reload_config() -> Result<ResolvedConfig> {
    load_config()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::TempDir;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_defaults_without_file_or_env() {
        let config = resolve(PathBuf::from("/home/u/.flowtrack"), None, no_env).unwrap();

        assert_eq!(config.home, PathBuf::from("/home/u/.flowtrack"));
        assert_eq!(config.database, PathBuf::from("/home/u/.flowtrack/events.db"));
        assert!(config.config_file.is_none());
        assert_eq!(config.query.time_zone, chrono_tz::Europe::Oslo);
        assert_eq!(config.query.timeout, Duration::from_secs(30));
        assert_eq!(config.query.default_page_size, 20);
        assert_eq!(config.query.max_page_size, 500);
    }

    #[test]
    fn test_config_file_parsing() {
        let temp = TempDir::new().unwrap();
        let flowtrack_dir = temp.path().join(".flowtrack");
        std::fs::create_dir_all(&flowtrack_dir).unwrap();

        let config_path = flowtrack_dir.join("config.yaml");
        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(
            file,
            r#"
version: "1.0"
storage:
  database: data/flow.db
query:
  time_zone: UTC
  timeout_seconds: 5
  max_page_size: 100
"#
        )
        .unwrap();

        let parsed = load_config_file(&config_path).unwrap();
        assert_eq!(parsed.version, "1.0");
        assert_eq!(parsed.storage.database.as_deref(), Some("data/flow.db"));

        let config = resolve(
            PathBuf::from("/unused"),
            Some((config_path.clone(), parsed)),
            no_env,
        )
        .unwrap();
        assert_eq!(config.database, temp.path().join("data/flow.db"));
        assert_eq!(config.config_file, Some(config_path));
        assert_eq!(config.query.time_zone, chrono_tz::UTC);
        assert_eq!(config.query.timeout, Duration::from_secs(5));
        assert_eq!(config.query.max_page_size, 100);
        assert_eq!(config.query.default_page_size, 20);
    }

    #[test]
    fn test_environment_overrides_file() {
        let file = ConfigFile {
            version: "1.0".into(),
            storage: StorageConfig {
                database: Some("from-file.db".into()),
            },
            query: QueryConfig {
                time_zone: Some("UTC".into()),
                timeout_seconds: Some(5),
                ..Default::default()
            },
        };
        let env: HashMap<&str, &str> = [
            ("FLOWTRACK_HOME", "/srv/flowtrack"),
            ("FLOWTRACK_DATABASE", "/srv/db/events.db"),
            ("FLOWTRACK_TIME_ZONE", "America/New_York"),
            ("FLOWTRACK_QUERY_TIMEOUT_SECONDS", "12"),
        ]
        .into_iter()
        .collect();

        let config = resolve(
            PathBuf::from("/unused"),
            Some((PathBuf::from("/project/.flowtrack/config.yaml"), file)),
            |name| env.get(name).map(|v| v.to_string()),
        )
        .unwrap();

        assert_eq!(config.home, PathBuf::from("/srv/flowtrack"));
        assert_eq!(config.database, PathBuf::from("/srv/db/events.db"));
        assert_eq!(config.query.time_zone, chrono_tz::America::New_York);
        assert_eq!(config.query.timeout, Duration::from_secs(12));
    }

    #[test]
    fn test_unknown_time_zone_is_an_error() {
        let err = resolve(PathBuf::from("/h"), None, |name| {
            (name == "FLOWTRACK_TIME_ZONE").then(|| "Mars/Olympus".to_string())
        })
        .unwrap_err();
        assert!(err.to_string().contains("Mars/Olympus"));
    }

    #[test]
    fn test_inconsistent_page_sizes_are_rejected() {
        let file = ConfigFile {
            version: "1.0".into(),
            storage: StorageConfig::default(),
            query: QueryConfig {
                default_page_size: Some(50),
                max_page_size: Some(10),
                ..Default::default()
            },
        };
        assert!(resolve(PathBuf::from("/h"), Some((PathBuf::from("/p/.flowtrack/config.yaml"), file)), no_env).is_err());
    }

    #[test]
    fn test_resolve_relative_path() {
        let base = PathBuf::from("/home/user/project");

        assert_eq!(
            resolve_path(&base, "./subdir"),
            PathBuf::from("/home/user/project/./subdir")
        );
        assert_eq!(
            resolve_path(&base, "/absolute/path"),
            PathBuf::from("/absolute/path")
        );
    }
}
