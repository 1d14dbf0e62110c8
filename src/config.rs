use serde::Deserialize;
use std::path::PathBuf;

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the remote reconciliation service
    pub remote_url: Option<String>,
    /// Bearer key sent with remote calls
    pub api_key: Option<String>,
    /// Directory holding the durable store
    pub data_dir: PathBuf,
    /// Path to the sqlite database; defaults to `<data_dir>/wardsync.db`
    pub database_path: Option<PathBuf>,
    /// Timeout for live forwarded requests, in seconds
    pub live_timeout_secs: u64,
    /// Timeout for a batch reconciliation call, in seconds
    pub batch_timeout_secs: u64,
    /// Maximum mutations per batch; 0 sends all eligible items in one batch
    pub batch_size: usize,
    /// Interval between periodic drain triggers, in seconds
    pub sync_interval_secs: u64,
    /// Interval between reachability probes, in seconds
    pub probe_interval_secs: u64,
    /// Base delay for retry backoff, in seconds
    pub backoff_base_secs: u64,
    /// Ceiling for retry backoff, in seconds
    pub backoff_cap_secs: u64,
    /// Attempts before a record is parked as permanently failed
    pub max_attempts: u32,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("wardsync");
        Self {
            remote_url: None,
            api_key: None,
            data_dir,
            database_path: None,
            live_timeout_secs: 10,
            batch_timeout_secs: 30,
            batch_size: 0,
            sync_interval_secs: 45,
            probe_interval_secs: 15,
            backoff_base_secs: 10,
            backoff_cap_secs: 300,
            max_attempts: 8,
        }
    }
}

impl Config {
    /// Load configuration with priority: env vars > config file > defaults
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        let path = config_path.unwrap_or_else(Self::default_config_path);
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadError(path.clone(), e))?;
            config = serde_yaml::from_str(&contents)
                .map_err(|e| ConfigError::ParseError(path.clone(), e))?;
        }

        // Apply environment variable overrides
        if let Ok(url) = std::env::var("WARDSYNC_REMOTE_URL") {
            config.remote_url = Some(url);
        }
        if let Ok(key) = std::env::var("WARDSYNC_API_KEY") {
            config.api_key = Some(key);
        }
        if let Ok(dir) = std::env::var("WARDSYNC_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Ok(db) = std::env::var("WARDSYNC_DATABASE_PATH") {
            config.database_path = Some(PathBuf::from(db));
        }

        Ok(config)
    }

    /// Default config file path: ~/.config/wardsync/config.yaml
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("wardsync")
            .join("config.yaml")
    }

    /// Effective database path
    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("wardsync.db"))
    }

    /// Whether a remote endpoint is configured
    pub fn is_configured(&self) -> bool {
        self.remote_url.is_some()
    }
}

#[derive(Debug)]
pub enum ConfigError {
    ReadError(PathBuf, std::io::Error),
    ParseError(PathBuf, serde_yaml::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ReadError(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.remote_url.is_none());
        assert_eq!(config.batch_size, 0);
        assert_eq!(config.max_attempts, 8);
        assert!(config
            .database_path()
            .to_string_lossy()
            .contains("wardsync.db"));
        assert!(!config.is_configured());
    }

    #[test]
    fn test_load_no_file_uses_defaults() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("nonexistent.yaml");

        let config = Config::load(Some(config_path)).unwrap();
        assert_eq!(config.sync_interval_secs, 45);
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "remote_url: \"http://sync.hospital.local:8080\"").unwrap();
        writeln!(file, "batch_size: 25").unwrap();
        writeln!(file, "max_attempts: 3").unwrap();

        let config = Config::load(Some(config_path)).unwrap();
        assert_eq!(
            config.remote_url.as_deref(),
            Some("http://sync.hospital.local:8080")
        );
        assert_eq!(config.batch_size, 25);
        assert_eq!(config.max_attempts, 3);
        // Unset fields keep their defaults.
        assert_eq!(config.live_timeout_secs, 10);
        assert!(config.is_configured());
    }

    #[test]
    fn test_env_var_overrides_file() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "remote_url: \"http://from-file:1\"").unwrap();

        std::env::set_var("WARDSYNC_REMOTE_URL", "http://from-env:2");

        let config = Config::load(Some(config_path)).unwrap();
        assert_eq!(config.remote_url.as_deref(), Some("http://from-env:2"));

        std::env::remove_var("WARDSYNC_REMOTE_URL");
    }

    #[test]
    fn test_explicit_database_path_wins() {
        let mut config = Config::default();
        config.database_path = Some(PathBuf::from("/tmp/elsewhere.db"));
        assert_eq!(config.database_path(), PathBuf::from("/tmp/elsewhere.db"));
    }
}
