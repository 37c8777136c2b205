use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::Result;

/// Top-level configuration for the Stratus service.
///
/// Loaded from a TOML file; every section falls back to defaults so a
/// partial (or absent) file is always usable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StratusConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub expiry: ExpiryConfig,
}

impl StratusConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: StratusConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// HTTP query service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address for the query API.
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:9090".to_string(),
        }
    }
}

/// Backing-store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite database path; ":memory:" opens a private in-memory store.
    pub path: String,
    /// Number of pooled connections. Every repository call borrows one and
    /// blocks while the pool is exhausted.
    pub max_connections: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "stratus.db".to_string(),
            max_connections: 8,
        }
    }
}

/// Write-driven expiry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpiryConfig {
    /// Minimum seconds between sweep evaluations per customer.
    pub interval_secs: i64,
    /// Age in seconds, relative to the triggering write's timestamp, beyond
    /// which a row is considered stale.
    pub threshold_secs: i64,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            threshold_secs: 120,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = StratusConfig::default();
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.server.listen, "127.0.0.1:9090");
        assert_eq!(config.database.path, "stratus.db");
        assert_eq!(config.database.max_connections, 8);
        assert_eq!(config.expiry.interval_secs, 60);
        assert_eq!(config.expiry.threshold_secs, 120);
    }

    #[test]
    fn test_load_valid_config() {
        let content = r#"
[general]
log_level = "debug"

[server]
listen = "0.0.0.0:8080"

[database]
path = "/var/lib/stratus/inventory.db"
max_connections = 16

[expiry]
interval_secs = 300
threshold_secs = 900
"#;
        let file = create_temp_config(content);
        let config = StratusConfig::load(file.path()).unwrap();
        assert_eq!(config.general.log_level, "debug");
        assert_eq!(config.server.listen, "0.0.0.0:8080");
        assert_eq!(config.database.path, "/var/lib/stratus/inventory.db");
        assert_eq!(config.database.max_connections, 16);
        assert_eq!(config.expiry.interval_secs, 300);
        assert_eq!(config.expiry.threshold_secs, 900);
    }

    #[test]
    fn test_load_partial_config_uses_defaults() {
        let content = r#"
[expiry]
interval_secs = 30
"#;
        let file = create_temp_config(content);
        let config = StratusConfig::load(file.path()).unwrap();
        assert_eq!(config.expiry.interval_secs, 30);
        // Remaining fields use defaults.
        assert_eq!(config.expiry.threshold_secs, 120);
        assert_eq!(config.database.max_connections, 8);
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = StratusConfig::load_or_default(Path::new("/nonexistent/stratus.toml"));
        assert_eq!(config.server.listen, "127.0.0.1:9090");
    }

    #[test]
    fn test_load_invalid_toml() {
        let content = "this is {{ not valid TOML";
        let file = create_temp_config(content);
        assert!(StratusConfig::load(file.path()).is_err());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("stratus.toml");

        let mut config = StratusConfig::default();
        config.expiry.interval_secs = 90;
        config.save(&path).unwrap();

        let reloaded = StratusConfig::load(&path).unwrap();
        assert_eq!(reloaded.expiry.interval_secs, 90);
        assert_eq!(reloaded.database.path, config.database.path);
    }
}
