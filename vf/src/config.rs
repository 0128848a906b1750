//! vendfleet configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main vendfleet configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Sockets and ports
    pub network: NetworkConfig,

    /// Query lifecycle
    pub query: QueryConfig,

    /// Node attach handshake
    pub attach: AttachConfig,

    /// Product catalogue files
    pub catalog: CatalogConfig,

    /// Vending alert thresholds
    pub alerts: AlertConfig,

    /// Log level (trace, debug, info, warn, error)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Project-local config: vendfleet.yml
        let local_config = PathBuf::from("vendfleet.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // User config: ~/.config/vendfleet/vendfleet.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("vendfleet").join("vendfleet.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Read only the log level, before logging is set up
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        let path = match config_path {
            Some(path) => path.clone(),
            None => {
                let local = PathBuf::from("vendfleet.yml");
                if local.exists() {
                    local
                } else {
                    dirs::config_dir()?.join("vendfleet").join("vendfleet.yml")
                }
            }
        };
        let content = fs::read_to_string(path).ok()?;
        let config: Self = serde_yaml::from_str(&content).ok()?;
        config.log_level
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Sockets and ports
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address nodes listen on and announce to their parent
    pub host: String,

    /// Node `n` listens on `base-port + n`
    #[serde(rename = "base-port")]
    pub base_port: u16,

    /// Name-service port of the manager
    #[serde(rename = "registry-port")]
    pub registry_port: u16,

    /// Largest datagram accepted or sent
    #[serde(rename = "max-frame-size")]
    pub max_frame_size: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            base_port: 6000,
            registry_port: 1099,
            max_frame_size: 8192,
        }
    }
}

impl NetworkConfig {
    /// `host:registry-port`
    pub fn registry_address(&self) -> String {
        format!("{}:{}", self.host, self.registry_port)
    }
}

/// Query lifecycle
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Time a query waits for replies before completing with partial data
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self { timeout_ms: 15_000 }
    }
}

impl QueryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Node attach handshake
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AttachConfig {
    /// Bound on each wait for the parent during attach
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,
}

impl Default for AttachConfig {
    fn default() -> Self {
        Self { timeout_ms: 5_000 }
    }
}

impl AttachConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Product catalogue files
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Directory holding `distributor_<id>.csv` files
    pub dir: PathBuf,

    /// Fallback catalogue, also used by the manager for product names
    #[serde(rename = "default-file")]
    pub default_file: String,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("."),
            default_file: "default_products_list.csv".to_string(),
        }
    }
}

impl CatalogConfig {
    pub fn default_path(&self) -> PathBuf {
        self.dir.join(&self.default_file)
    }
}

/// Vending alert thresholds
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// A product with fewer units raises a stock alert
    #[serde(rename = "stock-min")]
    pub stock_min: u32,

    /// More money than this (in cents) raises a money alert
    #[serde(rename = "money-max-cents")]
    pub money_max_cents: u64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            stock_min: 2,
            money_max_cents: 5_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.network.base_port, 6000);
        assert_eq!(config.network.registry_port, 1099);
        assert_eq!(config.network.max_frame_size, 8192);
        assert_eq!(config.query.timeout(), Duration::from_secs(15));
        assert_eq!(config.alerts.stock_min, 2);
        assert_eq!(config.alerts.money_max_cents, 5_000);
        assert!(config.log_level.is_none());
    }

    #[test]
    fn test_deserialize_config() {
        let yaml = r#"
network:
  host: 10.0.0.5
  base-port: 7000
  registry-port: 2099

query:
  timeout-ms: 500

catalog:
  dir: /srv/catalog
  default-file: products.csv

alerts:
  stock-min: 5

log-level: debug
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.network.host, "10.0.0.5");
        assert_eq!(config.network.base_port, 7000);
        assert_eq!(config.network.max_frame_size, 8192);
        assert_eq!(config.network.registry_address(), "10.0.0.5:2099");
        assert_eq!(config.query.timeout_ms, 500);
        assert_eq!(config.attach.timeout_ms, 5_000);
        assert_eq!(config.catalog.default_path(), PathBuf::from("/srv/catalog/products.csv"));
        assert_eq!(config.alerts.stock_min, 5);
        assert_eq!(config.alerts.money_max_cents, 5_000);
        assert_eq!(config.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_load_explicit_path() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("fleet.yml");
        fs::write(&path, "query:\n  timeout-ms: 250\nlog-level: warn\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.query.timeout_ms, 250);
        assert_eq!(Config::load_log_level(Some(&path)).as_deref(), Some("warn"));
    }

    #[test]
    fn test_load_missing_explicit_path_fails() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("missing.yml");
        assert!(Config::load(Some(&path)).is_err());
        assert!(Config::load_log_level(Some(&path)).is_none());
    }
}
