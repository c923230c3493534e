use std::path::PathBuf;
use std::time::Duration;

use fg_types::{FabricGridError, Result};

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    // Project settings
    pub project_name: String,
    pub version: String,
    pub debug: bool,

    // Paths
    pub base_dir: PathBuf,
    pub data_dir: PathBuf,

    // Service
    pub listen_addr: String,

    // Native tools
    pub docker_bin: String,
    pub artifact_tool: String,

    // Images
    pub peer_image: String,
    pub orderer_image: String,
    pub tools_image: String,

    // Topology defaults
    pub domain: String,
    pub peer_port_base: u16,
    pub orderer_port_base: u16,

    // Timing
    pub ready_timeout: u64,
    pub ready_poll_interval: u64,
    pub command_timeout: u64,

    // Logging
    pub log_level: String,
    pub log_structured: bool,
    pub log_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        let base = PathBuf::from(".");
        Self {
            project_name: "FabricGrid".to_string(),
            version: "0.1.0-alpha".to_string(),
            debug: false,
            data_dir: base.join("data"),
            base_dir: base,
            listen_addr: "127.0.0.1:7700".to_string(),
            docker_bin: "docker".to_string(),
            artifact_tool: "fabricgrid-artifacts".to_string(),
            peer_image: "hyperledger/fabric-peer:2.5".to_string(),
            orderer_image: "hyperledger/fabric-orderer:2.5".to_string(),
            tools_image: "hyperledger/fabric-tools:2.5".to_string(),
            domain: "example.com".to_string(),
            peer_port_base: 7051,
            orderer_port_base: 7050,
            ready_timeout: 120,
            ready_poll_interval: 2000,
            command_timeout: 120,
            log_level: "info".to_string(),
            log_structured: false,
            log_file: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables (with dotenvy).
    pub fn load() -> Result<Self> {
        // Load .env file if it exists (ignore errors, the file may not exist)
        let _ = dotenvy::dotenv();

        let defaults = Config::default();

        let base_dir = env_or("FG_BASE_DIR", || {
            std::env::current_dir()
                .unwrap_or_default()
                .to_string_lossy()
                .to_string()
        });
        let base = PathBuf::from(&base_dir);

        let config = Config {
            project_name: env_or("FG_PROJECT_NAME", || defaults.project_name.clone()),
            version: env_or("FG_VERSION", || defaults.version.clone()),
            debug: env_bool("FG_DEBUG", false),

            data_dir: env_path_or("FG_DATA_DIR", || base.join("data")),
            base_dir: base,

            listen_addr: env_or("FG_LISTEN_ADDR", || defaults.listen_addr.clone()),

            docker_bin: env_or("FG_DOCKER_BIN", || defaults.docker_bin.clone()),
            artifact_tool: env_or("FG_ARTIFACT_TOOL", || defaults.artifact_tool.clone()),

            peer_image: env_or("FG_PEER_IMAGE", || defaults.peer_image.clone()),
            orderer_image: env_or("FG_ORDERER_IMAGE", || defaults.orderer_image.clone()),
            tools_image: env_or("FG_TOOLS_IMAGE", || defaults.tools_image.clone()),

            domain: env_or("FG_DOMAIN", || defaults.domain.clone()),
            peer_port_base: env_u16("FG_PEER_PORT_BASE", defaults.peer_port_base),
            orderer_port_base: env_u16("FG_ORDERER_PORT_BASE", defaults.orderer_port_base),

            ready_timeout: env_u64("FG_READY_TIMEOUT", defaults.ready_timeout),
            ready_poll_interval: env_u64("FG_READY_POLL_INTERVAL", defaults.ready_poll_interval),
            command_timeout: env_u64("FG_COMMAND_TIMEOUT", defaults.command_timeout),

            log_level: env_or("FG_LOG_LEVEL", || defaults.log_level.clone()),
            log_structured: env_bool("FG_LOG_STRUCTURED", false),
            log_file: env_opt("FG_LOG_FILE").map(PathBuf::from),
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the service unusable.
    pub fn validate(&self) -> Result<()> {
        if self.ready_poll_interval == 0 {
            return Err(FabricGridError::InvalidConfig(
                "FG_READY_POLL_INTERVAL must be greater than zero".to_string(),
            ));
        }
        if self.domain.trim().is_empty() {
            return Err(FabricGridError::InvalidConfig(
                "FG_DOMAIN must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Create required directories.
    pub fn create_directories(&self) -> Result<()> {
        let dirs = [self.data_dir.clone(), self.networks_dir()];

        for dir in &dirs {
            std::fs::create_dir_all(dir).map_err(|e| {
                FabricGridError::InvalidConfig(format!(
                    "Failed to create directory {}: {e}",
                    dir.display()
                ))
            })?;
        }

        Ok(())
    }

    /// Root under which each network's artifacts directory is created.
    pub fn networks_dir(&self) -> PathBuf {
        self.data_dir.join("networks")
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout)
    }

    pub fn ready_poll_interval(&self) -> Duration {
        Duration::from_millis(self.ready_poll_interval)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout)
    }
}

// ---------------------------------------------------------------------------
// Env helpers
// ---------------------------------------------------------------------------

fn env_or(key: &str, default: impl FnOnce() -> String) -> String {
    std::env::var(key).unwrap_or_else(|_| default())
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.is_empty())
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(default)
}

fn env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_path_or(key: &str, default: impl FnOnce() -> PathBuf) -> PathBuf {
    std::env::var(key)
        .ok()
        .map(PathBuf::from)
        .unwrap_or_else(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_load_defaults() {
        let cfg = Config::load().unwrap();
        assert_eq!(cfg.project_name, "FabricGrid");
        assert_eq!(cfg.docker_bin, "docker");
        assert_eq!(cfg.peer_port_base, 7051);
        assert_eq!(cfg.orderer_port_base, 7050);
        assert_eq!(cfg.ready_timeout, 120);
    }

    #[test]
    fn config_env_override() {
        // Use a unique env var unlikely to collide
        std::env::set_var("FG_COMMAND_TIMEOUT", "999");
        let cfg = Config::load().unwrap();
        assert_eq!(cfg.command_timeout, 999);
        assert_eq!(cfg.command_timeout(), Duration::from_secs(999));
        std::env::remove_var("FG_COMMAND_TIMEOUT");
    }

    #[test]
    fn config_env_invalid_number_falls_back() {
        std::env::set_var("FG_ORDERER_PORT_BASE", "not-a-port");
        let cfg = Config::load().unwrap();
        assert_eq!(cfg.orderer_port_base, 7050);
        std::env::remove_var("FG_ORDERER_PORT_BASE");
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let cfg = Config {
            ready_poll_interval: 0,
            ..Config::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn config_create_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let base = tmp.path().to_path_buf();

        let cfg = Config {
            base_dir: base.clone(),
            data_dir: base.join("data"),
            ..Config::default()
        };

        cfg.create_directories().unwrap();

        assert!(base.join("data").exists());
        assert!(base.join("data/networks").exists());
    }
}
