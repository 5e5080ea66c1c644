//! Configuration system for comm-check
//!
//! Supports multiple configuration sources with the following precedence
//! (highest to lowest):
//! 1. CLI arguments
//! 2. Environment variables (COMMCHECK_* prefix, plus the NCCL-compatible
//!    names MASTER_ADDR, MASTER_PORT, NCCL_SOCKET_IFNAME, NCCL_TIMEOUT,
//!    NCCL_DEBUG, NCCL_IB_DISABLE, NCCL_P2P_DISABLE)
//! 3. Configuration file (TOML)
//! 4. Default values
//!
//! NCCL-style knobs usually live as ambient process state; here they land in
//! an explicit config struct, and the communication layer is handed that
//! struct, never the environment.

use std::fs;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Fixed size of the communication group: rank 0 and rank 1.
pub const WORLD_SIZE: u32 = 2;

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckConfig {
    /// Two-node cluster identity
    pub cluster: ClusterSettings,

    /// Communication timeouts and transport knobs
    pub comm: CommSettings,

    /// GPU probe settings
    pub gpu: GpuSettings,

    /// Logging configuration
    pub logging: LoggingSettings,
}

/// Two-node cluster identity settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterSettings {
    /// Address the rank-0 node listens on for the rendezvous
    pub master_addr: String,

    /// Rendezvous port on the master node
    pub master_port: u16,

    /// IP address that identifies the rank-0 node
    pub node0_ip: String,

    /// IP address that identifies the rank-1 node
    pub node1_ip: String,

    /// Network interface the cluster traffic is expected on
    pub interface: String,

    /// Subnet prefix used to pick the local IP when a host has several
    pub subnet_prefix: String,
}

/// Communication settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommSettings {
    /// Process group initialization timeout in milliseconds
    pub init_timeout_ms: u64,

    /// Per-operation timeout in milliseconds
    pub op_timeout_ms: u64,

    /// Pause between orchestrated tests in milliseconds
    pub settle_delay_ms: u64,

    /// InfiniBand transport allowed (informational; logged at init)
    pub ib_enabled: bool,

    /// Peer-to-peer transport allowed (informational; logged at init)
    pub p2p_enabled: bool,
}

/// GPU probe settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GpuSettings {
    /// Probe for GPUs during checks
    pub enable: bool,

    /// Fail the run when no usable GPU is found
    pub require: bool,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level: trace, debug, info, warn, error
    pub level: String,

    /// Log file path (empty = no file logging)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    /// Number of rotated log files to keep
    pub max_files: u32,

    /// Enable JSON formatted logging
    pub json_format: bool,
}

// Default implementations

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            cluster: ClusterSettings::default(),
            comm: CommSettings::default(),
            gpu: GpuSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            master_addr: "192.168.100.10".to_string(),
            master_port: 12355,
            node0_ip: "192.168.100.10".to_string(),
            node1_ip: "192.168.100.11".to_string(),
            interface: "enp1s0f0np0".to_string(),
            subnet_prefix: "192.168.100.".to_string(),
        }
    }
}

impl Default for CommSettings {
    fn default() -> Self {
        Self {
            // 5 minutes to form the group, matching the usual NCCL
            // init_process_group timeout. NCCL_TIMEOUT is in milliseconds.
            init_timeout_ms: 300_000,
            op_timeout_ms: 30_000,
            settle_delay_ms: 2_000,
            ib_enabled: true,
            p2p_enabled: true,
        }
    }
}

impl Default for GpuSettings {
    fn default() -> Self {
        Self {
            enable: true,
            require: false,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            max_files: 5,
            json_format: false,
        }
    }
}

impl CheckConfig {
    /// Load configuration from file with environment variable overrides
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut config = Self::default();

        // 1. Load from config file if it exists
        let config_file = Self::find_config_file(config_path)?;
        if let Some(path) = config_file {
            debug!(path = %path.display(), "Loading configuration file");
            let content = fs::read_to_string(&path)
                .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;
            config = toml::from_str(&content).map_err(|e| Error::ConfigParse {
                message: e.to_string(),
            })?;
            info!(path = %path.display(), "Configuration loaded from file");
        }

        // 2. Apply environment variable overrides
        config.apply_env_overrides();

        // 3. Expand paths
        config.expand_paths();

        // 4. Validate
        config.validate()?;

        Ok(config)
    }

    /// Find the configuration file to use
    fn find_config_file(explicit_path: Option<&str>) -> Result<Option<PathBuf>> {
        // If explicit path provided, use it (error if not found)
        if let Some(path) = explicit_path {
            let expanded = shellexpand::tilde(path);
            let path = PathBuf::from(expanded.as_ref());
            if path.exists() {
                return Ok(Some(path));
            } else {
                return Err(Error::ConfigNotFound { path });
            }
        }

        // Search in standard locations
        let search_paths = [
            // Current directory
            PathBuf::from("comm-check.toml"),
            // User config directory
            dirs::config_dir()
                .map(|p| p.join("comm-check").join("config.toml"))
                .unwrap_or_default(),
            // Home directory
            dirs::home_dir()
                .map(|p| p.join(".comm-check.toml"))
                .unwrap_or_default(),
            // System config (Linux)
            PathBuf::from("/etc/comm-check/config.toml"),
        ];

        for path in &search_paths {
            if path.exists() {
                debug!(path = %path.display(), "Found configuration file");
                return Ok(Some(path.clone()));
            }
        }

        debug!("No configuration file found, using defaults");
        Ok(None)
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        // Cluster settings: COMMCHECK_* first, NCCL-compatible names second
        // so an existing NCCL-style launch environment keeps working.
        if let Ok(val) = std::env::var("COMMCHECK_MASTER_ADDR") {
            self.cluster.master_addr = val;
        } else if let Ok(val) = std::env::var("MASTER_ADDR") {
            self.cluster.master_addr = val;
        }

        if let Ok(val) = env_parse("COMMCHECK_MASTER_PORT") {
            self.cluster.master_port = val;
        } else if let Ok(val) = env_parse("MASTER_PORT") {
            self.cluster.master_port = val;
        }

        if let Ok(val) = std::env::var("COMMCHECK_INTERFACE") {
            self.cluster.interface = val;
        } else if let Ok(val) = std::env::var("NCCL_SOCKET_IFNAME") {
            self.cluster.interface = val;
        }

        if let Ok(val) = std::env::var("COMMCHECK_NODE0_IP") {
            self.cluster.node0_ip = val;
        }
        if let Ok(val) = std::env::var("COMMCHECK_NODE1_IP") {
            self.cluster.node1_ip = val;
        }
        if let Ok(val) = std::env::var("COMMCHECK_SUBNET_PREFIX") {
            self.cluster.subnet_prefix = val;
        }

        // Comm settings
        if let Ok(val) = env_parse("COMMCHECK_INIT_TIMEOUT_MS") {
            self.comm.init_timeout_ms = val;
        }
        if let Ok(val) = env_parse("COMMCHECK_OP_TIMEOUT_MS") {
            self.comm.op_timeout_ms = val;
        } else if let Ok(val) = env_parse("NCCL_TIMEOUT") {
            // NCCL_TIMEOUT is in milliseconds
            self.comm.op_timeout_ms = val;
        }
        if let Ok(val) = env_parse("COMMCHECK_SETTLE_DELAY_MS") {
            self.comm.settle_delay_ms = val;
        }
        if let Ok(val) = std::env::var("NCCL_IB_DISABLE") {
            self.comm.ib_enabled = val != "1";
        }
        if let Ok(val) = std::env::var("NCCL_P2P_DISABLE") {
            self.comm.p2p_enabled = val != "1";
        }

        // GPU settings
        if let Ok(val) = std::env::var("COMMCHECK_GPU_ENABLE") {
            self.gpu.enable = val.to_lowercase() == "true" || val == "1";
        }
        if let Ok(val) = std::env::var("COMMCHECK_GPU_REQUIRE") {
            self.gpu.require = val.to_lowercase() == "true" || val == "1";
        }

        // Logging settings. NCCL_DEBUG=INFO enables info-level debug output
        // in NCCL; NCCL_DEBUG_SUBSYS widens it, which maps to trace here.
        if let Ok(val) = std::env::var("COMMCHECK_LOG_LEVEL") {
            self.logging.level = val;
        } else if let Ok(val) = std::env::var("NCCL_DEBUG") {
            self.logging.level = match val.to_uppercase().as_str() {
                "TRACE" => "trace".to_string(),
                "INFO" if std::env::var("NCCL_DEBUG_SUBSYS").is_ok() => "trace".to_string(),
                "INFO" => "debug".to_string(),
                "WARN" => "warn".to_string(),
                _ => self.logging.level.clone(),
            };
        }
        if let Ok(val) = std::env::var("COMMCHECK_LOG_FILE") {
            self.logging.file = Some(val);
        }
        if let Ok(val) = std::env::var("COMMCHECK_LOG_JSON") {
            self.logging.json_format = val.to_lowercase() == "true" || val == "1";
        }
    }

    /// Expand ~ and other path variables
    fn expand_paths(&mut self) {
        if let Some(ref file) = self.logging.file {
            self.logging.file = Some(expand_path(file));
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.cluster.master_port == 0 {
            return Err(Error::Config(
                "cluster.master_port must be non-zero".to_string(),
            ));
        }

        for (field, value) in [
            ("cluster.master_addr", &self.cluster.master_addr),
            ("cluster.node0_ip", &self.cluster.node0_ip),
            ("cluster.node1_ip", &self.cluster.node1_ip),
        ] {
            if value.parse::<Ipv4Addr>().is_err() {
                return Err(Error::Config(format!(
                    "{} is not a valid IPv4 address: '{}'",
                    field, value
                )));
            }
        }

        if self.cluster.node0_ip == self.cluster.node1_ip {
            return Err(Error::Config(
                "cluster.node0_ip and cluster.node1_ip must differ".to_string(),
            ));
        }

        if self.cluster.interface.is_empty() {
            return Err(Error::Config(
                "cluster.interface cannot be empty".to_string(),
            ));
        }

        if self.comm.init_timeout_ms == 0 || self.comm.op_timeout_ms == 0 {
            return Err(Error::Config(
                "comm timeouts must be greater than zero".to_string(),
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(Error::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            )));
        }

        Ok(())
    }

    /// Rendezvous address of the rank-0 node
    pub fn master_socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.cluster.master_addr, self.cluster.master_port)
            .parse()
            .map_err(|e| Error::Config(format!("Invalid master address: {}", e)))
    }

    /// Process group initialization timeout
    pub fn init_timeout(&self) -> Duration {
        Duration::from_millis(self.comm.init_timeout_ms)
    }

    /// Per-operation timeout
    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.comm.op_timeout_ms)
    }

    /// Pause between orchestrated tests
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.comm.settle_delay_ms)
    }
}

/// Parse an environment variable, treating unset and unparseable the same
fn env_parse<T: std::str::FromStr>(name: &str) -> std::result::Result<T, ()> {
    std::env::var(name)
        .map_err(|_| ())
        .and_then(|v| v.parse().map_err(|_| ()))
}

/// Expand ~ and environment variables in paths
fn expand_path(path: &str) -> String {
    shellexpand::full(path)
        .unwrap_or_else(|_| std::borrow::Cow::Borrowed(path))
        .into_owned()
}

/// Initialize a new configuration file
pub fn init_config(path: Option<&str>, force: bool) -> Result<()> {
    let config_path = path
        .map(|p| PathBuf::from(expand_path(p)))
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".comm-check.toml")
        });

    // Check if file exists
    if config_path.exists() && !force {
        return Err(Error::Config(format!(
            "Configuration file already exists: {}. Use --force to overwrite.",
            config_path.display()
        )));
    }

    // Create parent directories
    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| Error::Config(format!("Failed to create config directory: {}", e)))?;
    }

    let config_content = generate_default_config();

    fs::write(&config_path, config_content).map_err(|e| Error::IoWrite {
        path: config_path.clone(),
        source: e,
    })?;

    println!("Configuration file created: {}", config_path.display());
    Ok(())
}

/// Generate default configuration content with comments
fn generate_default_config() -> String {
    r#"# comm-check configuration
# Two-node collective communication smoke tester

[cluster]
# Address the rank-0 node listens on for the rendezvous
master_addr = "192.168.100.10"

# Rendezvous port on the master node (non-default to avoid conflicts)
master_port = 12355

# IP addresses identifying the two nodes
node0_ip = "192.168.100.10"
node1_ip = "192.168.100.11"

# Network interface the cluster traffic is expected on
interface = "enp1s0f0np0"

# Subnet prefix used to pick the local IP when a host has several
subnet_prefix = "192.168.100."

[comm]
# Process group initialization timeout in milliseconds
init_timeout_ms = 300000

# Per-operation timeout in milliseconds
op_timeout_ms = 30000

# Pause between orchestrated tests in milliseconds
settle_delay_ms = 2000

# Transport knobs (informational; logged at init)
ib_enabled = true
p2p_enabled = true

[gpu]
# Probe for GPUs during checks
enable = true

# Fail the run when no usable GPU is found
require = false

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log file path (comment out to disable file logging)
# file = "~/.comm-check/logs/comm-check.log"

# Number of rotated log files to keep
max_files = 5

# Enable JSON formatted logging
json_format = false
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Env-override tests mutate process environment; serialize them.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_default_config() {
        let config = CheckConfig::default();
        assert_eq!(config.cluster.master_addr, "192.168.100.10");
        assert_eq!(config.cluster.master_port, 12355);
        assert_eq!(config.cluster.node0_ip, "192.168.100.10");
        assert_eq!(config.cluster.node1_ip, "192.168.100.11");
        assert_eq!(config.cluster.interface, "enp1s0f0np0");
        assert_eq!(config.comm.init_timeout_ms, 300_000);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(CheckConfig::default().validate().is_ok());
    }

    #[test]
    fn test_master_socket_addr() {
        let config = CheckConfig::default();
        let addr = config.master_socket_addr().unwrap();
        assert_eq!(addr.to_string(), "192.168.100.10:12355");
    }

    #[test]
    fn test_env_override_nccl_names() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::set_var("NCCL_SOCKET_IFNAME", "eth3");
        env::set_var("MASTER_ADDR", "10.0.0.1");
        env::set_var("MASTER_PORT", "23456");
        env::set_var("NCCL_TIMEOUT", "600000");
        env::set_var("NCCL_IB_DISABLE", "1");

        let mut config = CheckConfig::default();
        config.apply_env_overrides();

        assert_eq!(config.cluster.interface, "eth3");
        assert_eq!(config.cluster.master_addr, "10.0.0.1");
        assert_eq!(config.cluster.master_port, 23456);
        assert_eq!(config.comm.op_timeout_ms, 600_000);
        assert!(!config.comm.ib_enabled);

        env::remove_var("NCCL_SOCKET_IFNAME");
        env::remove_var("MASTER_ADDR");
        env::remove_var("MASTER_PORT");
        env::remove_var("NCCL_TIMEOUT");
        env::remove_var("NCCL_IB_DISABLE");
    }

    #[test]
    fn test_commcheck_overrides_win_over_nccl() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::set_var("COMMCHECK_INTERFACE", "bond0");
        env::set_var("NCCL_SOCKET_IFNAME", "eth3");

        let mut config = CheckConfig::default();
        config.apply_env_overrides();
        assert_eq!(config.cluster.interface, "bond0");

        env::remove_var("COMMCHECK_INTERFACE");
        env::remove_var("NCCL_SOCKET_IFNAME");
    }

    #[test]
    fn test_validation_zero_port() {
        let mut config = CheckConfig::default();
        config.cluster.master_port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_bad_ip() {
        let mut config = CheckConfig::default();
        config.cluster.node0_ip = "not-an-ip".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_duplicate_node_ips() {
        let mut config = CheckConfig::default();
        config.cluster.node1_ip = config.cluster.node0_ip.clone();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_invalid_log_level() {
        let mut config = CheckConfig::default();
        config.logging.level = "invalid".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_serialize_deserialize() {
        let config = CheckConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: CheckConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.cluster.master_addr, parsed.cluster.master_addr);
        assert_eq!(config.comm.op_timeout_ms, parsed.comm.op_timeout_ms);
    }

    #[test]
    fn test_parse_config_file() {
        let config_str = r#"
[cluster]
master_addr = "10.1.2.3"
master_port = 29500
node0_ip = "10.1.2.3"
node1_ip = "10.1.2.4"
interface = "ens5"

[comm]
op_timeout_ms = 5000

[logging]
level = "debug"
"#;

        let config: CheckConfig = toml::from_str(config_str).unwrap();

        assert_eq!(config.cluster.master_addr, "10.1.2.3");
        assert_eq!(config.cluster.master_port, 29500);
        assert_eq!(config.cluster.interface, "ens5");
        assert_eq!(config.comm.op_timeout_ms, 5000);
        // Unspecified fields keep their defaults
        assert_eq!(config.comm.init_timeout_ms, 300_000);
        assert_eq!(config.logging.level, "debug");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_config_template_parses() {
        let config: CheckConfig = toml::from_str(&generate_default_config()).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.cluster.interface, "enp1s0f0np0");
    }
}
