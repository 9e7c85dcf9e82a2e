use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub machines: PoolConfig,
    pub devices: PoolConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub ip: Ipv4Addr,
    pub subnetmask: Ipv4Addr,
    #[serde(default)]
    pub dns: Option<Ipv4Addr>,
    #[serde(default)]
    pub router: Option<Ipv4Addr>,
    #[serde(default = "default_domainname")]
    pub domainname: String,
    /// Lease duration in seconds. Must fit in a u32 (see DESIGN.md open questions).
    #[serde(default = "default_duration")]
    pub duration: u64,
    #[serde(default = "default_control_port")]
    pub control_port: u16,
    /// Log file path, empty for stdout.
    #[serde(default)]
    pub log: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl ServerConfig {
    pub fn dns(&self) -> Ipv4Addr {
        self.dns.unwrap_or(self.ip)
    }

    pub fn router(&self) -> Ipv4Addr {
        self.router.unwrap_or(self.ip)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    pub ipstart: Ipv4Addr,
    pub iprange: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_bindings_path")]
    pub bindings_path: PathBuf,
    #[serde(default = "default_pxe_path")]
    pub pxe_path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            bindings_path: default_bindings_path(),
            pxe_path: default_pxe_path(),
        }
    }
}

fn default_domainname() -> String {
    String::new()
}
fn default_duration() -> u64 {
    3600
}
fn default_control_port() -> u16 {
    5000
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}
fn default_bindings_path() -> PathBuf {
    PathBuf::from("/etc/clowder/bindings.toml")
}
fn default_pxe_path() -> PathBuf {
    PathBuf::from("/etc/clowder/pxe.toml")
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config {}: {e}", path.display())))?;
        Self::from_str(&content)
    }

    pub fn from_str(content: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(content).map_err(|e| Error::Config(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.server.duration >= (1u64 << 32) {
            return Err(Error::Config(format!(
                "server.duration {} seconds does not fit in a 32-bit lease time",
                self.server.duration
            )));
        }
        if self.server.control_port == 0 {
            return Err(Error::Config("server.control_port must be nonzero".into()));
        }
        Ok(())
    }

    /// Lease duration as the u32 seconds value carried on the wire (option 51).
    pub fn duration_secs(&self) -> u32 {
        self.server.duration as u32
    }
}
