use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::Deserialize;
use tracing::info;

use crate::shared::models::constants::{FILE_SERVER_PORT, NOTEBOOK_PORT, SIMULATOR_PORT};

#[derive(Debug, Clone, Deserialize, Default)]
pub struct NbpodConfig {
    #[serde(default)]
    pub pod: PodSettings,
    #[serde(default)]
    pub services: ServicePorts,
    #[serde(default)]
    pub relay: RelaySettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PodSettings {
    #[serde(default = "default_image")]
    pub image: String,
    #[serde(default = "default_network")]
    pub network: String,
    #[serde(default = "default_mount_path")]
    pub mount_path: String,
    #[serde(default = "default_platform")]
    pub platform: Option<String>,
    /// Enables resource limits and the sandboxed container runtime.
    #[serde(default)]
    pub production: bool,
    #[serde(default = "default_memory_bytes")]
    pub memory_bytes: i64,
    #[serde(default = "default_cpus")]
    pub cpus: f64,
    #[serde(default = "default_sandbox_runtime")]
    pub sandbox_runtime: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServicePorts {
    #[serde(default = "default_notebook_port")]
    pub notebook: u16,
    #[serde(default = "default_simulator_port")]
    pub simulator: u16,
    #[serde(default = "default_file_server_port")]
    pub file_server: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelaySettings {
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_forwarded_proto")]
    pub forwarded_proto: String,
}

impl Default for PodSettings {
    fn default() -> Self {
        Self {
            image: default_image(),
            network: default_network(),
            mount_path: default_mount_path(),
            platform: default_platform(),
            production: false,
            memory_bytes: default_memory_bytes(),
            cpus: default_cpus(),
            sandbox_runtime: default_sandbox_runtime(),
        }
    }
}

impl Default for ServicePorts {
    fn default() -> Self {
        Self {
            notebook: default_notebook_port(),
            simulator: default_simulator_port(),
            file_server: default_file_server_port(),
        }
    }
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_timeout_secs(),
            ping_interval_secs: default_ping_interval_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            forwarded_proto: default_forwarded_proto(),
        }
    }
}

impl RelaySettings {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs.max(1))
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs.max(1))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }
}

impl NbpodConfig {
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .map_err(|e| anyhow!("Failed to read config at {}: {}", path.display(), e))?;
        let mut config: NbpodConfig = serde_json::from_str(&data)
            .map_err(|e| anyhow!("Failed to parse config JSON at {}: {}", path.display(), e))?;

        config.pod.image = config.pod.image.trim().to_string();
        if config.pod.image.is_empty() {
            config.pod.image = default_image();
        }

        config.pod.network = config.pod.network.trim().to_string();
        if config.pod.network.is_empty() {
            config.pod.network = default_network();
        }

        if config.pod.cpus <= 0.0 {
            return Err(anyhow!("pod.cpus must be positive, got {}", config.pod.cpus));
        }
        if config.pod.memory_bytes <= 0 {
            return Err(anyhow!(
                "pod.memory_bytes must be positive, got {}",
                config.pod.memory_bytes
            ));
        }

        Ok(config)
    }

    /// Loads the config file if present, falling back to defaults, then applies
    /// `NBPOD_PRODUCTION` from the environment.
    pub fn load_default() -> Result<(Self, PathBuf)> {
        let path = resolve_config_path();
        let mut config = if path.exists() {
            Self::load_from_path(&path)?
        } else {
            info!("No config at {}, using defaults", path.display());
            Self::default()
        };

        if let Ok(value) = std::env::var("NBPOD_PRODUCTION") {
            config.pod.production = matches!(value.trim(), "1" | "true" | "yes");
        }

        Ok((config, path))
    }
}

fn default_image() -> String {
    "nb-simple".to_string()
}

fn default_network() -> String {
    "demo_nbs".to_string()
}

fn default_mount_path() -> String {
    "/nb-docker/notebooks".to_string()
}

fn default_platform() -> Option<String> {
    Some("linux/amd64".to_string())
}

fn default_memory_bytes() -> i64 {
    768 * 1024 * 1024
}

fn default_cpus() -> f64 {
    1.0
}

fn default_sandbox_runtime() -> Option<String> {
    Some("runsc".to_string())
}

fn default_notebook_port() -> u16 {
    NOTEBOOK_PORT
}

fn default_simulator_port() -> u16 {
    SIMULATOR_PORT
}

fn default_file_server_port() -> u16 {
    FILE_SERVER_PORT
}

fn default_idle_timeout_secs() -> u64 {
    30 * 60
}

fn default_ping_interval_secs() -> u64 {
    30
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_forwarded_proto() -> String {
    "http".to_string()
}

pub fn resolve_config_path() -> PathBuf {
    if let Ok(path) = std::env::var("NBPOD_CONFIG_PATH") {
        return expand_path(path);
    }

    default_config_path()
}

fn expand_path(input: String) -> PathBuf {
    if let Some(stripped) = input.strip_prefix("~/") {
        if let Some(home) = home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(input)
}

fn default_config_path() -> PathBuf {
    home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".nbpod")
        .join("nbpod.json")
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}
