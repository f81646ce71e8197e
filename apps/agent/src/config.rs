//! Agent configuration management.
//!
//! Configuration is stored as TOML:
//! - Linux: `~/.config/codesocket/agent.toml`
//! - Windows: `%APPDATA%/codesocket/agent.toml`

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use codesocket_client::ClientConfig;
use codesocket_controllers::{ControllerSettings, default_transfer_path};
use codesocket_protocol::constants::{
    DEFAULT_CLIENT_TIMEOUT, DEFAULT_PORT, DEFAULT_SERVER_TIMEOUT, DEFAULT_SOCKET_TIMEOUT,
};
use codesocket_server::ListenerConfig;
use codesocket_transport::TransportKind;

/// Agent configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Listening port (0 = auto-assign).
    #[serde(default = "default_port")]
    pub port: u16,

    /// `"tcp"` or `"websocket"`.
    #[serde(default)]
    pub transport: TransportKind,

    /// Seconds without connections before the listener reports idle.
    #[serde(default = "default_server_timeout")]
    pub server_timeout: u64,

    /// Seconds the client waits for a response.
    #[serde(default = "default_client_timeout")]
    pub client_timeout: u64,

    /// Seconds a connection may take to deliver its request.
    #[serde(default = "default_socket_timeout")]
    pub socket_timeout: u64,

    /// Stop serving when the idle timeout fires.
    #[serde(default = "default_true")]
    pub stop_on_idle: bool,

    /// File node graphs are written to before pasting.
    #[serde(default = "default_transfer_path")]
    pub transfer_file_path: PathBuf,

    #[serde(default)]
    pub host: HostConfig,

    #[serde(default)]
    pub output: ControllerSettings,
}

/// Interpreter that executes received code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostConfig {
    #[serde(default = "default_program")]
    pub program: String,

    #[serde(default = "default_args")]
    pub args: Vec<String>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: default_args(),
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_server_timeout() -> u64 {
    DEFAULT_SERVER_TIMEOUT.as_secs()
}

fn default_client_timeout() -> u64 {
    DEFAULT_CLIENT_TIMEOUT.as_secs()
}

fn default_socket_timeout() -> u64 {
    DEFAULT_SOCKET_TIMEOUT.as_secs()
}

fn default_true() -> bool {
    true
}

fn default_program() -> String {
    "python3".into()
}

fn default_args() -> Vec<String> {
    vec!["-".into()]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            transport: TransportKind::default(),
            server_timeout: default_server_timeout(),
            client_timeout: default_client_timeout(),
            socket_timeout: default_socket_timeout(),
            stop_on_idle: true,
            transfer_file_path: default_transfer_path(),
            host: HostConfig::default(),
            output: ControllerSettings::default(),
        }
    }
}

impl Config {
    /// Loads configuration from `path` (or the platform path), creating a
    /// default file if none exists.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => config_path()?,
        };
        Self::load_from(&path)
    }

    fn load_from(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            tracing::debug!(path = %path.display(), "configuration loaded");
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Saves the configuration to `path`.
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    pub fn listener_config(&self) -> ListenerConfig {
        ListenerConfig {
            port: self.port,
            transport: self.transport,
            server_timeout: Duration::from_secs(self.server_timeout),
            socket_timeout: Duration::from_secs(self.socket_timeout),
        }
    }

    /// Client settings targeting `host`, on `port` or the configured one.
    pub fn client_config(&self, host: &str, port: Option<u16>) -> ClientConfig {
        ClientConfig {
            host: host.to_string(),
            port: port.unwrap_or(self.port),
            transport: self.transport,
            timeout: Duration::from_secs(self.client_timeout),
        }
    }
}

/// Returns the platform-specific configuration file path.
fn config_path() -> anyhow::Result<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        Ok(PathBuf::from(home)
            .join(".config")
            .join("codesocket")
            .join("agent.toml"))
    }

    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        Ok(PathBuf::from(appdata).join("codesocket").join("agent.toml"))
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        Ok(PathBuf::from("/tmp/codesocket/agent.toml"))
    }
}
