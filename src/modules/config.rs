use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser;

use crate::proxy::config::{ScanProxyConfig, UpstreamProxyConfig};
use crate::proxy::ProxyConfig;

const DATA_DIR: &str = ".scan-mux";
const CONFIG_FILE: &str = "config.json";

/// Multiplexing proxy for single-target scanner licenses
#[derive(Parser, Debug, Default)]
#[command(name = "scan-mux", version, about, long_about = None)]
pub struct Cli {
    /// JSON configuration file (default: ~/.scan-mux/config.json when present)
    #[arg(short, long, env = "SCAN_MUX_CONFIG")]
    pub config: Option<PathBuf>,

    /// Shared account, used for the backend session and client logins
    #[arg(short, long, env = "SCAN_MUX_USERNAME")]
    pub username: Option<String>,

    #[arg(short, long, env = "SCAN_MUX_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Scanner backend host
    #[arg(long, env = "SCAN_MUX_BACKEND_HOST")]
    pub backend_host: Option<String>,

    /// Scanner backend API port
    #[arg(long, env = "SCAN_MUX_BACKEND_PORT")]
    pub backend_port: Option<u16>,

    /// `https` or `http`
    #[arg(long, env = "SCAN_MUX_BACKEND_SCHEME")]
    pub backend_scheme: Option<String>,

    /// Verify the backend TLS certificate
    #[arg(long, env = "SCAN_MUX_SECURE")]
    pub secure: bool,

    /// Outbound proxy for backend traffic (http://, https://, socks5://)
    #[arg(long, env = "SCAN_MUX_UPSTREAM_PROXY")]
    pub upstream_proxy: Option<String>,

    /// Proxy written into every created target, as [protocol://]address[:port]
    #[arg(long, env = "SCAN_MUX_SCAN_PROXY")]
    pub scan_proxy: Option<String>,

    /// Listen address
    #[arg(long, env = "SCAN_MUX_LISTEN_HOST")]
    pub listen_host: Option<String>,

    /// Listen port
    #[arg(long, env = "SCAN_MUX_LISTEN_PORT")]
    pub listen_port: Option<u16>,

    /// Resolve license conflicts locally by evicting idle targets
    #[arg(long, env = "SCAN_MUX_DEMO_MODE")]
    pub demo_mode: bool,

    /// Seconds of inactivity after which a watcher is dropped
    #[arg(long, env = "SCAN_MUX_WATCHER_TTL")]
    pub watcher_ttl: Option<u64>,

    /// Do not load the backend's existing targets at startup
    #[arg(long, env = "SCAN_MUX_NO_SEED")]
    pub no_seed: bool,

    /// Directory for rolling log files
    #[arg(long, env = "SCAN_MUX_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    /// Write the effective configuration to the config file and exit
    #[arg(long)]
    pub write_config: bool,
}

impl Cli {
    /// Overlay explicitly given flags on top of `config`.
    pub fn apply(&self, config: &mut ProxyConfig) -> Result<(), String> {
        if let Some(username) = &self.username {
            config.backend.username = username.clone();
        }
        if let Some(password) = &self.password {
            config.backend.password = password.clone();
        }
        if let Some(host) = &self.backend_host {
            config.backend.host = host.clone();
        }
        if let Some(port) = self.backend_port {
            config.backend.port = port;
        }
        if let Some(scheme) = &self.backend_scheme {
            config.backend.scheme = scheme.to_ascii_lowercase();
        }
        if self.secure {
            config.backend.secure = true;
        }
        if let Some(url) = &self.upstream_proxy {
            config.upstream_proxy = UpstreamProxyConfig {
                enabled: true,
                url: url.clone(),
            };
        }
        if let Some(value) = &self.scan_proxy {
            config.scan_proxy = Some(ScanProxyConfig::parse(value)?);
        }
        if let Some(host) = &self.listen_host {
            config.listen_host = host.clone();
        }
        if let Some(port) = self.listen_port {
            config.listen_port = port;
        }
        if self.demo_mode {
            config.demo_mode = true;
        }
        if let Some(ttl) = self.watcher_ttl {
            config.watcher_ttl_secs = ttl;
        }
        if self.no_seed {
            config.seed_from_backend = false;
        }
        if let Some(dir) = &self.log_dir {
            config.log_dir = Some(dir.clone());
        }
        Ok(())
    }
}

/// Get data directory path
pub fn get_data_dir() -> Result<PathBuf, String> {
    let home = dirs::home_dir().ok_or("Failed to get user home directory")?;
    let data_dir = home.join(DATA_DIR);

    if !data_dir.exists() {
        fs::create_dir_all(&data_dir)
            .map_err(|e| format!("Failed to create data directory: {}", e))?;
    }

    Ok(data_dir)
}

pub fn default_config_path() -> Result<PathBuf, String> {
    Ok(get_data_dir()?.join(CONFIG_FILE))
}

/// Load proxy configuration
pub fn load_config(path: &Path) -> Result<ProxyConfig, String> {
    let content = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config file {}: {}", path.display(), e))?;

    serde_json::from_str(&content)
        .map_err(|e| format!("Failed to parse config file {}: {}", path.display(), e))
}

/// Save proxy configuration
pub fn save_config(path: &Path, config: &ProxyConfig) -> Result<(), String> {
    let content = serde_json::to_string_pretty(config)
        .map_err(|e| format!("Failed to serialize config: {}", e))?;

    fs::write(path, content).map_err(|e| format!("Failed to save config: {}", e))
}

/// Defaults, then the config file, then flags and environment.
pub fn resolve_config(cli: &Cli) -> Result<(ProxyConfig, PathBuf), String> {
    let (path, explicit) = match &cli.config {
        Some(path) => (path.clone(), true),
        None => (default_config_path()?, false),
    };

    let mut config = if path.exists() {
        load_config(&path)?
    } else if explicit {
        return Err(format!("Config file {} does not exist", path.display()));
    } else {
        ProxyConfig::default()
    };

    cli.apply(&mut config)?;
    Ok((config, path))
}
