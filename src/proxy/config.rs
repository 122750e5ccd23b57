use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Scanner backend connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Backend host name or IP
    pub host: String,

    /// Backend API port
    pub port: u16,

    /// `https` for real appliances, `http` for plain local setups
    pub scheme: String,

    /// Verify the backend TLS certificate.
    /// - false: accept self-signed certificates (appliance default)
    /// - true: require a trusted certificate chain
    pub secure: bool,

    /// Shared account used both for the backend session and for client logins
    pub username: String,
    pub password: String,

    /// Per-request timeout (seconds)
    pub request_timeout: u64,

    /// Startup connectivity probe: attempts and spacing (seconds)
    pub probe_attempts: u32,
    pub probe_interval_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3443,
            scheme: "https".to_string(),
            secure: false,
            username: String::new(),
            password: String::new(),
            request_timeout: 120,
            probe_attempts: 10,
            probe_interval_secs: 3,
        }
    }
}

impl BackendConfig {
    /// API root every backend path is resolved against, with a trailing slash.
    pub fn api_root(&self) -> String {
        format!("{}://{}:{}/api/v1/", self.scheme, self.host, self.port)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }
}

/// Outbound proxy for backend traffic
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UpstreamProxyConfig {
    /// Whether to route backend traffic through the proxy
    pub enabled: bool,
    /// Proxy URL (http://, https://, socks5://)
    pub url: String,
}

/// Proxy written into the scan configuration of every target the proxy creates,
/// so the scanner reaches the target through it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanProxyConfig {
    #[serde(default = "default_scan_proxy_protocol")]
    pub protocol: String,
    pub address: String,
    #[serde(default = "default_scan_proxy_port")]
    pub port: u16,
}

fn default_scan_proxy_protocol() -> String {
    "http".to_string()
}

fn default_scan_proxy_port() -> u16 {
    8080
}

impl ScanProxyConfig {
    /// Parse `[protocol://]address[:port]`.
    pub fn parse(value: &str) -> Result<Self, String> {
        let (protocol, rest) = match value.split_once("://") {
            Some((protocol, rest)) => (protocol.to_string(), rest),
            None => (default_scan_proxy_protocol(), value),
        };
        let rest = rest.trim_end_matches('/');
        let (address, port) = match rest.rsplit_once(':') {
            Some((address, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|e| format!("invalid scan proxy port '{}': {}", port, e))?;
                (address.to_string(), port)
            }
            None => (rest.to_string(), default_scan_proxy_port()),
        };
        if address.is_empty() {
            return Err(format!("invalid scan proxy '{}': missing address", value));
        }
        Ok(Self {
            protocol,
            address,
            port,
        })
    }
}

/// Multiplexing proxy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub backend: BackendConfig,

    /// Listen address
    pub listen_host: String,

    /// Listen port
    pub listen_port: u16,

    /// License-constrained backend: resolve target-limit conflicts locally
    pub demo_mode: bool,

    /// Idle time (seconds) after which a watcher is dropped
    pub watcher_ttl_secs: u64,

    /// Background watcher sweep period (seconds), 0 disables the sweep
    pub sweep_interval_secs: u64,

    /// Load the backend's existing targets into the registry at startup
    pub seed_from_backend: bool,

    /// Outbound proxy for backend traffic
    pub upstream_proxy: UpstreamProxyConfig,

    /// Proxy configured on newly created targets
    pub scan_proxy: Option<ScanProxyConfig>,

    /// Directory for rolling log files; console only when unset
    pub log_dir: Option<PathBuf>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            listen_host: "0.0.0.0".to_string(),
            listen_port: 3444,
            demo_mode: false,
            watcher_ttl_secs: 300,
            sweep_interval_secs: 60,
            seed_from_backend: true,
            upstream_proxy: UpstreamProxyConfig::default(),
            scan_proxy: None,
            log_dir: None,
        }
    }
}

impl ProxyConfig {
    pub fn watcher_ttl(&self) -> Duration {
        Duration::from_secs(self.watcher_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_secs > 0).then(|| Duration::from_secs(self.sweep_interval_secs))
    }

    /// Reject configurations the proxy cannot run with.
    pub fn validate(&self) -> Result<(), String> {
        if self.backend.username.trim().is_empty() || self.backend.password.is_empty() {
            return Err("backend username and password are required".to_string());
        }
        if self.backend.host.trim().is_empty() {
            return Err("backend host is required".to_string());
        }
        if self.backend.scheme != "https" && self.backend.scheme != "http" {
            return Err(format!("unsupported backend scheme '{}'", self.backend.scheme));
        }
        if self.backend.probe_attempts == 0 {
            return Err("probe_attempts must be at least 1".to_string());
        }
        if self.watcher_ttl_secs == 0 {
            return Err("watcher_ttl_secs must be positive".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_root() {
        let backend = BackendConfig {
            host: "scanner.local".into(),
            port: 3443,
            ..BackendConfig::default()
        };
        assert_eq!(backend.api_root(), "https://scanner.local:3443/api/v1/");
    }

    #[test]
    fn test_scan_proxy_parse() {
        let full = ScanProxyConfig::parse("socks5://10.1.1.1:1080").unwrap();
        assert_eq!(full.protocol, "socks5");
        assert_eq!(full.address, "10.1.1.1");
        assert_eq!(full.port, 1080);

        let bare = ScanProxyConfig::parse("proxy.internal").unwrap();
        assert_eq!(bare.protocol, "http");
        assert_eq!(bare.port, 8080);

        assert!(ScanProxyConfig::parse("http://host:notaport").is_err());
        assert!(ScanProxyConfig::parse("http://").is_err());
    }

    #[test]
    fn test_validate_requires_credentials() {
        let mut config = ProxyConfig::default();
        assert!(config.validate().is_err());

        config.backend.username = "admin@example.com".into();
        config.backend.password = "secret".into();
        assert!(config.validate().is_ok());

        config.backend.scheme = "ftp".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: ProxyConfig =
            serde_json::from_str(r#"{"demo_mode": true, "backend": {"host": "scanner"}}"#).unwrap();
        assert!(config.demo_mode);
        assert_eq!(config.backend.host, "scanner");
        assert_eq!(config.backend.port, 3443);
        assert_eq!(config.listen_port, 3444);
        assert_eq!(config.sweep_interval(), Some(Duration::from_secs(60)));
    }
}
