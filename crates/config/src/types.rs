//! Configuration structures.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use crate::defaults::*;

/// Engine paths and filesystem behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Reverse-proxy configuration root. Every certificate and key path the
    /// engine reads or writes must resolve under this directory.
    pub config_root: PathBuf,
    /// Directory holding the engine's own state (store file)
    pub data_dir: PathBuf,
    /// Replace `*` with `#` in certificate directory names
    pub substitute_wildcard: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            config_root: default_config_root(),
            data_dir: default_data_dir(),
            substitute_wildcard: cfg!(windows),
        }
    }
}

/// Defaults used when a request does not name an ACME account
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AcmeDefaults {
    /// Contact email of the process default account
    pub email: Option<String>,
    /// CA directory URL
    pub ca_directory: String,
    /// Outbound proxy for CA traffic
    pub proxy: Option<String>,
    /// Key type used when a request does not specify one
    pub key_type: String,
    /// External account binding key id
    pub eab_key_id: Option<String>,
    /// External account binding HMAC key (base64url)
    pub eab_hmac_key: Option<String>,
    /// Seconds allowed for every authorization of an order to validate
    pub challenge_timeout_secs: u64,
    /// Seconds allowed between finalization and certificate download
    pub issuance_timeout_secs: u64,
}

impl Default for AcmeDefaults {
    fn default() -> Self {
        Self {
            email: None,
            ca_directory: default_ca_directory(),
            proxy: None,
            key_type: default_key_type(),
            eab_key_id: None,
            eab_hmac_key: None,
            challenge_timeout_secs: default_challenge_timeout_secs(),
            issuance_timeout_secs: default_issuance_timeout_secs(),
        }
    }
}

/// Auto-renewal sweep settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenewalConfig {
    /// Certificates older than this many days are renewed
    pub interval_days: u32,
    /// Seconds between sweeps
    pub check_interval_secs: u64,
    /// Delay before the first sweep after startup
    pub initial_delay_secs: u64,
}

impl Default for RenewalConfig {
    fn default() -> Self {
        Self {
            interval_days: default_renewal_interval_days(),
            check_interval_secs: default_check_interval_secs(),
            initial_delay_secs: default_initial_delay_secs(),
        }
    }
}

/// Embedded HTTP-01 responder
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Http01Config {
    pub bind: String,
    pub port: u16,
}

impl Http01Config {
    /// Socket address the responder listens on
    pub fn listen_addr(&self) -> Result<SocketAddr, String> {
        let ip: IpAddr = self
            .bind
            .parse()
            .map_err(|e| format!("invalid http01 bind address '{}': {}", self.bind, e))?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

impl Default for Http01Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: default_http01_port(),
        }
    }
}

/// DNS-01 propagation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Dns01Config {
    /// Recursive nameservers used for propagation checks and CNAME lookups
    pub recursive_nameservers: Vec<String>,
    pub propagation_timeout_secs: u64,
    pub propagation_interval_secs: u64,
    pub initial_delay_secs: u64,
    /// Wait for the TXT record to become visible before asking the CA to validate
    pub verify_propagation: bool,
}

impl Dns01Config {
    /// Parse nameservers given as `ip` or `ip:port`
    pub fn nameserver_addrs(&self) -> Result<Vec<SocketAddr>, String> {
        self.recursive_nameservers
            .iter()
            .map(|s| parse_nameserver(s))
            .collect()
    }
}

impl Default for Dns01Config {
    fn default() -> Self {
        Self {
            recursive_nameservers: Vec::new(),
            propagation_timeout_secs: default_propagation_timeout_secs(),
            propagation_interval_secs: default_propagation_interval_secs(),
            initial_delay_secs: default_initial_delay_secs(),
            verify_propagation: true,
        }
    }
}

/// Parse a nameserver given as `ip` or `ip:port` (port defaults to 53)
pub fn parse_nameserver(value: &str) -> Result<SocketAddr, String> {
    if let Ok(addr) = value.parse::<SocketAddr>() {
        return Ok(addr);
    }
    value
        .parse::<IpAddr>()
        .map(|ip| SocketAddr::new(ip, 53))
        .map_err(|e| format!("invalid nameserver '{}': {}", value, e))
}

/// Reverse-proxy reload trigger
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReloadConfig {
    /// Program and arguments, e.g. `["nginx", "-s", "reload"]`
    pub command: Vec<String>,
}

impl Default for ReloadConfig {
    fn default() -> Self {
        Self {
            command: default_reload_command(),
        }
    }
}

/// Fleet sync sender settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Deadline for a single push to a single node
    pub timeout_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_sync_timeout_secs(),
        }
    }
}

/// Management API listener
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub address: String,
    /// Bearer token required for issue/revoke streams
    pub token: Option<String>,
    /// Shared secret accepted on the fleet sync endpoint
    pub node_secret: Option<String>,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            address: default_api_address(),
            token: None,
            node_secret: None,
            tls_cert: None,
            tls_key: None,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Process logging
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}
