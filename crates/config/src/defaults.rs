//! Default values shared by the KDL and JSON loaders.

use std::path::PathBuf;

/// Let's Encrypt production directory URL
pub const LETSENCRYPT_PRODUCTION: &str = "https://acme-v02.api.letsencrypt.org/directory";

/// Let's Encrypt staging directory URL
pub const LETSENCRYPT_STAGING: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";

/// Minimum seconds between renewal sweeps
pub const MIN_CHECK_INTERVAL_SECS: u64 = 3600;

pub fn default_config_root() -> PathBuf {
    PathBuf::from("/etc/nginx")
}

pub fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/certward")
}

pub fn default_ca_directory() -> String {
    LETSENCRYPT_PRODUCTION.to_string()
}

pub fn default_key_type() -> String {
    "2048".to_string()
}

pub fn default_challenge_timeout_secs() -> u64 {
    120
}

pub fn default_issuance_timeout_secs() -> u64 {
    60
}

pub fn default_renewal_interval_days() -> u32 {
    7
}

pub fn default_check_interval_secs() -> u64 {
    12 * 3600
}

pub fn default_initial_delay_secs() -> u64 {
    10
}

pub fn default_http01_port() -> u16 {
    9180
}

pub fn default_propagation_timeout_secs() -> u64 {
    120
}

pub fn default_propagation_interval_secs() -> u64 {
    5
}

pub fn default_reload_command() -> Vec<String> {
    vec!["nginx".to_string(), "-s".to_string(), "reload".to_string()]
}

pub fn default_sync_timeout_secs() -> u64 {
    10
}

pub fn default_api_address() -> String {
    "127.0.0.1:9443".to_string()
}

/// Configuration used when no file is given
pub const DEFAULT_CONFIG_KDL: &str = r#"
engine {
    config-root "/etc/nginx"
    data-dir "/var/lib/certward"
}

renewal {
    interval-days 7
    check-interval-secs 43200
}

http01 {
    bind "0.0.0.0"
    port 9180
}

reload {
    command "nginx" "-s" "reload"
}

api {
    address "127.0.0.1:9443"
}
"#;
