//! Block parsers for the engine configuration.

use anyhow::Result;
use std::path::PathBuf;

use crate::defaults::*;
use crate::types::*;

use super::helpers::{get_bool_entry, get_int_entry, get_string_args, get_string_entry};

fn non_negative(node: &kdl::KdlNode, name: &str) -> Result<Option<u64>> {
    match get_int_entry(node, name) {
        Some(v) if v < 0 => Err(anyhow::anyhow!(
            "'{}' in '{}' block must not be negative, got {}",
            name,
            node.name().value(),
            v
        )),
        Some(v) => Ok(Some(v as u64)),
        None => Ok(None),
    }
}

/// A flag given either bare (`substitute-wildcard`) or with a value
fn flag(node: &kdl::KdlNode, name: &str) -> Option<bool> {
    let child = node.children().and_then(|c| c.get(name))?;
    if child.entries().is_empty() {
        return Some(true);
    }
    get_bool_entry(node, name)
}

/// Parse the `engine` block
pub fn parse_engine_config(node: &kdl::KdlNode) -> Result<EngineConfig> {
    let defaults = EngineConfig::default();
    Ok(EngineConfig {
        config_root: get_string_entry(node, "config-root")
            .map(PathBuf::from)
            .unwrap_or(defaults.config_root),
        data_dir: get_string_entry(node, "data-dir")
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir),
        substitute_wildcard: flag(node, "substitute-wildcard")
            .unwrap_or(defaults.substitute_wildcard),
    })
}

/// Parse the `acme` block
pub fn parse_acme_defaults(node: &kdl::KdlNode) -> Result<AcmeDefaults> {
    let key_type = get_string_entry(node, "key-type")
        .or_else(|| get_int_entry(node, "key-type").map(|v| v.to_string()))
        .unwrap_or_else(default_key_type);

    let eab_key_id = get_string_entry(node, "eab-key-id");
    let eab_hmac_key = get_string_entry(node, "eab-hmac-key");
    if eab_key_id.is_some() != eab_hmac_key.is_some() {
        return Err(anyhow::anyhow!(
            "'acme' block requires both 'eab-key-id' and 'eab-hmac-key' when either is set"
        ));
    }

    Ok(AcmeDefaults {
        email: get_string_entry(node, "email"),
        ca_directory: get_string_entry(node, "ca-directory").unwrap_or_else(default_ca_directory),
        proxy: get_string_entry(node, "proxy"),
        key_type,
        eab_key_id,
        eab_hmac_key,
        challenge_timeout_secs: non_negative(node, "challenge-timeout-secs")?
            .unwrap_or_else(default_challenge_timeout_secs),
        issuance_timeout_secs: non_negative(node, "issuance-timeout-secs")?
            .unwrap_or_else(default_issuance_timeout_secs),
    })
}

/// Parse the `renewal` block
pub fn parse_renewal_config(node: &kdl::KdlNode) -> Result<RenewalConfig> {
    let interval_days = match get_int_entry(node, "interval-days") {
        Some(v) if !(0..=i128::from(u32::MAX)).contains(&v) => {
            return Err(anyhow::anyhow!(
                "'interval-days' must be between 0 and {}, got {}",
                u32::MAX,
                v
            ));
        }
        Some(v) => v as u32,
        None => default_renewal_interval_days(),
    };

    Ok(RenewalConfig {
        interval_days,
        check_interval_secs: non_negative(node, "check-interval-secs")?
            .unwrap_or_else(default_check_interval_secs),
        initial_delay_secs: non_negative(node, "initial-delay-secs")?
            .unwrap_or_else(default_initial_delay_secs),
    })
}

/// Parse the `http01` block
pub fn parse_http01_config(node: &kdl::KdlNode) -> Result<Http01Config> {
    let port = match get_int_entry(node, "port") {
        Some(v) if !(1..=65535).contains(&v) => {
            return Err(anyhow::anyhow!("'port' in 'http01' block out of range: {}", v));
        }
        Some(v) => v as u16,
        None => default_http01_port(),
    };

    Ok(Http01Config {
        bind: get_string_entry(node, "bind").unwrap_or_else(|| "0.0.0.0".to_string()),
        port,
    })
}

/// Parse the `dns01` block
pub fn parse_dns01_config(node: &kdl::KdlNode) -> Result<Dns01Config> {
    Ok(Dns01Config {
        recursive_nameservers: get_string_args(node, "recursive-nameservers").unwrap_or_default(),
        propagation_timeout_secs: non_negative(node, "propagation-timeout-secs")?
            .unwrap_or_else(default_propagation_timeout_secs),
        propagation_interval_secs: non_negative(node, "propagation-interval-secs")?
            .unwrap_or_else(default_propagation_interval_secs),
        initial_delay_secs: non_negative(node, "initial-delay-secs")?
            .unwrap_or_else(default_initial_delay_secs),
        verify_propagation: get_bool_entry(node, "verify-propagation").unwrap_or(true),
    })
}

/// Parse the `reload` block
pub fn parse_reload_config(node: &kdl::KdlNode) -> Result<ReloadConfig> {
    Ok(ReloadConfig {
        command: get_string_args(node, "command").unwrap_or_else(default_reload_command),
    })
}

/// Parse the `sync` block
pub fn parse_sync_config(node: &kdl::KdlNode) -> Result<SyncConfig> {
    Ok(SyncConfig {
        timeout_secs: non_negative(node, "timeout-secs")?
            .unwrap_or_else(default_sync_timeout_secs),
    })
}

/// Parse the `api` block
pub fn parse_api_config(node: &kdl::KdlNode) -> Result<ApiConfig> {
    Ok(ApiConfig {
        address: get_string_entry(node, "address").unwrap_or_else(default_api_address),
        token: get_string_entry(node, "token"),
        node_secret: get_string_entry(node, "node-secret"),
        tls_cert: get_string_entry(node, "tls-cert").map(PathBuf::from),
        tls_key: get_string_entry(node, "tls-key").map(PathBuf::from),
    })
}

/// Parse the `logging` block
pub fn parse_logging_config(node: &kdl::KdlNode) -> Result<LoggingConfig> {
    let format = match get_string_entry(node, "format").as_deref() {
        None | Some("pretty") => LogFormat::Pretty,
        Some("json") => LogFormat::Json,
        Some(other) => {
            return Err(anyhow::anyhow!(
                "Invalid log format '{}'. Valid formats: pretty, json",
                other
            ));
        }
    };

    Ok(LoggingConfig {
        level: get_string_entry(node, "level").unwrap_or_else(|| "info".to_string()),
        format,
    })
}
