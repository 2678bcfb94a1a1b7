//! KDL configuration parsing.
//!
//! - `helpers`: value extraction utilities
//! - `engine`: one parser per top-level block

mod engine;
mod helpers;

pub use helpers::{get_bool_entry, get_int_entry, get_string_args, get_string_entry, offset_to_line_col};

use anyhow::Result;

use crate::Config;

use engine::*;

/// Convert a parsed KDL document to Config
pub fn parse_kdl_document(doc: kdl::KdlDocument) -> Result<Config> {
    let mut config = Config::default();

    for node in doc.nodes() {
        match node.name().value() {
            "engine" => config.engine = parse_engine_config(node)?,
            "acme" => config.acme = parse_acme_defaults(node)?,
            "renewal" => config.renewal = parse_renewal_config(node)?,
            "http01" => config.http01 = parse_http01_config(node)?,
            "dns01" => config.dns01 = parse_dns01_config(node)?,
            "reload" => config.reload = parse_reload_config(node)?,
            "sync" => config.sync = parse_sync_config(node)?,
            "api" => config.api = parse_api_config(node)?,
            "logging" => config.logging = parse_logging_config(node)?,
            other => {
                return Err(anyhow::anyhow!(
                    "Unknown top-level configuration block: '{}'\n\
                     Valid blocks are: engine, acme, renewal, http01, dns01, reload, sync, api, logging",
                    other
                ));
            }
        }
    }

    Ok(config)
}
