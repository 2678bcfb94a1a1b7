//! Configuration for the certward certificate lifecycle engine
//!
//! Configuration is written in KDL (JSON is also accepted). Every block is
//! optional and falls back to the defaults in [`defaults`].
//!
//! # Module Organization
//!
//! - [`types`]: configuration structures
//! - [`defaults`]: default values and the embedded default document
//! - [`validate`]: logic, address, certificate and best-practice checks
//! - `kdl`: KDL format parsing

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub mod defaults;
mod kdl;
pub mod types;
pub mod validate;

pub use defaults::{DEFAULT_CONFIG_KDL, LETSENCRYPT_PRODUCTION, LETSENCRYPT_STAGING};
pub use types::*;
pub use validate::{ValidationOpts, ValidationResult};

/// Complete engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub engine: EngineConfig,
    pub acme: AcmeDefaults,
    pub renewal: RenewalConfig,
    pub http01: Http01Config,
    pub dns01: Dns01Config,
    pub reload: ReloadConfig,
    pub sync: SyncConfig,
    pub api: ApiConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("kdl");

        match extension {
            "kdl" => Self::from_kdl(&content),
            "json" => Self::from_json(&content),
            _ => Err(anyhow::anyhow!("Unsupported config format: {}", extension)),
        }
    }

    /// Load from `path`, or the embedded default when no path is given
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Self::default_embedded(),
        }
    }

    /// Load the default embedded configuration.
    ///
    /// Falls back to the programmatic default if the embedded document
    /// fails to parse.
    pub fn default_embedded() -> Result<Self> {
        Self::from_kdl(DEFAULT_CONFIG_KDL).or_else(|e| {
            tracing::warn!(
                "Failed to parse embedded KDL config, using programmatic default: {}",
                e
            );
            Ok(Self::default())
        })
    }

    /// Parse configuration from KDL format
    pub fn from_kdl(content: &str) -> Result<Self> {
        let doc: ::kdl::KdlDocument = content
            .parse()
            .map_err(|e: ::kdl::KdlError| anyhow::anyhow!("{}", render_kdl_error(content, &e)))?;

        kdl::parse_kdl_document(doc)
    }

    /// Parse configuration from JSON format
    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).context("Failed to parse JSON configuration")
    }

    /// Run all validation passes
    pub fn validate(&self) -> ValidationResult {
        validate::validate_all(self, &ValidationOpts::default())
    }

    /// Validate and fail on the first pass that reports errors
    pub fn validate_strict(&self) -> Result<ValidationResult> {
        let result = self.validate();
        if !result.is_valid() {
            let messages: Vec<String> = result.errors.iter().map(|e| e.to_string()).collect();
            return Err(anyhow::anyhow!(
                "Configuration validation failed:\n  {}",
                messages.join("\n  ")
            ));
        }
        Ok(result)
    }

    /// Time between renewal sweeps, never shorter than an hour
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(
            self.renewal
                .check_interval_secs
                .max(defaults::MIN_CHECK_INTERVAL_SECS),
        )
    }
}

/// Render a KDL parse error with line/column context
fn render_kdl_error(content: &str, e: &::kdl::KdlError) -> String {
    use miette::Diagnostic;

    let mut error_msg = String::new();
    error_msg.push_str("KDL configuration parse error:\n\n");

    let mut found_details = false;
    if let Some(related) = e.related() {
        for diagnostic in related {
            error_msg.push_str(&format!("  {}\n", diagnostic));
            found_details = true;

            if let Some(labels) = diagnostic.labels() {
                for label in labels {
                    let (line, col) = kdl::offset_to_line_col(content, label.offset());
                    error_msg.push_str(&format!("\n  --> at line {}, column {}\n", line, col));

                    let lines: Vec<&str> = content.lines().collect();
                    if line > 1 {
                        if let Some(lc) = lines.get(line.saturating_sub(2)) {
                            error_msg.push_str(&format!("{:>4} | {}\n", line - 1, lc));
                        }
                    }
                    if let Some(line_content) = lines.get(line.saturating_sub(1)) {
                        error_msg.push_str(&format!("{:>4} | {}\n", line, line_content));
                        error_msg.push_str(&format!(
                            "     | {}^",
                            " ".repeat(col.saturating_sub(1))
                        ));
                        if let Some(label_msg) = label.label() {
                            error_msg.push_str(&format!(" {}", label_msg));
                        }
                        error_msg.push('\n');
                    }
                }
            }

            if let Some(help) = diagnostic.help() {
                error_msg.push_str(&format!("\n  Help: {}\n", help));
            }
        }
    }

    if !found_details {
        error_msg.push_str(&format!("  {}\n", e));
    }

    error_msg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_embedded() {
        let config = Config::default_embedded().unwrap();
        assert_eq!(config.engine.config_root.to_str(), Some("/etc/nginx"));
        assert_eq!(config.renewal.interval_days, 7);
        assert_eq!(config.reload.command, vec!["nginx", "-s", "reload"]);
    }

    #[test]
    fn test_parse_error_reports_location() {
        let err = Config::from_kdl("engine {\n    config-root \"/etc\n}").unwrap_err();
        assert!(err.to_string().contains("KDL configuration parse error"));
    }

    #[test]
    fn test_from_json() {
        let config = Config::from_json(
            r#"{"renewal": {"interval_days": 30}, "api": {"token": "t0k3n"}}"#,
        )
        .unwrap();
        assert_eq!(config.renewal.interval_days, 30);
        assert_eq!(config.renewal.check_interval_secs, 43200);
        assert_eq!(config.api.token.as_deref(), Some("t0k3n"));
    }

    #[test]
    fn test_from_file_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("certward.kdl");
        std::fs::write(&path, "sync {\n    timeout-secs 3\n}\n").unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.sync.timeout_secs, 3);

        let bad = dir.path().join("certward.yaml");
        std::fs::write(&bad, "").unwrap();
        assert!(Config::from_file(&bad).is_err());
    }

    #[test]
    fn test_check_interval_clamped() {
        let mut config = Config::default();
        config.renewal.check_interval_secs = 60;
        assert_eq!(config.check_interval(), Duration::from_secs(3600));
    }

    #[test]
    fn test_validate_strict() {
        let mut config = Config::default();
        assert!(config.validate_strict().is_ok());

        config.renewal.interval_days = 0;
        assert!(config.validate_strict().is_err());
    }
}
