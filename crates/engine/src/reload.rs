//! Reverse-proxy reload trigger
//!
//! After certificate files change the proxy is asked to reload. The outcome
//! is informational: files are already in place, so a failed reload is
//! logged by the caller and never fails the operation.

use std::fmt;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

/// Highest severity found in reload output (nginx log levels)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    #[default]
    Unknown,
    Info,
    Notice,
    Warn,
    Error,
    Crit,
    Alert,
    Emerg,
}

impl Severity {
    /// Errors and above mean the proxy did not take the new configuration
    pub fn is_failure(self) -> bool {
        self >= Severity::Error
    }

    fn from_marker(marker: &str) -> Option<Self> {
        match marker {
            "emerg" => Some(Severity::Emerg),
            "alert" => Some(Severity::Alert),
            "crit" => Some(Severity::Crit),
            "error" => Some(Severity::Error),
            "warn" => Some(Severity::Warn),
            "notice" => Some(Severity::Notice),
            "info" => Some(Severity::Info),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Unknown => "unknown",
            Severity::Info => "info",
            Severity::Notice => "notice",
            Severity::Warn => "warn",
            Severity::Error => "error",
            Severity::Crit => "crit",
            Severity::Alert => "alert",
            Severity::Emerg => "emerg",
        };
        f.write_str(s)
    }
}

/// Highest `[level]` marker in `output`
pub fn parse_severity(output: &str) -> Severity {
    let mut highest = Severity::Unknown;
    let mut rest = output;
    while let Some(open) = rest.find('[') {
        let after = &rest[open + 1..];
        let Some(close) = after.find(']') else {
            break;
        };
        if let Some(level) = Severity::from_marker(&after[..close]) {
            highest = highest.max(level);
        }
        rest = &after[close + 1..];
    }
    highest
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReloadOutcome {
    pub output: String,
    pub severity: Severity,
}

impl ReloadOutcome {
    pub fn is_ok(&self) -> bool {
        !self.severity.is_failure()
    }
}

#[async_trait]
pub trait ProxyReloader: Send + Sync {
    async fn reload(&self) -> ReloadOutcome;
}

/// Runs the configured reload command, e.g. `nginx -s reload`
#[derive(Debug, Clone)]
pub struct CommandReloader {
    command: Vec<String>,
}

impl CommandReloader {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

#[async_trait]
impl ProxyReloader for CommandReloader {
    async fn reload(&self) -> ReloadOutcome {
        let Some((program, args)) = self.command.split_first() else {
            return ReloadOutcome {
                output: "no reload command configured".into(),
                severity: Severity::Error,
            };
        };

        debug!(program = %program, args = ?args, "Reloading reverse proxy");
        let result = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await;

        match result {
            Ok(out) => {
                let mut output = String::from_utf8_lossy(&out.stdout).into_owned();
                output.push_str(&String::from_utf8_lossy(&out.stderr));
                let mut severity = parse_severity(&output);
                if !out.status.success() {
                    severity = severity.max(Severity::Error);
                }
                if severity.is_failure() {
                    warn!(status = %out.status, severity = %severity, "Reverse proxy reload reported a failure");
                }
                ReloadOutcome { output, severity }
            }
            Err(e) => ReloadOutcome {
                output: format!("failed to run {}: {}", program, e),
                severity: Severity::Error,
            },
        }
    }
}

/// For nodes that only receive synced material
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReloader;

#[async_trait]
impl ProxyReloader for NoopReloader {
    async fn reload(&self) -> ReloadOutcome {
        ReloadOutcome {
            output: String::new(),
            severity: Severity::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_highest_marker() {
        let output = "2024/01/01 00:00:00 [notice] 1#1: signal process started\n\
                      2024/01/01 00:00:00 [warn] 1#1: conflicting server name\n";
        assert_eq!(parse_severity(output), Severity::Warn);
        assert!(!parse_severity(output).is_failure());

        let broken = "nginx: [emerg] unknown directive \"ssl_certficate\"";
        assert_eq!(parse_severity(broken), Severity::Emerg);
        assert!(parse_severity(broken).is_failure());
    }

    #[test]
    fn test_parse_ignores_other_brackets() {
        assert_eq!(parse_severity("[1234] [bogus] text ["), Severity::Unknown);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_command_is_at_least_error() {
        let reloader = CommandReloader::new(vec!["sh".into(), "-c".into(), "echo '[warn] x'; exit 1".into()]);
        let outcome = reloader.reload().await;
        assert_eq!(outcome.severity, Severity::Error);
        assert!(outcome.output.contains("[warn]"));
        assert!(!outcome.is_ok());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_successful_command() {
        let reloader = CommandReloader::new(vec!["sh".into(), "-c".into(), "echo '[notice] reloaded'".into()]);
        let outcome = reloader.reload().await;
        assert_eq!(outcome.severity, Severity::Notice);
        assert!(outcome.is_ok());
    }

    #[tokio::test]
    async fn test_missing_program() {
        let reloader = CommandReloader::new(vec!["certward-no-such-binary".into()]);
        assert_eq!(reloader.reload().await.severity, Severity::Error);
    }
}
