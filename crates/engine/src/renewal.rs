//! Background certificate renewal
//!
//! Periodically sweeps every auto-managed certificate and renews the ones
//! the [`RenewalPolicy`] selects. Certificates are processed one at a time
//! through the engine; one certificate failing (or panicking) never stops
//! the sweep.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::certinfo::read_certificate_info;
use crate::model::{AutoCertMode, ManagedCertificate};
use crate::notify::Notification;
use crate::oplog::OperationLog;
use crate::operations::Engine;

/// Remaining validity below which a certificate is always renewed
pub const SAFETY_MARGIN_DAYS: i64 = 6;

/// Renew unless the certificate is both younger than the interval and
/// outside the safety margin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenewalPolicy {
    pub interval_days: i64,
    pub margin_days: i64,
}

impl RenewalPolicy {
    pub fn new(interval_days: u32) -> Self {
        Self {
            interval_days: i64::from(interval_days),
            margin_days: SAFETY_MARGIN_DAYS,
        }
    }

    pub fn should_renew(&self, age_days: i64, remaining_days: i64) -> bool {
        !(age_days < self.interval_days && remaining_days > self.margin_days)
    }
}

/// What one sweep did
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub checked: usize,
    pub renewed: usize,
    pub skipped: usize,
    pub failed: usize,
}

enum CertResult {
    Renewed,
    Skipped,
    Failed,
}

pub struct RenewalScheduler {
    engine: Arc<Engine>,
    policy: RenewalPolicy,
    check_interval: Duration,
    initial_delay: Duration,
}

impl std::fmt::Debug for RenewalScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenewalScheduler")
            .field("policy", &self.policy)
            .field("check_interval", &self.check_interval)
            .finish()
    }
}

impl RenewalScheduler {
    pub fn new(engine: Arc<Engine>, policy: RenewalPolicy) -> Self {
        Self {
            engine,
            policy,
            check_interval: Duration::from_secs(12 * 3600),
            initial_delay: Duration::from_secs(10),
        }
    }

    pub fn with_interval(mut self, check_interval: Duration) -> Self {
        self.check_interval = check_interval;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sweep at the configured interval until `shutdown` flips to true
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            check_interval_secs = self.check_interval.as_secs(),
            interval_days = self.policy.interval_days,
            "Starting certificate renewal scheduler"
        );

        tokio::select! {
            _ = tokio::time::sleep(self.initial_delay) => {}
            _ = shutdown.changed() => return,
        }

        let mut ticker = interval(self.check_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.sweep().await;
                    debug!(?report, "Renewal sweep finished");
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Renewal scheduler stopping");
                        return;
                    }
                }
            }
        }
    }

    /// One pass over every managed certificate
    pub async fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();

        let certs = match self.engine.store().list_certificates().await {
            Ok(certs) => certs,
            Err(e) => {
                error!(error = %e, "Failed to list certificates for renewal");
                return report;
            }
        };

        let managed: Vec<ManagedCertificate> = certs
            .into_iter()
            .filter(|c| c.auto_cert == AutoCertMode::Enabled)
            .collect();
        info!(certificates = managed.len(), "Checking certificates for renewal");

        for cert in &managed {
            report.checked += 1;
            let outcome = AssertUnwindSafe(self.process(cert)).catch_unwind().await;
            match outcome {
                Ok(CertResult::Renewed) => report.renewed += 1,
                Ok(CertResult::Skipped) => report.skipped += 1,
                Ok(CertResult::Failed) => report.failed += 1,
                Err(_) => {
                    report.failed += 1;
                    error!(cert = %cert.name, "Renewal panicked, continuing with the next certificate");
                    self.engine.notifier().notify(
                        Notification::error("Renew Certificate Error", "Renewal of {name} aborted unexpectedly")
                            .arg("name", &cert.name),
                    );
                }
            }
        }

        info!(
            renewed = report.renewed,
            skipped = report.skipped,
            failed = report.failed,
            "Certificate renewal check complete"
        );
        report
    }

    async fn process(&self, cert: &ManagedCertificate) -> CertResult {
        let notifier = self.engine.notifier();

        if cert.domains.is_empty() {
            warn!(cert = %cert.name, "Auto-managed certificate has no domains");
            notifier.notify(
                Notification::error("Renew Certificate Error", "Certificate {name} has no domains, skipping renewal")
                    .arg("name", &cert.name),
            );
            return CertResult::Failed;
        }
        if cert.ssl_certificate_path.trim().is_empty() {
            warn!(cert = %cert.name, "Auto-managed certificate has no certificate path");
            notifier.notify(
                Notification::error("Renew Certificate Error", "Certificate {name} has no certificate path, skipping renewal")
                    .arg("name", &cert.name),
            );
            return CertResult::Failed;
        }

        let info = match read_certificate_info(self.engine.root(), &cert.ssl_certificate_path) {
            Ok(info) => info,
            Err(e) => {
                warn!(cert = %cert.name, error = %e, "Failed to read certificate for renewal check");
                notifier.notify(
                    Notification::error("Renew Certificate Error", "Failed to read {name}: {error}")
                        .arg("name", &cert.name)
                        .arg("error", &e),
                );
                return CertResult::Failed;
            }
        };

        let now = Utc::now();
        let (age, remaining) = (info.age_days(now), info.remaining_days(now));
        if !self.policy.should_renew(age, remaining) {
            debug!(cert = %cert.name, age, remaining, "Certificate does not need renewal");
            return CertResult::Skipped;
        }

        info!(cert = %cert.name, age, remaining, "Renewing certificate");
        let log = OperationLog::discard();
        match self.engine.renew(cert, &log).await {
            Ok(_) => {
                notifier.notify(
                    Notification::success("Renew Certificate Success", "Certificate {name} renewed successfully")
                        .arg("name", &cert.name),
                );
                CertResult::Renewed
            }
            Err(e) => {
                error!(cert = %cert.name, error = %e, "Certificate renewal failed");
                notifier.notify(
                    Notification::error("Renew Certificate Error", "Renewal of {name} failed: {error}")
                        .arg("name", &cert.name)
                        .arg("error", &e),
                );
                CertResult::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_boundaries() {
        let policy = RenewalPolicy::new(30);
        assert!(!policy.should_renew(29, 10));
        assert!(policy.should_renew(29, 5));
        assert!(policy.should_renew(31, 100));
        assert!(policy.should_renew(30, 60));
        assert!(policy.should_renew(0, 6));
        assert!(!policy.should_renew(0, 7));
    }
}
