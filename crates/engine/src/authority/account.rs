//! ACME account resolution
//!
//! Requests name an account explicitly or fall back to the process default,
//! which is created lazily from the configured contact email. An account is
//! (re-)registered whenever its email or CA directory no longer matches the
//! stored registration.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use certward_common::AccountId;
use certward_config::AcmeDefaults;

use super::CertificateAuthority;
use crate::error::{EngineError, EngineResult};
use crate::model::{AccountRegistration, AcmeAccount};
use crate::oplog::OperationLog;
use crate::store::Store;

/// Display name of the lazily created default account
pub const DEFAULT_ACCOUNT_NAME: &str = "System Initial User";

pub struct AccountResolver {
    store: Arc<dyn Store>,
    authority: Arc<dyn CertificateAuthority>,
    defaults: AcmeDefaults,
}

impl AccountResolver {
    pub fn new(
        store: Arc<dyn Store>,
        authority: Arc<dyn CertificateAuthority>,
        defaults: AcmeDefaults,
    ) -> Self {
        Self {
            store,
            authority,
            defaults,
        }
    }

    /// Resolve the account for an operation
    ///
    /// A requested account that cannot be loaded or registered falls back
    /// to the default; only a default failure is an error.
    pub async fn resolve(&self, requested: Option<AccountId>, log: &OperationLog) -> EngineResult<AcmeAccount> {
        if let Some(id) = requested {
            match self.explicit(id, log).await {
                Ok(account) => return Ok(account),
                Err(e) => {
                    warn!(account = %id, error = %e, "Falling back to default ACME account");
                    log.info(format!(
                        "ACME account {} unavailable ({}), using the default account",
                        id, e
                    ));
                }
            }
        }

        self.default_account(log)
            .await
            .map_err(|e| match e {
                EngineError::Account(_) => e,
                other => EngineError::Account(other.to_string()),
            })
    }

    async fn explicit(&self, id: AccountId, log: &OperationLog) -> EngineResult<AcmeAccount> {
        let account = self
            .store
            .get_account(id)
            .await?
            .ok_or_else(|| EngineError::account_not_found(id))?;
        self.ensure_registered(account, log).await
    }

    async fn default_account(&self, log: &OperationLog) -> EngineResult<AcmeAccount> {
        let email = self
            .defaults
            .email
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .ok_or_else(|| EngineError::Account("no default ACME contact email is configured".into()))?;
        let directory = self.defaults.ca_directory.as_str();

        let account = match self.store.find_account(email, directory).await? {
            Some(account) => account,
            None => {
                info!(email = %email, directory = %directory, "Creating default ACME account");
                self.store
                    .create_account(AcmeAccount {
                        name: DEFAULT_ACCOUNT_NAME.to_string(),
                        email: email.to_string(),
                        ca_directory: directory.to_string(),
                        proxy: self.defaults.proxy.clone(),
                        eab_key_id: self.defaults.eab_key_id.clone(),
                        eab_hmac_key: self.defaults.eab_hmac_key.clone(),
                        created_at: Some(Utc::now()),
                        ..Default::default()
                    })
                    .await?
            }
        };

        self.ensure_registered(account, log).await
    }

    async fn ensure_registered(&self, mut account: AcmeAccount, log: &OperationLog) -> EngineResult<AcmeAccount> {
        if account.is_registered() {
            return Ok(account);
        }

        log.info(format!(
            "Registering ACME account {} with {}",
            account.email, account.ca_directory
        ));
        let registration = self.authority.register(&account, log).await?;

        account.registration = Some(AccountRegistration {
            uri: registration.account_url,
            email: account.email.clone(),
            ca_directory: account.ca_directory.clone(),
        });
        account.key = Some(registration.key);
        self.store.update_account(&account).await?;

        info!(account = %account.id, email = %account.email, "ACME account registered");
        Ok(account)
    }
}
