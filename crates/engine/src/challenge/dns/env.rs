//! Scoped DNS provider environment
//!
//! A credential's key/value configuration is bound into a [`ProviderEnv`]
//! for the duration of one operation instead of being written into the
//! process environment. Dropping the scope releases it; the process-wide
//! live-scope count makes that observable.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::trace;

use crate::error::ChallengeError;

static LIVE_SCOPES: AtomicUsize = AtomicUsize::new(0);

/// Environment bindings for one provider, valid for one operation
pub struct ProviderEnv {
    provider: String,
    vars: BTreeMap<String, String>,
}

impl ProviderEnv {
    /// Bind `config` for `provider`, requiring every key in `required`
    pub fn bind(
        provider: &str,
        config: &BTreeMap<String, String>,
        required: &[&str],
    ) -> Result<Self, ChallengeError> {
        if config.is_empty() {
            return Err(ChallengeError::EmptyProviderConfig {
                provider: provider.to_string(),
            });
        }

        for key in required {
            let present = config.get(*key).is_some_and(|v| !v.trim().is_empty());
            if !present {
                return Err(ChallengeError::MissingEnv {
                    provider: provider.to_string(),
                    key: (*key).to_string(),
                });
            }
        }

        LIVE_SCOPES.fetch_add(1, Ordering::SeqCst);
        trace!(provider = %provider, keys = config.len(), "Bound DNS provider environment");

        Ok(Self {
            provider: provider.to_string(),
            vars: config.clone(),
        })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    pub fn require(&self, key: &str) -> Result<&str, ChallengeError> {
        self.get(key).ok_or_else(|| ChallengeError::MissingEnv {
            provider: self.provider.clone(),
            key: key.to_string(),
        })
    }

    /// Number of environment scopes currently alive in the process
    pub fn live_scopes() -> usize {
        LIVE_SCOPES.load(Ordering::SeqCst)
    }
}

impl Drop for ProviderEnv {
    fn drop(&mut self) {
        LIVE_SCOPES.fetch_sub(1, Ordering::SeqCst);
        trace!(provider = %self.provider, "Released DNS provider environment");
    }
}

// Values are credentials; only the keys are printed
impl fmt::Debug for ProviderEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderEnv")
            .field("provider", &self.provider)
            .field("keys", &self.vars.keys().collect::<Vec<_>>())
            .finish()
    }
}
