//! DNS provider registry keyed by provider code

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::env::ProviderEnv;
use super::provider::{DnsProvider, DnsProviderError, DnsResult};
use super::providers::{
    CloudflareProvider, DigitalOceanProvider, HetznerProvider, WebhookProvider, PROVIDER_TIMEOUT,
};

pub type ProviderBuilder = Arc<dyn Fn(&ProviderEnv) -> DnsResult<Arc<dyn DnsProvider>> + Send + Sync>;

/// How to construct one provider and which environment keys it reads
#[derive(Clone)]
pub struct ProviderDescriptor {
    pub code: String,
    pub required: Vec<&'static str>,
    pub optional: Vec<&'static str>,
    pub build: ProviderBuilder,
}

impl fmt::Debug for ProviderDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderDescriptor")
            .field("code", &self.code)
            .field("required", &self.required)
            .field("optional", &self.optional)
            .finish_non_exhaustive()
    }
}

fn credential(env: &ProviderEnv, key: &str) -> DnsResult<String> {
    env.get(key)
        .map(str::to_string)
        .ok_or_else(|| DnsProviderError::Credentials(format!("{} is not set", key)))
}

#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, ProviderDescriptor>,
}

impl ProviderRegistry {
    /// Registry with no providers
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry with the built-in providers
    pub fn builtin() -> Self {
        let mut registry = Self::empty();

        registry.register(ProviderDescriptor {
            code: "cloudflare".into(),
            required: vec!["CLOUDFLARE_DNS_API_TOKEN"],
            optional: vec!["CLOUDFLARE_API_URL"],
            build: Arc::new(|env: &ProviderEnv| {
                let token = credential(env, "CLOUDFLARE_DNS_API_TOKEN")?;
                let provider =
                    CloudflareProvider::new(&token, env.get("CLOUDFLARE_API_URL"), PROVIDER_TIMEOUT)?;
                Ok(Arc::new(provider) as Arc<dyn DnsProvider>)
            }),
        });

        registry.register(ProviderDescriptor {
            code: "hetzner".into(),
            required: vec!["HETZNER_API_KEY"],
            optional: vec!["HETZNER_API_URL"],
            build: Arc::new(|env: &ProviderEnv| {
                let token = credential(env, "HETZNER_API_KEY")?;
                let provider =
                    HetznerProvider::new(&token, env.get("HETZNER_API_URL"), PROVIDER_TIMEOUT)?;
                Ok(Arc::new(provider) as Arc<dyn DnsProvider>)
            }),
        });

        registry.register(ProviderDescriptor {
            code: "digitalocean".into(),
            required: vec!["DO_AUTH_TOKEN"],
            optional: vec!["DO_API_URL"],
            build: Arc::new(|env: &ProviderEnv| {
                let token = credential(env, "DO_AUTH_TOKEN")?;
                let provider =
                    DigitalOceanProvider::new(&token, env.get("DO_API_URL"), PROVIDER_TIMEOUT)?;
                Ok(Arc::new(provider) as Arc<dyn DnsProvider>)
            }),
        });

        registry.register(ProviderDescriptor {
            code: "webhook".into(),
            required: vec!["WEBHOOK_URL"],
            optional: vec!["WEBHOOK_AUTH_HEADER", "WEBHOOK_TOKEN"],
            build: Arc::new(|env: &ProviderEnv| {
                let url = credential(env, "WEBHOOK_URL")?;
                let provider = WebhookProvider::new(
                    &url,
                    env.get("WEBHOOK_AUTH_HEADER"),
                    env.get("WEBHOOK_TOKEN"),
                    PROVIDER_TIMEOUT,
                )?;
                Ok(Arc::new(provider) as Arc<dyn DnsProvider>)
            }),
        });

        registry
    }

    /// Add or replace a provider
    pub fn register(&mut self, descriptor: ProviderDescriptor) {
        self.providers
            .insert(descriptor.code.to_ascii_lowercase(), descriptor);
    }

    pub fn get(&self, code: &str) -> Option<&ProviderDescriptor> {
        self.providers.get(&code.to_ascii_lowercase())
    }

    pub fn codes(&self) -> impl Iterator<Item = &str> {
        self.providers.keys().map(String::as_str)
    }
}
