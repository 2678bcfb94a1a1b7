//! DNS lookups for DNS-01: CNAME following and TXT propagation checks

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use hickory_resolver::config::{NameServerConfig, ResolverConfig, ResolverOpts};
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::proto::rr::{RData, RecordType};
use hickory_resolver::proto::xfer::Protocol;
use hickory_resolver::{Resolver, TokioResolver};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use certward_config::Dns01Config;

use super::provider::{DnsProviderError, DnsResult};

/// Longest CNAME chain followed before giving up
const MAX_CNAME_HOPS: usize = 8;

/// Resolver used for CNAME following and propagation checks
pub struct DnsLookup {
    resolver: TokioResolver,
}

impl fmt::Debug for DnsLookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DnsLookup").finish_non_exhaustive()
    }
}

impl DnsLookup {
    /// Query `nameservers`, or the system resolvers when empty
    pub fn new(nameservers: &[SocketAddr]) -> Self {
        let mut opts = ResolverOpts::default();
        opts.timeout = Duration::from_secs(5);
        opts.attempts = 2;
        // Propagation checks must see fresh answers
        opts.cache_size = 0;

        let builder = if nameservers.is_empty() {
            match Resolver::builder_tokio() {
                Ok(builder) => builder,
                Err(e) => {
                    warn!(error = %e, "Failed to read system resolver configuration, using defaults");
                    Resolver::builder_with_config(
                        ResolverConfig::default(),
                        TokioConnectionProvider::default(),
                    )
                }
            }
        } else {
            let mut config = ResolverConfig::new();
            for addr in nameservers {
                config.add_name_server(NameServerConfig::new(*addr, Protocol::Udp));
            }
            Resolver::builder_with_config(config, TokioConnectionProvider::default())
        };

        Self {
            resolver: builder.with_options(opts).build(),
        }
    }

    /// Final target of the CNAME chain starting at `fqdn`, if any
    pub async fn resolve_cname(&self, fqdn: &str) -> Option<String> {
        let mut current = fqdn.trim_end_matches('.').to_string();
        let mut followed = false;

        for _ in 0..MAX_CNAME_HOPS {
            let lookup = match self.resolver.lookup(current.as_str(), RecordType::CNAME).await {
                Ok(lookup) => lookup,
                Err(e) => {
                    trace!(name = %current, error = %e, "No CNAME");
                    break;
                }
            };

            let target = lookup.iter().find_map(|rdata| match rdata {
                RData::CNAME(cname) => Some(cname.0.to_string()),
                _ => None,
            });

            match target {
                Some(target) => {
                    let target = target.trim_end_matches('.').to_string();
                    if target == current {
                        break;
                    }
                    debug!(from = %current, to = %target, "Following CNAME");
                    current = target;
                    followed = true;
                }
                None => break,
            }
        }

        followed.then_some(current)
    }

    /// Current TXT values at `fqdn`; no record is an empty list
    pub async fn txt_values(&self, fqdn: &str) -> DnsResult<Vec<String>> {
        match self.resolver.txt_lookup(fqdn).await {
            Ok(records) => Ok(records
                .iter()
                .map(|txt| {
                    txt.txt_data()
                        .iter()
                        .map(|chunk| String::from_utf8_lossy(chunk))
                        .collect::<String>()
                })
                .collect()),
            Err(e) => {
                // Absent records are expected while the record propagates
                let message = e.to_string().to_lowercase();
                if message.contains("no records found")
                    || message.contains("nxdomain")
                    || message.contains("record not found")
                {
                    Ok(Vec::new())
                } else {
                    Err(DnsProviderError::ApiRequest(format!(
                        "TXT lookup for '{}' failed: {}",
                        fqdn, e
                    )))
                }
            }
        }
    }
}

/// Propagation wait timing
#[derive(Debug, Clone)]
pub struct PropagationPolicy {
    pub initial_delay: Duration,
    pub interval: Duration,
    pub timeout: Duration,
}

impl From<&Dns01Config> for PropagationPolicy {
    fn from(config: &Dns01Config) -> Self {
        Self {
            initial_delay: Duration::from_secs(config.initial_delay_secs),
            interval: Duration::from_secs(config.propagation_interval_secs.max(1)),
            timeout: Duration::from_secs(config.propagation_timeout_secs),
        }
    }
}

/// Wait until `fqdn` serves `expected` or the policy times out
pub async fn wait_for_propagation(
    lookup: &DnsLookup,
    fqdn: &str,
    expected: &str,
    policy: &PropagationPolicy,
) -> DnsResult<()> {
    let start = Instant::now();
    let deadline = start + policy.timeout;

    debug!(
        record = %fqdn,
        timeout_secs = policy.timeout.as_secs(),
        "Waiting for DNS propagation"
    );
    tokio::time::sleep(policy.initial_delay).await;

    loop {
        match lookup.txt_values(fqdn).await {
            Ok(values) if values.iter().any(|v| v == expected) => {
                debug!(
                    record = %fqdn,
                    elapsed_secs = start.elapsed().as_secs(),
                    "DNS propagation confirmed"
                );
                return Ok(());
            }
            Ok(_) => trace!(record = %fqdn, "Record not yet propagated"),
            Err(e) => warn!(record = %fqdn, error = %e, "DNS lookup error"),
        }

        if Instant::now() >= deadline {
            return Err(DnsProviderError::Timeout {
                elapsed_secs: start.elapsed().as_secs(),
            });
        }
        tokio::time::sleep(policy.interval).await;
    }
}
