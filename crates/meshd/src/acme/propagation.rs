//! DNS-01 propagation checking
//!
//! Before the CA is told a challenge is ready, the TXT record published by the
//! coordination service has to be visible in public DNS. This polls for it.

use std::time::Duration;

use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use tokio::time::{sleep, Instant};
use tracing::{debug, trace, warn};

use super::error::AcmeError;

/// Polls DNS for an expected TXT value
pub struct PropagationChecker {
    resolver: TokioAsyncResolver,
}

impl PropagationChecker {
    /// Resolver from the system configuration, falling back to the library
    /// defaults when it cannot be read
    ///
    /// Caching is disabled so a negative answer never masks a fresh record.
    pub fn from_system() -> Self {
        let (config, mut opts) = match hickory_resolver::system_conf::read_system_conf() {
            Ok(conf) => conf,
            Err(e) => {
                warn!(error = %e, "Failed to read system resolver configuration, using defaults");
                (ResolverConfig::default(), ResolverOpts::default())
            }
        };
        opts.cache_size = 0;

        Self {
            resolver: TokioAsyncResolver::tokio(config, opts),
        }
    }

    /// Wait until `record` carries `expected`, polling every `interval`
    pub async fn wait_for_txt(
        &self,
        record: &str,
        expected: &str,
        timeout: Duration,
        interval: Duration,
    ) -> Result<(), AcmeError> {
        let deadline = Instant::now() + timeout;
        let fqdn = if record.ends_with('.') {
            record.to_string()
        } else {
            format!("{}.", record)
        };

        loop {
            if self.has_txt(&fqdn, expected).await {
                debug!(record = %record, "DNS-01 record visible");
                return Ok(());
            }

            if Instant::now() + interval > deadline {
                return Err(AcmeError::PropagationTimeout {
                    record: record.to_string(),
                    after: timeout,
                });
            }

            trace!(record = %record, "DNS-01 record not visible yet");
            sleep(interval).await;
        }
    }

    async fn has_txt(&self, fqdn: &str, expected: &str) -> bool {
        match self.resolver.txt_lookup(fqdn).await {
            Ok(lookup) => lookup.iter().any(|txt| {
                let value: String = txt
                    .txt_data()
                    .iter()
                    .map(|chunk| String::from_utf8_lossy(chunk))
                    .collect();
                value == expected
            }),
            Err(e) => {
                trace!(record = %fqdn, error = %e, "TXT lookup failed");
                false
            }
        }
    }
}

impl std::fmt::Debug for PropagationChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropagationChecker").finish_non_exhaustive()
    }
}
