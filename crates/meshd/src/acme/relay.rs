//! DNS-01 challenge relay through the coordination service
//!
//! Mesh nodes do not own the DNS zone their endpoints live in. The
//! coordination service does, so challenge records are published by asking it
//! over HTTP:
//!
//! ```text
//! POST   {coordination}/api/v1/dns/acme-challenge
//! Authorization: Bearer {token}
//!
//! {"hostname": "app1", "namespace": "alice", "token": "<key authorization>"}
//!
//! DELETE {coordination}/api/v1/dns/acme-challenge
//!
//! {"hostname": "app1", "namespace": "alice"}
//! ```
//!
//! The coordination service derives the TXT value from the key
//! authorization. Publishing must answer 200. Deletion is best-effort.
//!
//! Endpoint names come in two shapes under the base domain:
//! `<leaf>.<namespace>.<base>` and the namespace-level `<namespace>.<base>`.

use std::time::Duration;

use async_trait::async_trait;
use dex_mesh_config::{Config, DNS_PROPAGATION_TIMEOUT};
use serde::Serialize;
use tracing::{debug, info, warn};
use url::Url;

use super::authority::Dns01Solver;
use super::error::RelayError;

/// Coordination service path for challenge records
pub const CHALLENGE_PATH: &str = "/api/v1/dns/acme-challenge";

/// Interval at which propagation should be polled
pub const PROPAGATION_POLL_INTERVAL: Duration = Duration::from_secs(10);

const CHALLENGE_PREFIX: &str = "_acme-challenge.";

/// A mesh endpoint name split into its parts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointName {
    /// Leaf hostname; empty for a namespace-level name
    pub leaf: String,
    pub namespace: String,
}

/// Compose the full hostname for an endpoint
///
/// An empty `leaf` yields the namespace-level name `<namespace>.<base>`.
pub fn endpoint_hostname(leaf: &str, namespace: &str, base_domain: &str) -> String {
    if leaf.is_empty() {
        format!("{}.{}", namespace, base_domain)
    } else {
        format!("{}.{}.{}", leaf, namespace, base_domain)
    }
}

/// Split a challenge domain into leaf and namespace
///
/// Accepts the name with or without the `_acme-challenge.` prefix and with
/// or without a trailing root dot. The remainder after removing the base
/// domain is split on its first dot; without a dot it is a bare namespace.
pub fn parse_challenge_domain(domain: &str, base_domain: &str) -> Result<EndpointName, RelayError> {
    let invalid = |reason: String| RelayError::InvalidDomain {
        domain: domain.to_string(),
        reason,
    };

    let name = domain.strip_suffix('.').unwrap_or(domain);
    let name = name.strip_prefix(CHALLENGE_PREFIX).unwrap_or(name);

    let base = base_domain.trim_matches('.');
    let suffix = format!(".{}", base);
    let rest = name
        .strip_suffix(suffix.as_str())
        .ok_or_else(|| invalid(format!("not under base domain '{}'", base)))?;

    let (leaf, namespace) = match rest.split_once('.') {
        Some((leaf, namespace)) => (leaf, namespace),
        None => ("", rest),
    };

    if namespace.is_empty() || namespace.split('.').any(str::is_empty) {
        return Err(invalid("empty namespace label".to_string()));
    }
    if rest.contains('.') && leaf.is_empty() {
        return Err(invalid("empty leaf label".to_string()));
    }

    Ok(EndpointName {
        leaf: leaf.to_string(),
        namespace: namespace.to_string(),
    })
}


/// Coordination service connection settings for the relay
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub coordination_url: String,
    pub api_token: Option<String>,
    pub base_domain: String,
    pub request_timeout: Duration,
}

impl RelayConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            coordination_url: config.coordination.url.clone(),
            api_token: config.coordination.api_token.clone(),
            base_domain: config.acme.base_domain.clone(),
            request_timeout: config.coordination.request_timeout(),
        }
    }
}

#[derive(Serialize)]
struct PresentRequest<'a> {
    hostname: &'a str,
    namespace: &'a str,
    token: &'a str,
}

#[derive(Serialize)]
struct CleanupRequest<'a> {
    hostname: &'a str,
    namespace: &'a str,
}

/// Publishes DNS-01 challenge records through the coordination service
pub struct DnsChallengeRelay {
    client: reqwest::Client,
    endpoint: Url,
    api_token: Option<String>,
    base_domain: String,
}

impl DnsChallengeRelay {
    pub fn new(config: RelayConfig) -> Result<Self, RelayError> {
        let endpoint = Url::parse(&format!(
            "{}{}",
            config.coordination_url.trim_end_matches('/'),
            CHALLENGE_PATH
        ))?;

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            client,
            endpoint,
            api_token: config.api_token.filter(|token| !token.is_empty()),
            base_domain: config.base_domain,
        })
    }

    pub fn base_domain(&self) -> &str {
        &self.base_domain
    }

    /// Split a challenge domain under this relay's base domain
    pub fn parse_domain(&self, domain: &str) -> Result<EndpointName, RelayError> {
        parse_challenge_domain(domain, &self.base_domain)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Publish the challenge record for `domain`
    pub async fn present(
        &self,
        domain: &str,
        _token: &str,
        key_authorization: &str,
    ) -> Result<(), RelayError> {
        let name = self.parse_domain(domain)?;

        debug!(
            domain = %domain,
            leaf = %name.leaf,
            namespace = %name.namespace,
            "Publishing DNS-01 challenge via coordination service"
        );

        let body = PresentRequest {
            hostname: &name.leaf,
            namespace: &name.namespace,
            token: key_authorization,
        };

        let response = self
            .authorize(self.client.post(self.endpoint.clone()))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read body>".to_string());
            return Err(RelayError::Status {
                status: status.as_u16(),
                body,
            });
        }

        info!(
            leaf = %name.leaf,
            namespace = %name.namespace,
            "DNS-01 challenge published"
        );
        Ok(())
    }

    /// Remove the challenge record for `domain`, ignoring failures
    pub async fn clean_up(&self, domain: &str, _token: &str, _key_authorization: &str) {
        let name = match self.parse_domain(domain) {
            Ok(name) => name,
            Err(e) => {
                debug!(domain = %domain, error = %e, "Skipping challenge cleanup");
                return;
            }
        };

        let body = CleanupRequest {
            hostname: &name.leaf,
            namespace: &name.namespace,
        };

        match self
            .authorize(self.client.delete(self.endpoint.clone()))
            .json(&body)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => {
                debug!(
                    leaf = %name.leaf,
                    namespace = %name.namespace,
                    "DNS-01 challenge removed"
                );
            }
            Ok(response) => {
                warn!(
                    leaf = %name.leaf,
                    namespace = %name.namespace,
                    status = response.status().as_u16(),
                    "Coordination service refused challenge cleanup"
                );
            }
            Err(e) => {
                warn!(
                    leaf = %name.leaf,
                    namespace = %name.namespace,
                    error = %e,
                    "Challenge cleanup request failed"
                );
            }
        }
    }

    /// Propagation timeout and poll interval
    pub fn timeout(&self) -> (Duration, Duration) {
        (DNS_PROPAGATION_TIMEOUT, PROPAGATION_POLL_INTERVAL)
    }
}

impl std::fmt::Debug for DnsChallengeRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DnsChallengeRelay")
            .field("endpoint", &self.endpoint.as_str())
            .field("base_domain", &self.base_domain)
            .field("has_api_token", &self.api_token.is_some())
            .finish()
    }
}

#[async_trait]
impl Dns01Solver for DnsChallengeRelay {
    async fn present(
        &self,
        domain: &str,
        token: &str,
        key_authorization: &str,
    ) -> Result<(), RelayError> {
        DnsChallengeRelay::present(self, domain, token, key_authorization).await
    }

    async fn clean_up(&self, domain: &str, token: &str, key_authorization: &str) {
        DnsChallengeRelay::clean_up(self, domain, token, key_authorization).await
    }

    fn timeout(&self) -> (Duration, Duration) {
        DnsChallengeRelay::timeout(self)
    }
}
