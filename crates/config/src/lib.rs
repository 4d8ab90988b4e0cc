//! Configuration for the Dex mesh certificate daemon.
//!
//! Configuration is written in KDL:
//!
//! ```kdl
//! state-dir "/var/lib/dex/mesh"
//!
//! acme {
//!     enabled #true
//!     email "ops@example.com"
//!     staging #true
//!     base-domain "enbox.id"
//! }
//!
//! coordination {
//!     url "https://central.example.com"
//!     api-token "secret"
//! }
//!
//! endpoints {
//!     endpoint "app1" namespace="alice"
//!     endpoint namespace="alice"
//! }
//! ```
//!
//! Every block is optional; missing values fall back to the `default_*`
//! functions in this crate.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

mod kdl;
mod validate;

pub use validate::{ErrorCategory, ValidationError};

/// Default base domain under which mesh endpoints are published
pub const DEFAULT_BASE_DOMAIN: &str = "enbox.id";

/// Let's Encrypt production directory
pub const LETSENCRYPT_PRODUCTION: &str = "https://acme-v02.api.letsencrypt.org/directory";

/// Let's Encrypt staging directory
pub const LETSENCRYPT_STAGING: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";

/// DNS propagation wait the challenge relay reports to the ACME client
pub const DNS_PROPAGATION_TIMEOUT: Duration = Duration::from_secs(180);

/// Longest accepted renewal check interval (30 days)
pub const MAX_RENEWAL_CHECK_INTERVAL: Duration = Duration::from_secs(30 * 24 * 3600);

/// Top-level daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Node state directory
    pub state_dir: PathBuf,
    /// ACME certificate management
    pub acme: AcmeConfig,
    /// Coordination service used for DNS-01 challenges
    pub coordination: CoordinationConfig,
    /// Endpoints to pre-obtain certificates for at startup
    pub endpoints: Vec<EndpointConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            acme: AcmeConfig::default(),
            coordination: CoordinationConfig::default(),
            endpoints: Vec::new(),
        }
    }
}

/// ACME certificate management settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AcmeConfig {
    /// Whether TLS is terminated locally with ACME certificates
    pub enabled: bool,
    /// Contact email for the ACME account
    pub email: String,
    /// Use the Let's Encrypt staging environment
    pub staging: bool,
    /// Explicit ACME directory URL (overrides `staging`)
    pub directory_url: Option<String>,
    /// Directory for account and certificate files (defaults to `state_dir`)
    pub cert_dir: Option<PathBuf>,
    /// Base domain under which endpoints are published
    pub base_domain: String,
    /// How often the renewal sweep runs
    pub renewal_check_interval_secs: u64,
    /// Upper bound on a single certificate issuance
    pub issuance_timeout_secs: u64,
}

impl Default for AcmeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            email: String::new(),
            staging: false,
            directory_url: None,
            cert_dir: None,
            base_domain: DEFAULT_BASE_DOMAIN.to_string(),
            renewal_check_interval_secs: default_renewal_check_interval(),
            issuance_timeout_secs: default_issuance_timeout(),
        }
    }
}

impl AcmeConfig {
    /// ACME directory the account lives in
    pub fn directory_url(&self) -> &str {
        match &self.directory_url {
            Some(url) => url,
            None if self.staging => LETSENCRYPT_STAGING,
            None => LETSENCRYPT_PRODUCTION,
        }
    }

    /// Directory holding the account key and `certs/`
    pub fn storage_dir<'a>(&'a self, state_dir: &'a Path) -> &'a Path {
        self.cert_dir.as_deref().unwrap_or(state_dir)
    }

    pub fn renewal_check_interval(&self) -> Duration {
        Duration::from_secs(self.renewal_check_interval_secs)
    }

    pub fn issuance_timeout(&self) -> Duration {
        Duration::from_secs(self.issuance_timeout_secs)
    }
}

/// Coordination service settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CoordinationConfig {
    /// Base URL, e.g. `https://central.example.com`
    pub url: String,
    /// Bearer token for the coordination API
    #[serde(skip_serializing)]
    pub api_token: Option<String>,
    /// Timeout for each coordination API call
    pub request_timeout_secs: u64,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_token: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl CoordinationConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// A published endpoint, `<hostname>.<namespace>.<base-domain>`
///
/// An empty `hostname` denotes the namespace-level name
/// `<namespace>.<base-domain>`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EndpointConfig {
    pub hostname: String,
    pub namespace: String,
}

pub fn default_state_dir() -> PathBuf {
    PathBuf::from("/var/lib/dex/mesh")
}

pub fn default_renewal_check_interval() -> u64 {
    12 * 3600
}

pub fn default_issuance_timeout() -> u64 {
    300
}

pub fn default_request_timeout() -> u64 {
    30
}

impl Config {
    /// Load configuration from a KDL file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file {}", path.display()))?;

        debug!(path = %path.display(), bytes = content.len(), "Read configuration file");

        Self::from_kdl(&content)
            .with_context(|| format!("Failed to parse configuration file {}", path.display()))
    }

    /// Parse configuration from KDL source
    pub fn from_kdl(source: &str) -> Result<Self> {
        kdl::parse_config(source)
    }

    /// Validate the configuration
    ///
    /// Returns every problem found rather than stopping at the first.
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        validate::validate_config(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directory_url_selection() {
        let mut acme = AcmeConfig::default();
        assert_eq!(acme.directory_url(), LETSENCRYPT_PRODUCTION);

        acme.staging = true;
        assert_eq!(acme.directory_url(), LETSENCRYPT_STAGING);

        acme.directory_url = Some("https://localhost:14000/dir".to_string());
        assert_eq!(acme.directory_url(), "https://localhost:14000/dir");
    }

    #[test]
    fn test_storage_dir_defaults_to_state_dir() {
        let state_dir = PathBuf::from("/var/lib/dex/mesh");
        let mut acme = AcmeConfig::default();
        assert_eq!(acme.storage_dir(&state_dir), state_dir.as_path());

        acme.cert_dir = Some(PathBuf::from("/srv/certs"));
        assert_eq!(acme.storage_dir(&state_dir), Path::new("/srv/certs"));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("mesh.kdl");
        std::fs::write(
            &path,
            r#"
            state-dir "/tmp/mesh"
            acme {
                email "ops@example.com"
            }
            "#,
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.state_dir, PathBuf::from("/tmp/mesh"));
        assert_eq!(config.acme.email, "ops@example.com");
        assert_eq!(config.acme.base_domain, DEFAULT_BASE_DOMAIN);
    }

    #[test]
    fn test_from_file_missing() {
        let err = Config::from_file("/nonexistent/mesh.kdl").unwrap_err();
        assert!(err.to_string().contains("Failed to read configuration file"));
    }
}
