//! Seams between the certificate manager and the outside world.
//!
//! [`CertificateAuthority`] is what the manager issues through; the
//! production implementation is [`AcmeClient`](super::AcmeClient).
//! [`Dns01Solver`] is the challenge contract a CA implementation drives; the
//! production implementation is [`DnsChallengeRelay`](super::DnsChallengeRelay).

use std::time::Duration;

use async_trait::async_trait;

use super::account::{AccountKey, Registration};
use super::error::{AcmeError, RelayError};

/// DNS-01 challenge contract
#[async_trait]
pub trait Dns01Solver: Send + Sync {
    /// Publish the proof for `domain` (`_acme-challenge.<hostname>`)
    async fn present(
        &self,
        domain: &str,
        token: &str,
        key_authorization: &str,
    ) -> Result<(), RelayError>;

    /// Remove the proof again. Never fails; problems are only logged.
    async fn clean_up(&self, domain: &str, token: &str, key_authorization: &str);

    /// Propagation timeout and poll interval the caller should wait out
    fn timeout(&self) -> (Duration, Duration);
}

/// Result of binding the account key to a CA account
#[derive(Debug, Clone)]
pub struct AccountBinding {
    /// Registration reference to persist
    pub registration: Registration,
    /// Set when the CA bound a different key than the one offered; the
    /// caller must persist it in place of the old key
    pub replacement_key: Option<AccountKey>,
}

/// A freshly issued certificate
#[derive(Debug, Clone)]
pub struct IssuedCertificate {
    /// PEM chain, leaf first
    pub chain_pem: String,
    /// PEM PKCS#8 private key matching the leaf
    pub key_pem: String,
}

/// Certificate authority the manager issues through
#[async_trait]
pub trait CertificateAuthority: Send + Sync {
    /// Directory URL of the CA, used to tell whether a stored registration
    /// belongs to it
    fn directory_url(&self) -> &str;

    /// Bind `key` to an account
    ///
    /// With an `existing` registration for this directory the account is
    /// restored without creating a new one.
    async fn register(
        &self,
        key: &AccountKey,
        existing: Option<&Registration>,
        contact: &str,
    ) -> Result<AccountBinding, AcmeError>;

    /// Issue a certificate for exactly `hostname`
    ///
    /// Every challenge presented through `solver` is cleaned up before this
    /// returns, whatever the outcome.
    async fn issue(
        &self,
        hostname: &str,
        solver: &dyn Dns01Solver,
    ) -> Result<IssuedCertificate, AcmeError>;
}
