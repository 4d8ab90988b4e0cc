//! ACME certificate management for mesh endpoints
//!
//! Issues and renews publicly trusted certificates for names under the mesh
//! base domain (`<leaf>.<namespace>.<base>`), proving control through DNS-01
//! challenges that the coordination service publishes on our behalf.
//!
//! # Architecture
//!
//! - [`CertificateStore`] - In-memory hostname map consulted on every handshake
//! - [`CertificateStorage`] - Persistent storage for certificates and the account
//! - [`DnsChallengeRelay`] - Forwards DNS-01 challenges to the coordination service
//! - [`AcmeClient`] - Wrapper around `instant-acme` for ACME protocol operations
//! - [`CertManager`] - Resolves certificate requests from store, disk or CA
//! - [`RenewalScheduler`] - Background task running the renewal sweep
//!
//! # Example
//!
//! ```kdl
//! acme {
//!     email "ops@example.com"
//!     base-domain "enbox.id"
//! }
//!
//! coordination {
//!     url "https://coord.example.com"
//! }
//! ```
//!
//! # Challenge Flow
//!
//! When a certificate needs to be obtained or renewed:
//!
//! 1. [`AcmeClient`] creates an order for the single hostname
//! 2. The CA hands out a DNS-01 challenge for `_acme-challenge.<hostname>`
//! 3. [`DnsChallengeRelay`] asks the coordination service to publish the TXT record
//! 4. Once the record is visible in DNS the CA is told to validate
//! 5. The record is removed again, whatever the outcome
//! 6. The order is finalized with a fresh P-256 key
//! 7. [`CertManager`] persists the certificate and swaps it into the store

mod account;
mod authority;
mod certificate;
mod client;
mod error;
mod manager;
mod propagation;
mod relay;
mod scheduler;
mod storage;
mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use account::{load_or_create_account_key, AccountKey, KeySource, Registration};
pub use authority::{AccountBinding, CertificateAuthority, Dns01Solver, IssuedCertificate};
pub use certificate::CertificateEntry;
pub use client::{AcmeClient, REQUEST_TIMEOUT};
pub use error::{AcmeError, CertificateError, RelayError, StorageError};
pub use manager::{needs_renewal_at, CertManager, ManagerSettings, RENEWAL_THRESHOLD_DAYS};
pub use propagation::PropagationChecker;
pub use relay::{
    endpoint_hostname, parse_challenge_domain, DnsChallengeRelay, EndpointName, RelayConfig,
    CHALLENGE_PATH, PROPAGATION_POLL_INTERVAL,
};
pub use scheduler::{
    RenewalScheduler, RenewalSweep, SweepReport, DEFAULT_CHECK_INTERVAL, MAX_CHECK_INTERVAL,
};
pub use storage::{is_valid_hostname, CertificateStorage, StoredCertificate};
pub use store::{CertificateStore, MemoryCertStore};
