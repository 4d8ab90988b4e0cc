//! Error types for certificate management.

use std::time::Duration;

use thiserror::Error;

/// Errors from certificate issuance and the ACME account lifecycle
#[derive(Debug, Error)]
pub enum AcmeError {
    /// Hostname is not a usable certificate name
    #[error("invalid hostname '{0}'")]
    InvalidHostname(String),

    /// The certificate authority has no bound account yet
    #[error("ACME account is not registered")]
    NotRegistered,

    /// ACME protocol error reported by the client library or the CA
    #[error("ACME protocol error: {0}")]
    Protocol(#[from] instant_acme::Error),

    /// A single CA request did not complete in time
    #[error("ACME request '{operation}' timed out after {after:?}")]
    RequestTimeout {
        operation: &'static str,
        after: Duration,
    },

    /// No usable DNS-01 challenge, or the CA rejected it
    #[error("challenge failed: {0}")]
    Challenge(String),

    /// The published TXT record never became visible
    #[error("DNS record {record} not visible after {after:?}")]
    PropagationTimeout { record: String, after: Duration },

    /// The order ended in a state other than valid
    #[error("order failed: {0}")]
    OrderFailed(String),

    /// The full issuance for a hostname exceeded its bound
    #[error("issuance for {hostname} timed out after {after:?}")]
    IssuanceTimeout { hostname: String, after: Duration },

    /// The issued certificate does not name the requested hostname
    #[error("issued certificate does not cover {0}")]
    HostnameMismatch(String),

    /// Registration data could not be used to restore the account
    #[error("invalid account registration: {0}")]
    InvalidRegistration(String),

    /// DNS challenge relay failure
    #[error(transparent)]
    Relay(#[from] RelayError),

    /// Certificate or key material could not be parsed or generated
    #[error(transparent)]
    Certificate(#[from] CertificateError),

    /// Persistent storage failure
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors from the coordination service relay
#[derive(Debug, Error)]
pub enum RelayError {
    /// Challenge domain is not a mesh endpoint name
    #[error("invalid challenge domain '{domain}': {reason}")]
    InvalidDomain { domain: String, reason: String },

    /// Coordination service URL could not be parsed
    #[error("invalid coordination URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Transport failure talking to the coordination service
    #[error("coordination request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Coordination service answered with a non-success status
    #[error("coordination service returned {status}: {body}")]
    Status { status: u16, body: String },
}

/// Errors parsing or generating certificate material
#[derive(Debug, Error)]
pub enum CertificateError {
    /// PEM input could not be read
    #[error("failed to read PEM: {0}")]
    Pem(#[from] std::io::Error),

    /// PEM input has no certificates
    #[error("no certificates found in PEM")]
    NoCertificates,

    /// PEM input has no private key
    #[error("no private key found in PEM")]
    NoPrivateKey,

    /// Leaf certificate is not valid X.509
    #[error("failed to parse certificate: {0}")]
    X509(String),

    /// Private key type is not usable for TLS signing
    #[error("unsupported private key: {0}")]
    UnsupportedKey(String),

    /// Private key does not belong to the leaf certificate
    #[error("private key does not match the leaf certificate")]
    KeyMismatch,

    /// Key or CSR generation failed
    #[error("key generation failed: {0}")]
    KeyGeneration(#[from] rcgen::Error),
}

/// Errors from on-disk storage
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Hostname would not map to a safe file name
    #[error("invalid hostname for storage '{0}'")]
    InvalidHostname(String),
}
