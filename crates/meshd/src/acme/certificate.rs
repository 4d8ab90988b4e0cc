//! Parsed certificate entries.

use std::fmt;
use std::io::BufReader;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rustls::pki_types::CertificateDer;
use rustls::sign::CertifiedKey;
use rustls::InconsistentKeys;
use x509_parser::extensions::GeneralName;
use x509_parser::prelude::*;

use super::error::CertificateError;

/// A certificate chain and its private key, ready for TLS
///
/// Entries are immutable. Replacing a hostname's certificate swaps the whole
/// `Arc<CertificateEntry>`, so a reader never sees a chain paired with the
/// wrong key.
pub struct CertificateEntry {
    chain: Vec<CertificateDer<'static>>,
    cert_pem: String,
    key_pem: String,
    not_after: DateTime<Utc>,
    dns_names: Vec<String>,
    certified: Arc<CertifiedKey>,
}

impl CertificateEntry {
    /// Parse a PEM chain (leaf first) and its PEM private key
    ///
    /// The key must belong to the leaf certificate.
    pub fn from_pem(cert_pem: &str, key_pem: &str) -> Result<Self, CertificateError> {
        let chain = rustls_pemfile::certs(&mut BufReader::new(cert_pem.as_bytes()))
            .collect::<Result<Vec<_>, _>>()?;
        let leaf = chain.first().ok_or(CertificateError::NoCertificates)?;

        let key = rustls_pemfile::private_key(&mut BufReader::new(key_pem.as_bytes()))?
            .ok_or(CertificateError::NoPrivateKey)?;

        let (not_after, dns_names) = inspect_leaf(leaf)?;

        let signing_key = rustls::crypto::aws_lc_rs::sign::any_supported_type(&key)
            .map_err(|e| CertificateError::UnsupportedKey(e.to_string()))?;
        let certified = CertifiedKey::new(chain.clone(), signing_key);
        match certified.keys_match() {
            Ok(()) | Err(rustls::Error::InconsistentKeys(InconsistentKeys::Unknown)) => {}
            Err(rustls::Error::InconsistentKeys(InconsistentKeys::KeyMismatch)) => {
                return Err(CertificateError::KeyMismatch)
            }
            Err(e) => return Err(CertificateError::X509(e.to_string())),
        }
        let certified = Arc::new(certified);

        Ok(Self {
            chain,
            cert_pem: cert_pem.to_string(),
            key_pem: key_pem.to_string(),
            not_after,
            dns_names,
            certified,
        })
    }

    /// DER chain, leaf first
    pub fn chain(&self) -> &[CertificateDer<'static>] {
        &self.chain
    }

    pub fn cert_pem(&self) -> &str {
        &self.cert_pem
    }

    pub fn key_pem(&self) -> &str {
        &self.key_pem
    }

    /// Leaf certificate's `notAfter`
    pub fn not_after(&self) -> DateTime<Utc> {
        self.not_after
    }

    /// Validity left at `now` (negative once expired)
    pub fn remaining_at(&self, now: DateTime<Utc>) -> chrono::Duration {
        self.not_after - now
    }

    /// DNS subject alternative names of the leaf
    pub fn dns_names(&self) -> &[String] {
        &self.dns_names
    }

    /// Whether the leaf names `hostname`
    pub fn covers(&self, hostname: &str) -> bool {
        self.dns_names
            .iter()
            .any(|name| name.eq_ignore_ascii_case(hostname))
    }

    /// Signing material for the TLS handshake
    pub fn certified_key(&self) -> Arc<CertifiedKey> {
        Arc::clone(&self.certified)
    }
}

impl fmt::Debug for CertificateEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateEntry")
            .field("dns_names", &self.dns_names)
            .field("not_after", &self.not_after)
            .field("chain_len", &self.chain.len())
            .finish()
    }
}

fn inspect_leaf(leaf: &CertificateDer<'_>) -> Result<(DateTime<Utc>, Vec<String>), CertificateError> {
    let (_, cert) = parse_x509_certificate(leaf.as_ref())
        .map_err(|e| CertificateError::X509(e.to_string()))?;

    let timestamp = cert.validity().not_after.timestamp();
    let not_after = DateTime::from_timestamp(timestamp, 0)
        .ok_or_else(|| CertificateError::X509(format!("notAfter out of range: {}", timestamp)))?;

    let mut dns_names = Vec::new();
    if let Ok(Some(san)) = cert.subject_alternative_name() {
        for name in &san.value.general_names {
            if let GeneralName::DNSName(dns) = name {
                dns_names.push(dns.to_string());
            }
        }
    }

    Ok((not_after, dns_names))
}
