//! Test fixtures shared by the unit tests.

use std::sync::Arc;

use rcgen::{CertificateParams, KeyPair, PKCS_ECDSA_P256_SHA256};

use super::certificate::CertificateEntry;

/// Self-signed P-256 certificate for `hostname` valid for `days` more days
pub fn self_signed(hostname: &str, days: i64) -> (String, String) {
    let key = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256).unwrap();
    let mut params = CertificateParams::new(vec![hostname.to_string()]).unwrap();
    params.not_before = time::OffsetDateTime::now_utc() - time::Duration::days(1);
    params.not_after = time::OffsetDateTime::now_utc() + time::Duration::days(days);
    let cert = params.self_signed(&key).unwrap();
    (cert.pem(), key.serialize_pem())
}

pub fn entry(hostname: &str, days: i64) -> Arc<CertificateEntry> {
    let (cert_pem, key_pem) = self_signed(hostname, days);
    Arc::new(CertificateEntry::from_pem(&cert_pem, &key_pem).unwrap())
}
