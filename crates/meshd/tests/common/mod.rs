//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rcgen::{CertificateParams, KeyPair, PKCS_ECDSA_P256_SHA256};

use dex_meshd::acme::{
    AccountBinding, AccountKey, AcmeError, CertManager, CertificateAuthority, CertificateEntry,
    Dns01Solver, IssuedCertificate, ManagerSettings, MemoryCertStore, Registration,
};

pub const DIRECTORY_URL: &str = "https://ca.test/directory";
pub const BASE_DOMAIN: &str = "example.com";

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

/// Certificate authority that signs nothing and counts everything
///
/// Issuance drives the solver the way a real CA client does: present the
/// challenge for `_acme-challenge.<hostname>`, then clean it up.
pub struct MockAuthority {
    pub registrations: AtomicUsize,
    pub issued: AtomicUsize,
    pub fail: AtomicBool,
    /// Validity of issued certificates in days
    pub validity_days: AtomicI64,
    /// Artificial issuance latency
    pub delay: Duration,
}

impl Default for MockAuthority {
    fn default() -> Self {
        Self {
            registrations: AtomicUsize::new(0),
            issued: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
            validity_days: AtomicI64::new(90),
            delay: Duration::ZERO,
        }
    }
}

impl MockAuthority {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn registrations(&self) -> usize {
        self.registrations.load(Ordering::SeqCst)
    }

    pub fn issued(&self) -> usize {
        self.issued.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CertificateAuthority for MockAuthority {
    fn directory_url(&self) -> &str {
        DIRECTORY_URL
    }

    async fn register(
        &self,
        _key: &AccountKey,
        existing: Option<&Registration>,
        contact: &str,
    ) -> Result<AccountBinding, AcmeError> {
        self.registrations.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;

        let registration = match existing {
            Some(registration) => registration.clone(),
            None => Registration {
                account_url: "https://ca.test/acct/1".to_string(),
                directory_url: DIRECTORY_URL.to_string(),
                contact: Some(contact.to_string()),
                created: Utc::now(),
            },
        };
        Ok(AccountBinding {
            registration,
            replacement_key: None,
        })
    }

    async fn issue(
        &self,
        hostname: &str,
        solver: &dyn Dns01Solver,
    ) -> Result<IssuedCertificate, AcmeError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(AcmeError::OrderFailed("order rejected".to_string()));
        }

        let domain = format!("_acme-challenge.{}", hostname);
        let presented = solver.present(&domain, "token-1", "token-1.thumbprint").await;
        solver
            .clean_up(&domain, "token-1", "token-1.thumbprint")
            .await;
        presented?;

        tokio::time::sleep(self.delay).await;
        self.issued.fetch_add(1, Ordering::SeqCst);

        let (chain_pem, key_pem) =
            self_signed(hostname, self.validity_days.load(Ordering::SeqCst));
        Ok(IssuedCertificate { chain_pem, key_pem })
    }
}

/// Solver that accepts every challenge
#[derive(Default)]
pub struct AcceptingSolver {
    pub presented: AtomicUsize,
    pub cleaned: AtomicUsize,
}

#[async_trait]
impl Dns01Solver for AcceptingSolver {
    async fn present(
        &self,
        _domain: &str,
        _token: &str,
        _key_authorization: &str,
    ) -> Result<(), dex_meshd::acme::RelayError> {
        self.presented.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn clean_up(&self, _domain: &str, _token: &str, _key_authorization: &str) {
        self.cleaned.fetch_add(1, Ordering::SeqCst);
    }

    fn timeout(&self) -> (Duration, Duration) {
        (Duration::from_secs(180), Duration::from_secs(10))
    }
}

pub fn settings(dir: &Path) -> ManagerSettings {
    ManagerSettings {
        storage_dir: dir.to_path_buf(),
        email: "ops@example.com".to_string(),
        base_domain: BASE_DOMAIN.to_string(),
        renewal_check_interval: Duration::from_secs(3600),
        issuance_timeout: Duration::from_secs(300),
    }
}

pub fn manager_with(
    dir: &Path,
    solver: Arc<dyn Dns01Solver>,
    authority: Arc<MockAuthority>,
) -> Arc<CertManager> {
    Arc::new(
        CertManager::with_components(
            settings(dir),
            Arc::new(MemoryCertStore::new()),
            solver,
            authority,
        )
        .unwrap(),
    )
}

pub fn manager(dir: &Path, authority: Arc<MockAuthority>) -> Arc<CertManager> {
    manager_with(dir, Arc::new(AcceptingSolver::default()), authority)
}
