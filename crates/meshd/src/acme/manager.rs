//! Certificate manager
//!
//! Ties the store, on-disk storage, DNS challenge relay and certificate
//! authority together. A certificate request is answered from the store when
//! possible, then from disk, and only then by issuing a new certificate.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dex_mesh_config::{Config, EndpointConfig};
use futures::future::join_all;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::account::{load_or_create_account_key, AccountKey, KeySource, Registration};
use super::authority::{CertificateAuthority, Dns01Solver};
use super::certificate::CertificateEntry;
use super::client::AcmeClient;
use super::error::AcmeError;
use super::relay::{endpoint_hostname, DnsChallengeRelay, RelayConfig};
use super::scheduler::{RenewalScheduler, RenewalSweep, SweepReport};
use super::storage::{is_valid_hostname, CertificateStorage};
use super::store::CertificateStore;

/// Certificates with this many days or fewer left are renewed
pub const RENEWAL_THRESHOLD_DAYS: i64 = 30;

/// Whether a certificate expiring at `not_after` is due for renewal at `now`
///
/// The boundary counts as due.
pub fn needs_renewal_at(not_after: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    not_after - now <= chrono::Duration::days(RENEWAL_THRESHOLD_DAYS)
}

/// Settings the manager runs with
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    /// Directory holding the account key and `certs/`
    pub storage_dir: PathBuf,
    /// ACME account contact email
    pub email: String,
    /// Base domain endpoints are published under
    pub base_domain: String,
    pub renewal_check_interval: Duration,
    /// Bound on one fresh issuance, including account setup
    pub issuance_timeout: Duration,
}

impl ManagerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            storage_dir: config.acme.storage_dir(&config.state_dir).to_path_buf(),
            email: config.acme.email.clone(),
            base_domain: config.acme.base_domain.clone(),
            renewal_check_interval: config.acme.renewal_check_interval(),
            issuance_timeout: config.acme.issuance_timeout(),
        }
    }
}

struct SweepTask {
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

/// Obtains, persists, serves and renews certificates per hostname
pub struct CertManager {
    settings: ManagerSettings,
    store: Arc<dyn CertificateStore>,
    storage: CertificateStorage,
    solver: Arc<dyn Dns01Solver>,
    authority: Arc<dyn CertificateAuthority>,
    /// Guards one-time account setup
    init_lock: Mutex<bool>,
    initialized: AtomicBool,
    /// One issuance at a time per hostname
    in_flight: DashMap<String, Arc<Mutex<()>>>,
    sweep_task: parking_lot::Mutex<Option<SweepTask>>,
}

impl CertManager {
    /// Manager for the given configuration, issuing through Let's Encrypt
    /// (or the configured directory) with challenges relayed through the
    /// coordination service
    pub fn new(config: &Config, store: Arc<dyn CertificateStore>) -> Result<Self, AcmeError> {
        let relay = DnsChallengeRelay::new(RelayConfig::from_config(config))?;
        let client = AcmeClient::new(config.acme.directory_url());

        Self::with_components(
            ManagerSettings::from_config(config),
            store,
            Arc::new(relay),
            Arc::new(client),
        )
    }

    /// Manager with explicit solver and certificate authority
    pub fn with_components(
        settings: ManagerSettings,
        store: Arc<dyn CertificateStore>,
        solver: Arc<dyn Dns01Solver>,
        authority: Arc<dyn CertificateAuthority>,
    ) -> Result<Self, AcmeError> {
        let storage = CertificateStorage::new(&settings.storage_dir)?;

        Ok(Self {
            settings,
            store,
            storage,
            solver,
            authority,
            init_lock: Mutex::new(false),
            initialized: AtomicBool::new(false),
            in_flight: DashMap::new(),
            sweep_task: parking_lot::Mutex::new(None),
        })
    }

    pub fn store(&self) -> &Arc<dyn CertificateStore> {
        &self.store
    }

    pub fn storage(&self) -> &CertificateStorage {
        &self.storage
    }

    pub fn base_domain(&self) -> &str {
        &self.settings.base_domain
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.sweep_task.lock().is_some()
    }

    /// Set up the ACME account; safe to call any number of times
    ///
    /// Loads or creates the account key and binds it to an account with the
    /// CA. A stored registration for the same directory is reused as long as
    /// the key it belongs to was loaded, not regenerated.
    pub async fn initialize(&self) -> Result<(), AcmeError> {
        let mut initialized = self.init_lock.lock().await;
        if *initialized {
            return Ok(());
        }

        let (key, source) = load_or_create_account_key(&self.storage)?;

        let existing = match source {
            KeySource::Loaded => self
                .storage
                .load_registration()?
                .filter(|r| r.directory_url == self.authority.directory_url()),
            KeySource::Generated => None,
        };

        let binding = self
            .authority
            .register(&key, existing.as_ref(), &self.settings.email)
            .await?;

        if existing.is_none() {
            self.persist_binding(&binding.registration, binding.replacement_key.as_ref());
        }

        *initialized = true;
        self.initialized.store(true, Ordering::Release);

        info!(
            directory = %self.authority.directory_url(),
            account_url = %binding.registration.account_url,
            "ACME certificate manager initialized"
        );
        Ok(())
    }

    fn persist_binding(
        &self,
        registration: &Registration,
        replacement_key: Option<&AccountKey>,
    ) {
        if let Some(key) = replacement_key {
            if let Err(e) = self.storage.save_account_key(key.pem()) {
                // A registration without its key would not restore; keep neither.
                warn!(error = %e, "Failed to persist ACME account key");
                return;
            }
        }

        if let Err(e) = self.storage.save_registration(registration) {
            warn!(error = %e, "Failed to persist ACME registration");
        }
    }

    /// Certificate for `hostname`, issuing one if needed
    ///
    /// On failure the store is left untouched, so a still-valid entry keeps
    /// being served.
    pub async fn obtain_cert(&self, hostname: &str) -> Result<Arc<CertificateEntry>, AcmeError> {
        if let Some(entry) = self.fresh_from_store(hostname) {
            return Ok(entry);
        }

        if !is_valid_hostname(hostname) {
            return Err(AcmeError::InvalidHostname(hostname.to_string()));
        }

        let lock = self
            .in_flight
            .entry(hostname.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let result = {
            let _guard = lock.lock().await;
            self.obtain_locked(hostname).await
        };

        self.in_flight
            .remove_if(hostname, |_, l| Arc::strong_count(l) <= 2);

        result
    }

    /// Certificate for `<leaf>.<namespace>.<base-domain>`
    pub async fn obtain_cert_for_endpoint(
        &self,
        leaf: &str,
        namespace: &str,
    ) -> Result<Arc<CertificateEntry>, AcmeError> {
        let hostname = endpoint_hostname(leaf, namespace, &self.settings.base_domain);
        self.obtain_cert(&hostname).await
    }

    fn fresh_from_store(&self, hostname: &str) -> Option<Arc<CertificateEntry>> {
        self.store
            .lookup(hostname)
            .filter(|entry| !self.should_renew(entry))
    }

    async fn obtain_locked(&self, hostname: &str) -> Result<Arc<CertificateEntry>, AcmeError> {
        // Another caller may have finished while we waited for the lock
        if let Some(entry) = self.fresh_from_store(hostname) {
            debug!(hostname = %hostname, "Certificate became available while waiting");
            return Ok(entry);
        }

        if let Some(entry) = self.load_from_disk(hostname) {
            if !self.should_renew(&entry) {
                self.store.set(hostname, Arc::clone(&entry));
                return Ok(entry);
            }
            info!(
                hostname = %hostname,
                not_after = %entry.not_after(),
                "Stored certificate expiring soon, renewing"
            );
        }

        let timeout = self.settings.issuance_timeout;
        match tokio::time::timeout(timeout, self.issue(hostname)).await {
            Ok(result) => result,
            Err(_) => Err(AcmeError::IssuanceTimeout {
                hostname: hostname.to_string(),
                after: timeout,
            }),
        }
    }

    fn load_from_disk(&self, hostname: &str) -> Option<Arc<CertificateEntry>> {
        let stored = match self.storage.load_certificate(hostname) {
            Ok(Some(stored)) => stored,
            Ok(None) => return None,
            Err(e) => {
                warn!(hostname = %hostname, error = %e, "Failed to read stored certificate");
                return None;
            }
        };

        match CertificateEntry::from_pem(&stored.cert_pem, &stored.key_pem) {
            Ok(entry) => Some(Arc::new(entry)),
            Err(e) => {
                warn!(hostname = %hostname, error = %e, "Ignoring unparsable stored certificate");
                None
            }
        }
    }

    async fn issue(&self, hostname: &str) -> Result<Arc<CertificateEntry>, AcmeError> {
        self.initialize().await?;

        info!(hostname = %hostname, "Requesting certificate");
        let issued = self.authority.issue(hostname, self.solver.as_ref()).await?;

        let entry = CertificateEntry::from_pem(&issued.chain_pem, &issued.key_pem)?;
        if !entry.covers(hostname) {
            return Err(AcmeError::HostnameMismatch(hostname.to_string()));
        }
        let entry = Arc::new(entry);

        if let Err(e) = self
            .storage
            .save_certificate(hostname, &issued.chain_pem, &issued.key_pem)
        {
            warn!(hostname = %hostname, error = %e, "Failed to persist certificate");
        }

        self.store.set(hostname, Arc::clone(&entry));
        info!(
            hostname = %hostname,
            not_after = %entry.not_after(),
            "Certificate obtained"
        );
        Ok(entry)
    }

    /// Whether `entry` has 30 days or less of validity left
    pub fn should_renew(&self, entry: &CertificateEntry) -> bool {
        needs_renewal_at(entry.not_after(), Utc::now())
    }

    /// Load every certificate on disk into the store
    ///
    /// Expiring certificates are loaded too so the next sweep renews them.
    /// Returns how many were loaded.
    pub fn load_persisted(&self) -> Result<usize, AcmeError> {
        let mut loaded = 0;
        for hostname in self.storage.list_hostnames()? {
            if let Some(entry) = self.load_from_disk(&hostname) {
                self.store.set(&hostname, entry);
                loaded += 1;
            }
        }

        info!(count = loaded, "Loaded persisted certificates");
        Ok(loaded)
    }

    /// Renew every stored certificate that is due, concurrently
    pub async fn check_renewals(&self) -> SweepReport {
        let hostnames = self.store.list_hostnames();
        let due: Vec<String> = hostnames
            .iter()
            .filter(|hostname| {
                self.store
                    .lookup(hostname)
                    .is_some_and(|entry| self.should_renew(&entry))
            })
            .cloned()
            .collect();

        info!(
            checked = hostnames.len(),
            due = due.len(),
            "Checking certificates for renewal"
        );

        let results = join_all(due.iter().map(|hostname| async move {
            let result = self.obtain_cert(hostname).await;
            (hostname, result)
        }))
        .await;

        let mut report = SweepReport {
            checked: hostnames.len(),
            ..SweepReport::default()
        };
        for (hostname, result) in results {
            match result {
                Ok(_) => {
                    info!(hostname = %hostname, "Certificate renewed");
                    report.renewed += 1;
                }
                Err(e) => {
                    error!(hostname = %hostname, error = %e, "Certificate renewal failed");
                    report.failed += 1;
                }
            }
        }

        report
    }

    /// Start the periodic renewal sweep; no-op when already running
    pub fn start(self: &Arc<Self>) {
        let mut slot = self.sweep_task.lock();
        if slot.is_some() {
            return;
        }

        let shutdown = CancellationToken::new();
        let target: Arc<dyn RenewalSweep> = Arc::clone(self) as Arc<dyn RenewalSweep>;
        let scheduler = RenewalScheduler::new(target, shutdown.clone())
            .with_interval(self.settings.renewal_check_interval);
        let handle = tokio::spawn(scheduler.run());

        *slot = Some(SweepTask { shutdown, handle });
    }

    /// Stop the renewal sweep and wait for it to finish; no-op when stopped
    pub async fn stop(&self) {
        let task = self.sweep_task.lock().take();
        if let Some(task) = task {
            task.shutdown.cancel();
            if let Err(e) = task.handle.await {
                warn!(error = %e, "Renewal scheduler task ended abnormally");
            }
        }
    }

    /// Obtain certificates for configured endpoints in the background
    ///
    /// Failures are logged only; the endpoints are retried on demand.
    pub fn prewarm(self: &Arc<Self>, endpoints: Vec<EndpointConfig>) -> JoinHandle<()> {
        let manager = Arc::clone(self);

        tokio::spawn(async move {
            let attempts = endpoints.iter().map(|endpoint| {
                let manager = &manager;
                async move {
                    match manager
                        .obtain_cert_for_endpoint(&endpoint.hostname, &endpoint.namespace)
                        .await
                    {
                        Ok(entry) => debug!(
                            hostname = %endpoint.hostname,
                            namespace = %endpoint.namespace,
                            not_after = %entry.not_after(),
                            "Pre-obtained endpoint certificate"
                        ),
                        Err(e) => warn!(
                            hostname = %endpoint.hostname,
                            namespace = %endpoint.namespace,
                            error = %e,
                            "Failed to pre-obtain endpoint certificate"
                        ),
                    }
                }
            });
            join_all(attempts).await;
        })
    }
}

#[async_trait]
impl RenewalSweep for CertManager {
    async fn sweep(&self) -> SweepReport {
        self.check_renewals().await
    }
}

impl std::fmt::Debug for CertManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertManager")
            .field("storage_dir", &self.settings.storage_dir)
            .field("base_domain", &self.settings.base_domain)
            .field("initialized", &self.is_initialized())
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acme::authority::{AccountBinding, IssuedCertificate};
    use crate::acme::error::RelayError;
    use crate::acme::store::MemoryCertStore;
    use crate::acme::testing::{entry, self_signed};
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    #[derive(Default)]
    struct NullSolver;

    #[async_trait]
    impl Dns01Solver for NullSolver {
        async fn present(&self, _: &str, _: &str, _: &str) -> Result<(), RelayError> {
            Ok(())
        }

        async fn clean_up(&self, _: &str, _: &str, _: &str) {}

        fn timeout(&self) -> (Duration, Duration) {
            (Duration::from_secs(180), Duration::from_secs(10))
        }
    }

    #[derive(Default)]
    struct FakeAuthority {
        registrations: AtomicUsize,
        issued: AtomicUsize,
        fail: AtomicBool,
    }

    #[async_trait]
    impl CertificateAuthority for FakeAuthority {
        fn directory_url(&self) -> &str {
            "https://ca.test/directory"
        }

        async fn register(
            &self,
            _key: &AccountKey,
            existing: Option<&Registration>,
            _contact: &str,
        ) -> Result<AccountBinding, AcmeError> {
            self.registrations.fetch_add(1, Ordering::SeqCst);
            let registration = existing.cloned().unwrap_or_else(|| Registration {
                account_url: "https://ca.test/acct/1".to_string(),
                directory_url: self.directory_url().to_string(),
                contact: None,
                created: Utc::now(),
            });
            Ok(AccountBinding {
                registration,
                replacement_key: None,
            })
        }

        async fn issue(
            &self,
            hostname: &str,
            _solver: &dyn Dns01Solver,
        ) -> Result<IssuedCertificate, AcmeError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(AcmeError::Challenge("rejected".to_string()));
            }
            self.issued.fetch_add(1, Ordering::SeqCst);
            let (chain_pem, key_pem) = self_signed(hostname, 90);
            Ok(IssuedCertificate { chain_pem, key_pem })
        }
    }

    fn manager(dir: &TempDir, authority: Arc<FakeAuthority>) -> CertManager {
        let settings = ManagerSettings {
            storage_dir: dir.path().to_path_buf(),
            email: "ops@example.com".to_string(),
            base_domain: "example.com".to_string(),
            renewal_check_interval: Duration::from_secs(3600),
            issuance_timeout: Duration::from_secs(300),
        };
        CertManager::with_components(
            settings,
            Arc::new(MemoryCertStore::new()),
            Arc::new(NullSolver),
            authority,
        )
        .unwrap()
    }

    #[test]
    fn test_renewal_threshold() {
        let now = Utc::now();
        assert!(needs_renewal_at(now + chrono::Duration::days(10), now));
        assert!(needs_renewal_at(now + chrono::Duration::days(29), now));
        assert!(needs_renewal_at(now + chrono::Duration::days(30), now));
        assert!(!needs_renewal_at(now + chrono::Duration::days(31), now));
        assert!(!needs_renewal_at(now + chrono::Duration::days(60), now));
        assert!(needs_renewal_at(now - chrono::Duration::days(1), now));
    }

    #[test]
    fn test_should_renew_entries() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir, Arc::new(FakeAuthority::default()));
        assert!(manager.should_renew(&entry("a.alice.example.com", 10)));
        assert!(!manager.should_renew(&entry("a.alice.example.com", 60)));
    }

    #[tokio::test]
    async fn test_fast_path_skips_authority() {
        let dir = TempDir::new().unwrap();
        let authority = Arc::new(FakeAuthority::default());
        let manager = manager(&dir, authority.clone());

        let cached = entry("app1.alice.example.com", 60);
        manager.store().set("app1.alice.example.com", Arc::clone(&cached));

        let found = manager.obtain_cert("app1.alice.example.com").await.unwrap();
        assert!(Arc::ptr_eq(&found, &cached));
        assert_eq!(authority.issued.load(Ordering::SeqCst), 0);
        assert!(!manager.is_initialized());
    }

    #[tokio::test]
    async fn test_invalid_hostname_rejected_before_ca() {
        let dir = TempDir::new().unwrap();
        let authority = Arc::new(FakeAuthority::default());
        let manager = manager(&dir, authority.clone());

        let err = manager.obtain_cert("../../etc/passwd").await.unwrap_err();
        assert!(matches!(err, AcmeError::InvalidHostname(_)));
        assert_eq!(authority.registrations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failure_keeps_existing_entry() {
        let dir = TempDir::new().unwrap();
        let authority = Arc::new(FakeAuthority::default());
        authority.fail.store(true, Ordering::SeqCst);
        let manager = manager(&dir, authority.clone());

        let expiring = entry("app1.alice.example.com", 10);
        manager.store().set("app1.alice.example.com", Arc::clone(&expiring));

        assert!(manager.obtain_cert("app1.alice.example.com").await.is_err());
        let still = manager.store().lookup("app1.alice.example.com").unwrap();
        assert!(Arc::ptr_eq(&still, &expiring));
    }

    #[tokio::test]
    async fn test_registration_reused_after_restart() {
        let dir = TempDir::new().unwrap();

        let authority = Arc::new(FakeAuthority::default());
        manager(&dir, authority.clone()).initialize().await.unwrap();
        assert!(dir.path().join("acme-account.json").exists());

        let restarted = Arc::new(FakeAuthority::default());
        let manager = manager(&dir, restarted.clone());
        manager.initialize().await.unwrap();
        manager.initialize().await.unwrap();
        assert_eq!(restarted.registrations.load(Ordering::SeqCst), 1);
        assert!(manager.is_initialized());
    }

    #[tokio::test]
    async fn test_endpoint_hostname_composition() {
        let dir = TempDir::new().unwrap();
        let authority = Arc::new(FakeAuthority::default());
        let manager = manager(&dir, authority.clone());

        let entry = manager.obtain_cert_for_endpoint("", "alice").await.unwrap();
        assert!(entry.covers("alice.example.com"));
        assert!(manager.store().has("alice.example.com"));
        assert!(dir.path().join("certs/alice.example.com.crt").exists());
    }

    #[tokio::test]
    async fn test_start_stop_idempotent() {
        let dir = TempDir::new().unwrap();
        let manager = Arc::new(manager(&dir, Arc::new(FakeAuthority::default())));

        manager.stop().await;
        manager.start();
        manager.start();
        assert!(manager.is_running());
        manager.stop().await;
        manager.stop().await;
        assert!(!manager.is_running());
    }
}
