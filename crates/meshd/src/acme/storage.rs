//! Certificate and account storage for ACME
//!
//! Provides persistent storage for the ACME account and issued certificates.
//!
//! # Directory Structure
//!
//! ```text
//! storage/
//! ├── acme-account.key      # ACME account key (PEM PKCS#8, P-256)
//! ├── acme-account.json     # Registration reference from the CA
//! └── certs/
//!     ├── app1.alice.enbox.id.crt   # Certificate chain
//!     └── app1.alice.enbox.id.key   # Private key
//! ```
//!
//! Directories are created `0700` and secrets written `0600`. Every file is
//! written to a temporary sibling first and renamed into place.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, info, trace, warn};

use super::account::Registration;
use super::error::StorageError;

const ACCOUNT_KEY_FILE: &str = "acme-account.key";
const REGISTRATION_FILE: &str = "acme-account.json";
const CERTS_DIR: &str = "certs";
const CERT_EXT: &str = "crt";
const KEY_EXT: &str = "key";

/// A certificate as stored on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCertificate {
    /// PEM-encoded certificate chain
    pub cert_pem: String,
    /// PEM-encoded private key
    pub key_pem: String,
}

/// Whether `hostname` is a DNS name that is also safe as a file name
///
/// Labels are 1-63 characters of ASCII alphanumerics and inner hyphens, so
/// path separators and `..` never pass.
pub fn is_valid_hostname(hostname: &str) -> bool {
    if hostname.is_empty() || hostname.len() > 253 {
        return false;
    }

    hostname.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-')
    })
}

/// Certificate storage manager
///
/// Handles persistent storage of the ACME account and certificates.
/// Uses a simple filesystem-based storage with restrictive permissions.
#[derive(Debug)]
pub struct CertificateStorage {
    /// Base storage directory
    base_path: PathBuf,
}

impl CertificateStorage {
    /// Create a new certificate storage at the given path
    ///
    /// Creates the directory structure if it doesn't exist and sets
    /// restrictive permissions (0700 on Unix).
    pub fn new(base_path: &Path) -> Result<Self, StorageError> {
        let certs_path = base_path.join(CERTS_DIR);
        create_private_dir(base_path)?;
        create_private_dir(&certs_path)?;

        debug!(
            storage_path = %base_path.display(),
            "Initialized certificate storage"
        );

        Ok(Self {
            base_path: base_path.to_path_buf(),
        })
    }

    /// Get the storage base path
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn certs_path(&self) -> PathBuf {
        self.base_path.join(CERTS_DIR)
    }

    // =========================================================================
    // Account Operations
    // =========================================================================

    pub fn account_key_path(&self) -> PathBuf {
        self.base_path.join(ACCOUNT_KEY_FILE)
    }

    /// Load the PEM account key, if one was saved
    pub fn load_account_key(&self) -> Result<Option<String>, StorageError> {
        read_optional(&self.account_key_path())
    }

    /// Save the PEM account key (0600)
    pub fn save_account_key(&self, pem: &str) -> Result<(), StorageError> {
        write_private(&self.account_key_path(), pem.as_bytes())?;
        debug!("Saved ACME account key");
        Ok(())
    }

    /// Load the registration reference
    ///
    /// An unreadable record is treated as absent so the account is registered
    /// again instead of failing initialization.
    pub fn load_registration(&self) -> Result<Option<Registration>, StorageError> {
        let path = self.base_path.join(REGISTRATION_FILE);
        let Some(content) = read_optional(&path)? else {
            trace!("No stored ACME registration found");
            return Ok(None);
        };

        match serde_json::from_str::<Registration>(&content) {
            Ok(registration) => {
                debug!(
                    account_url = %registration.account_url,
                    directory = %registration.directory_url,
                    "Loaded ACME registration"
                );
                Ok(Some(registration))
            }
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "Ignoring unreadable ACME registration"
                );
                Ok(None)
            }
        }
    }

    /// Save the registration reference (0600)
    pub fn save_registration(&self, registration: &Registration) -> Result<(), StorageError> {
        let content = serde_json::to_string_pretty(registration)?;
        write_private(&self.base_path.join(REGISTRATION_FILE), content.as_bytes())?;

        info!(
            account_url = %registration.account_url,
            contact = ?registration.contact,
            "Saved ACME registration"
        );
        Ok(())
    }

    // =========================================================================
    // Certificate Operations
    // =========================================================================

    /// Paths of a hostname's certificate and key files
    pub fn certificate_paths(&self, hostname: &str) -> Result<(PathBuf, PathBuf), StorageError> {
        if !is_valid_hostname(hostname) {
            return Err(StorageError::InvalidHostname(hostname.to_string()));
        }

        let certs_path = self.certs_path();
        Ok((
            certs_path.join(format!("{}.{}", hostname, CERT_EXT)),
            certs_path.join(format!("{}.{}", hostname, KEY_EXT)),
        ))
    }

    /// Load the stored certificate for a hostname
    pub fn load_certificate(&self, hostname: &str) -> Result<Option<StoredCertificate>, StorageError> {
        let (cert_path, key_path) = self.certificate_paths(hostname)?;

        let Some(cert_pem) = read_optional(&cert_path)? else {
            trace!(hostname = %hostname, "No stored certificate found");
            return Ok(None);
        };
        let Some(key_pem) = read_optional(&key_path)? else {
            warn!(hostname = %hostname, "Stored certificate has no key file");
            return Ok(None);
        };

        debug!(hostname = %hostname, "Loaded stored certificate");
        Ok(Some(StoredCertificate { cert_pem, key_pem }))
    }

    /// Save the certificate and key for a hostname
    ///
    /// The key is written first so a reader never finds a new chain next to
    /// an old key that was never replaced.
    pub fn save_certificate(
        &self,
        hostname: &str,
        cert_pem: &str,
        key_pem: &str,
    ) -> Result<(), StorageError> {
        let (cert_path, key_path) = self.certificate_paths(hostname)?;

        write_private(&key_path, key_pem.as_bytes())?;
        write_atomic(&cert_path, cert_pem.as_bytes(), 0o644)?;

        info!(
            hostname = %hostname,
            path = %cert_path.display(),
            "Saved certificate to storage"
        );
        Ok(())
    }

    /// List hostnames with a stored certificate
    pub fn list_hostnames(&self) -> Result<Vec<String>, StorageError> {
        let certs_path = self.certs_path();

        if !certs_path.exists() {
            return Ok(Vec::new());
        }

        let mut hostnames = Vec::new();
        for entry in fs::read_dir(&certs_path)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(CERT_EXT) {
                continue;
            }
            match path.file_stem().and_then(|s| s.to_str()) {
                Some(hostname) if is_valid_hostname(hostname) => hostnames.push(hostname.to_string()),
                _ => trace!(path = %path.display(), "Skipping unrecognized file in certs directory"),
            }
        }

        hostnames.sort();
        Ok(hostnames)
    }
}

fn create_private_dir(path: &Path) -> Result<(), StorageError> {
    fs::create_dir_all(path)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o700))?;
    }

    Ok(())
}

fn read_optional(path: &Path) -> Result<Option<String>, StorageError> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn write_private(path: &Path, contents: &[u8]) -> Result<(), StorageError> {
    write_atomic(path, contents, 0o600)
}

/// Write `contents` to a temporary sibling, then rename it over `path`
#[cfg_attr(not(unix), allow(unused_variables))]
fn write_atomic(path: &Path, contents: &[u8], mode: u32) -> Result<(), StorageError> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| StorageError::InvalidHostname(path.display().to_string()))?;
    let temp_path = path.with_file_name(format!(".{}.tmp", file_name));

    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(mode);
    }

    let result = (|| {
        let mut file = options.open(&temp_path)?;
        file.write_all(contents)?;
        file.sync_all()?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&temp_path, fs::Permissions::from_mode(mode))?;
        }

        fs::rename(&temp_path, path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result.map_err(StorageError::from)
}
