//! Certificate store implementations.

mod memory;

pub use memory::MemoryCertStore;

use std::sync::Arc;

use super::certificate::CertificateEntry;

/// Hostname to certificate map consulted on every TLS handshake.
///
/// All methods are synchronous and must not block on I/O. Hostnames are
/// compared exactly as presented by SNI.
pub trait CertificateStore: Send + Sync {
    /// Certificate for `hostname`, if one is loaded.
    fn lookup(&self, hostname: &str) -> Option<Arc<CertificateEntry>>;

    /// Insert or atomically replace the certificate for `hostname`.
    fn set(&self, hostname: &str, entry: Arc<CertificateEntry>);

    fn has(&self, hostname: &str) -> bool;

    fn delete(&self, hostname: &str);

    /// Snapshot of loaded hostnames, unordered.
    fn list_hostnames(&self) -> Vec<String>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
