//! In-memory certificate store.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::acme::certificate::CertificateEntry;
use crate::acme::store::CertificateStore;

/// Reader/writer-locked map of hostname to certificate entry.
///
/// Lookups take a shared lock and clone an `Arc`; writers hold the exclusive
/// lock only for the map update.
#[derive(Default)]
pub struct MemoryCertStore {
    entries: RwLock<HashMap<String, Arc<CertificateEntry>>>,
}

impl MemoryCertStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CertificateStore for MemoryCertStore {
    fn lookup(&self, hostname: &str) -> Option<Arc<CertificateEntry>> {
        let entry = self.entries.read().get(hostname).cloned();
        trace!(hostname = %hostname, found = entry.is_some(), "Certificate store lookup");
        entry
    }

    fn set(&self, hostname: &str, entry: Arc<CertificateEntry>) {
        debug!(
            hostname = %hostname,
            not_after = %entry.not_after(),
            "Storing certificate"
        );
        self.entries.write().insert(hostname.to_string(), entry);
    }

    fn has(&self, hostname: &str) -> bool {
        self.entries.read().contains_key(hostname)
    }

    fn delete(&self, hostname: &str) {
        if self.entries.write().remove(hostname).is_some() {
            debug!(hostname = %hostname, "Removed certificate from store");
        }
    }

    fn list_hostnames(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    fn len(&self) -> usize {
        self.entries.read().len()
    }
}

impl fmt::Debug for MemoryCertStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryCertStore")
            .field("hostnames", &self.list_hostnames())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acme::testing::entry;
    use std::collections::HashSet;
    use std::thread;

    #[test]
    fn test_set_then_lookup_returns_same_entry() {
        let store = MemoryCertStore::new();
        let e = entry("app1.alice.example.com", 90);

        store.set("app1.alice.example.com", Arc::clone(&e));

        let found = store.lookup("app1.alice.example.com").unwrap();
        assert!(Arc::ptr_eq(&found, &e));
        assert!(store.has("app1.alice.example.com"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_unknown_hostname_is_absent() {
        let store = MemoryCertStore::new();
        assert!(store.lookup("never.alice.example.com").is_none());
        assert!(!store.has("never.alice.example.com"));
        assert!(store.is_empty());
    }

    #[test]
    fn test_lookup_is_case_sensitive() {
        let store = MemoryCertStore::new();
        store.set("app1.alice.example.com", entry("app1.alice.example.com", 90));
        assert!(store.lookup("APP1.alice.example.com").is_none());
    }

    #[test]
    fn test_set_replaces() {
        let store = MemoryCertStore::new();
        let first = entry("app1.alice.example.com", 10);
        let second = entry("app1.alice.example.com", 90);

        store.set("app1.alice.example.com", first);
        store.set("app1.alice.example.com", Arc::clone(&second));

        assert!(Arc::ptr_eq(&store.lookup("app1.alice.example.com").unwrap(), &second));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_delete() {
        let store = MemoryCertStore::new();
        store.set("app1.alice.example.com", entry("app1.alice.example.com", 90));

        store.delete("app1.alice.example.com");
        assert!(!store.has("app1.alice.example.com"));
        assert!(store.lookup("app1.alice.example.com").is_none());

        // Deleting again is a no-op
        store.delete("app1.alice.example.com");
    }

    #[test]
    fn test_list_hostnames() {
        let store = MemoryCertStore::new();
        let hostnames: HashSet<String> = (0..5)
            .map(|i| format!("app{}.alice.example.com", i))
            .collect();
        for hostname in &hostnames {
            store.set(hostname, entry(hostname, 90));
        }

        let listed: HashSet<String> = store.list_hostnames().into_iter().collect();
        assert_eq!(listed, hostnames);
    }

    #[test]
    fn test_concurrent_access_never_tears() {
        let store = Arc::new(MemoryCertStore::new());
        let hostname = "app1.alice.example.com";
        let entries = vec![entry(hostname, 10), entry(hostname, 90)];
        store.set(hostname, Arc::clone(&entries[0]));

        let mut handles = Vec::new();
        for i in 0..4 {
            let store = Arc::clone(&store);
            let next = Arc::clone(&entries[i % 2]);
            handles.push(thread::spawn(move || {
                for _ in 0..500 {
                    store.set(hostname, Arc::clone(&next));
                }
            }));
        }
        for _ in 0..4 {
            let store = Arc::clone(&store);
            handles.push(thread::spawn(move || {
                for _ in 0..500 {
                    let found = store.lookup(hostname).unwrap();
                    // Chain and signing key always come from the same entry
                    assert_eq!(found.certified_key().cert, found.chain());
                    assert!(store.has(hostname));
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        let last = store.lookup(hostname).unwrap();
        assert!(entries.iter().any(|e| Arc::ptr_eq(e, &last)));
    }
}
