//! TLS integration
//!
//! [`SniCertResolver`] serves certificates from a [`CertificateStore`] during
//! the rustls handshake. Resolution is synchronous and never touches disk or
//! network; with on-demand issuance enabled a miss for an endpoint name
//! (`<leaf>.<namespace>.<base>` or `<namespace>.<base>`) starts a background
//! `obtain_cert` and the current handshake fails closed. At most
//! [`MAX_PENDING_ON_DEMAND`] such orders run at once; further misses are
//! dropped until one finishes.

use std::sync::Arc;

use dashmap::DashSet;
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use rustls::ServerConfig;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::acme::{is_valid_hostname, CertManager, CertificateStore};

/// Upper bound on concurrently running on-demand orders
pub const MAX_PENDING_ON_DEMAND: usize = 16;

struct OnDemand {
    manager: Arc<CertManager>,
    runtime: Handle,
    /// `.<base-domain>`
    suffix: String,
    pending: Arc<DashSet<String>>,
}

/// SNI certificate resolver backed by a certificate store
pub struct SniCertResolver {
    store: Arc<dyn CertificateStore>,
    on_demand: Option<OnDemand>,
}

impl SniCertResolver {
    pub fn new(store: Arc<dyn CertificateStore>) -> Self {
        Self {
            store,
            on_demand: None,
        }
    }

    /// Resolver that obtains missing certificates under the manager's base
    /// domain in the background, on `runtime`
    pub fn with_on_demand(manager: Arc<CertManager>, runtime: Handle) -> Self {
        let suffix = format!(".{}", manager.base_domain());
        Self {
            store: Arc::clone(manager.store()),
            on_demand: Some(OnDemand {
                manager,
                runtime,
                suffix,
                pending: Arc::new(DashSet::new()),
            }),
        }
    }

    /// Certificate for `server_name`, or `None`
    pub fn resolve_name(&self, server_name: Option<&str>) -> Option<Arc<CertifiedKey>> {
        let Some(name) = server_name else {
            debug!("No SNI provided, refusing handshake");
            return None;
        };

        if let Some(entry) = self.store.lookup(name) {
            return Some(entry.certified_key());
        }

        debug!(hostname = %name, "No certificate loaded for SNI name");
        if let Some(on_demand) = &self.on_demand {
            on_demand.schedule(name);
        }
        None
    }

    /// Number of on-demand orders still running
    pub fn pending_on_demand(&self) -> usize {
        self.on_demand.as_ref().map_or(0, |o| o.pending.len())
    }

    /// rustls server configuration using this resolver
    pub fn server_config(self: Arc<Self>) -> Result<ServerConfig, rustls::Error> {
        let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
        let mut config = ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()?
            .with_no_client_auth()
            .with_cert_resolver(self);
        config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
        Ok(config)
    }
}

impl OnDemand {
    fn schedule(&self, hostname: &str) {
        if !is_endpoint_name(hostname, &self.suffix) {
            return;
        }
        if self.pending.len() >= MAX_PENDING_ON_DEMAND {
            warn!(
                hostname = %hostname,
                limit = MAX_PENDING_ON_DEMAND,
                "Too many on-demand orders running, skipping"
            );
            return;
        }
        if !self.pending.insert(hostname.to_string()) {
            return;
        }

        info!(hostname = %hostname, "Obtaining certificate on demand");
        let manager = Arc::clone(&self.manager);
        let pending = Arc::clone(&self.pending);
        let hostname = hostname.to_string();

        self.runtime.spawn(async move {
            if let Err(e) = manager.obtain_cert(&hostname).await {
                warn!(hostname = %hostname, error = %e, "On-demand certificate failed");
            }
            pending.remove(&hostname);
        });
    }
}

/// `hostname` is one or two DNS labels followed by `suffix`
fn is_endpoint_name(hostname: &str, suffix: &str) -> bool {
    let Some(prefix) = hostname.strip_suffix(suffix) else {
        return false;
    };
    is_valid_hostname(prefix) && prefix.split('.').count() <= 2
}

impl ResolvesServerCert for SniCertResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        self.resolve_name(client_hello.server_name())
    }
}

impl std::fmt::Debug for SniCertResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SniCertResolver")
            .field("certificates", &self.store.len())
            .field("on_demand", &self.on_demand.is_some())
            .finish()
    }
}
