//! Dex mesh certificate daemon library
//!
//! Automated TLS certificate lifecycle for mesh endpoints published as
//! `<leaf>.<namespace>.<base-domain>`:
//!
//! - **Store**: hostname to certificate map consulted on every handshake
//! - **Issuance**: ACME orders proven through DNS-01, with the TXT records
//!   published by the coordination service
//! - **Persistence**: account key, registration and certificates on disk
//! - **Renewal**: a background sweep renewing certificates close to expiry
//! - **TLS**: a rustls SNI resolver over the store
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use dex_meshd::acme::{CertManager, MemoryCertStore};
//! use dex_mesh_config::Config;
//!
//! let config = Config::from_file("/etc/dex/mesh.kdl")?;
//! let manager = Arc::new(CertManager::new(&config, Arc::new(MemoryCertStore::new()))?);
//! manager.start();
//! let entry = manager.obtain_cert_for_endpoint("app1", "alice").await?;
//! ```

pub mod acme;
pub mod tls;

pub use acme::{AcmeError, CertManager, CertificateEntry, CertificateStore, MemoryCertStore};
pub use tls::{SniCertResolver, MAX_PENDING_ON_DEMAND};
