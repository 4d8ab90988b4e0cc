//! Dex mesh certificate daemon - Main entry point
//!
//! Obtains, persists and renews TLS certificates for mesh endpoints.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use dex_mesh_config::Config;
use dex_meshd::acme::{CertManager, CertificateStorage, MemoryCertStore};
use dex_meshd::CertificateEntry;

/// dex-meshd - TLS certificate lifecycle for Dex mesh endpoints
#[derive(Parser, Debug)]
#[command(name = "dex-meshd")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short = 'c', long = "config", env = "DEX_MESH_CONFIG")]
    config: Option<String>,

    /// Enable verbose logging (debug level)
    #[arg(long = "verbose", global = true)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long = "json-logs", global = true)]
    json_logs: bool,

    /// Bearer token for the coordination service, overriding the config file
    #[arg(long = "api-token", env = "DEX_COORD_API_TOKEN", hide_env_values = true)]
    api_token: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate configuration file and exit
    Check {
        /// Print the effective configuration as JSON
        #[arg(long = "print")]
        print: bool,
    },
    /// Obtain a certificate for a hostname
    Obtain { hostname: String },
    /// Obtain a certificate for `<leaf>.<namespace>.<base-domain>`
    ObtainEndpoint {
        /// Leaf name; pass "" for the namespace-level certificate
        leaf: String,
        namespace: String,
    },
    /// List stored certificates and their expiry
    List,
    /// Run the certificate daemon (default)
    Run,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.json_logs);

    let mut config = load_config(cli.config.as_deref())?;
    if let Some(token) = cli.api_token {
        config.coordination.api_token = Some(token);
    }

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Check { print } => check_config(&config, cli.config.as_deref(), print),
        Commands::List => list_certificates(&config),
        Commands::Obtain { hostname } => {
            validate(&config)?;
            block_on(obtain(config, hostname, None))
        }
        Commands::ObtainEndpoint { leaf, namespace } => {
            validate(&config)?;
            block_on(obtain(config, leaf, Some(namespace)))
        }
        Commands::Run => {
            validate(&config)?;
            block_on(run(config))
        }
    }
}

fn init_logging(verbose: bool, json: bool) {
    let log_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

fn load_config(path: Option<&str>) -> Result<Config> {
    match path {
        Some(path) => {
            info!("Loading configuration from: {}", path);
            Config::from_file(path).context("Failed to load configuration file")
        }
        None => {
            info!("No configuration specified, using defaults");
            Ok(Config::default())
        }
    }
}

fn validate(config: &Config) -> Result<()> {
    if let Err(errors) = config.validate() {
        for e in &errors {
            error!("{}", e);
        }
        bail!("Configuration validation failed with {} error(s)", errors.len());
    }
    Ok(())
}

fn block_on<F: std::future::Future<Output = Result<()>>>(future: F) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;
    runtime.block_on(future)
}

/// Validate configuration and exit
fn check_config(config: &Config, path: Option<&str>, print: bool) -> Result<()> {
    validate(config)?;

    info!("Configuration test successful:");
    info!("  - ACME enabled: {}", config.acme.enabled);
    info!("  - directory: {}", config.acme.directory_url());
    info!("  - base domain: {}", config.acme.base_domain);
    info!("  - {} endpoint(s)", config.endpoints.len());

    if config.acme.enabled && config.coordination.api_token.is_none() {
        warn!("No coordination API token configured; challenge requests will be unauthenticated");
    }

    if print {
        let json = serde_json::to_string_pretty(config).context("Failed to serialize configuration")?;
        println!("{}", json);
    }

    println!(
        "dex-meshd: configuration file {} test is successful",
        path.unwrap_or("(defaults)")
    );
    Ok(())
}

/// Print stored certificates without touching the network
fn list_certificates(config: &Config) -> Result<()> {
    let dir = config.acme.storage_dir(&config.state_dir);
    let storage = CertificateStorage::new(dir)
        .with_context(|| format!("Failed to open certificate storage {}", dir.display()))?;

    let now = Utc::now();
    for hostname in storage.list_hostnames()? {
        let Some(stored) = storage.load_certificate(&hostname)? else {
            continue;
        };
        match CertificateEntry::from_pem(&stored.cert_pem, &stored.key_pem) {
            Ok(entry) => println!(
                "{}\t{}\t{} days left",
                hostname,
                entry.not_after().to_rfc3339(),
                entry.remaining_at(now).num_days()
            ),
            Err(e) => println!("{}\tunreadable: {}", hostname, e),
        }
    }
    Ok(())
}

fn build_manager(config: &Config) -> Result<Arc<CertManager>> {
    if !config.acme.enabled {
        bail!("ACME is disabled in the configuration");
    }
    let manager = CertManager::new(config, Arc::new(MemoryCertStore::new()))
        .context("Failed to create certificate manager")?;
    Ok(Arc::new(manager))
}

async fn obtain(config: Config, name: String, namespace: Option<String>) -> Result<()> {
    let manager = build_manager(&config)?;
    let entry = match namespace {
        Some(namespace) => manager.obtain_cert_for_endpoint(&name, &namespace).await,
        None => manager.obtain_cert(&name).await,
    }
    .context("Failed to obtain certificate")?;

    println!(
        "{}\t{}",
        entry.dns_names().join(","),
        entry.not_after().to_rfc3339()
    );
    Ok(())
}

async fn run(config: Config) -> Result<()> {
    let manager = build_manager(&config)?;

    let loaded = manager
        .load_persisted()
        .context("Failed to load persisted certificates")?;
    info!(
        storage = %manager.storage().base_path().display(),
        loaded,
        "Certificate daemon starting"
    );

    manager.start();
    let prewarm = manager.prewarm(config.endpoints.clone());

    wait_for_shutdown().await?;
    info!("Shutdown signal received, stopping");

    prewarm.abort();
    manager.stop().await;
    info!("Certificate daemon stopped");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("Failed to listen for Ctrl-C")?,
        _ = terminate.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")
}
