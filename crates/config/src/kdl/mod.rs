//! KDL configuration parsing.

use std::path::PathBuf;

use anyhow::{anyhow, Result};
use ::kdl::{KdlDocument, KdlNode};
use tracing::{trace, warn};

use crate::{AcmeConfig, Config, CoordinationConfig, EndpointConfig};

mod helpers;

use helpers::{first_arg, get_bool_entry, get_int_entry, get_string_entry, property};

/// Parse a complete configuration document
pub fn parse_config(source: &str) -> Result<Config> {
    let doc: KdlDocument = source.parse().map_err(|e: ::kdl::KdlError| {
        let report = miette::Report::new(e);
        anyhow!("KDL syntax error:\n{:?}", report)
    })?;

    let mut config = Config::default();

    for node in doc.nodes() {
        match node.name().value() {
            "state-dir" => {
                let dir = first_arg(node)
                    .and_then(|v| v.as_string())
                    .ok_or_else(|| anyhow!("'state-dir' requires a path, e.g., state-dir \"/var/lib/dex/mesh\""))?;
                config.state_dir = PathBuf::from(dir);
            }
            "acme" => config.acme = parse_acme(node)?,
            "coordination" => config.coordination = parse_coordination(node)?,
            "endpoints" => config.endpoints = parse_endpoints(node)?,
            other => warn!(node = %other, "Ignoring unknown configuration block"),
        }
    }

    trace!(
        state_dir = %config.state_dir.display(),
        acme_enabled = config.acme.enabled,
        endpoints = config.endpoints.len(),
        "Parsed configuration"
    );

    Ok(config)
}

fn block(node: &KdlNode) -> KdlDocument {
    node.children().cloned().unwrap_or_default()
}

fn parse_acme(node: &KdlNode) -> Result<AcmeConfig> {
    trace!("Parsing acme configuration block");
    let body = block(node);
    let defaults = AcmeConfig::default();

    let config = AcmeConfig {
        enabled: get_bool_entry(&body, "enabled")?.unwrap_or(defaults.enabled),
        email: get_string_entry(&body, "email")?.unwrap_or(defaults.email),
        staging: get_bool_entry(&body, "staging")?.unwrap_or(defaults.staging),
        directory_url: get_string_entry(&body, "directory-url")?,
        cert_dir: get_string_entry(&body, "cert-dir")?.map(PathBuf::from),
        base_domain: get_string_entry(&body, "base-domain")?.unwrap_or(defaults.base_domain),
        renewal_check_interval_secs: get_int_entry(&body, "renewal-check-interval-secs")?
            .unwrap_or(defaults.renewal_check_interval_secs),
        issuance_timeout_secs: get_int_entry(&body, "issuance-timeout-secs")?
            .unwrap_or(defaults.issuance_timeout_secs),
    };

    trace!(
        enabled = config.enabled,
        staging = config.staging,
        base_domain = %config.base_domain,
        "Parsed acme configuration"
    );

    Ok(config)
}

fn parse_coordination(node: &KdlNode) -> Result<CoordinationConfig> {
    trace!("Parsing coordination configuration block");
    let body = block(node);
    let defaults = CoordinationConfig::default();

    Ok(CoordinationConfig {
        url: get_string_entry(&body, "url")?.unwrap_or(defaults.url),
        api_token: get_string_entry(&body, "api-token")?,
        request_timeout_secs: get_int_entry(&body, "request-timeout-secs")?
            .unwrap_or(defaults.request_timeout_secs),
    })
}

fn parse_endpoints(node: &KdlNode) -> Result<Vec<EndpointConfig>> {
    trace!("Parsing endpoints configuration block");
    let mut endpoints = Vec::new();

    let Some(children) = node.children() else {
        return Ok(endpoints);
    };

    for child in children.nodes() {
        if child.name().value() != "endpoint" {
            warn!(node = %child.name().value(), "Ignoring unknown node in endpoints block");
            continue;
        }

        let hostname = match first_arg(child) {
            None => String::new(),
            Some(v) => v
                .as_string()
                .ok_or_else(|| anyhow!("Endpoint hostname must be a string, got {}", v))?
                .to_string(),
        };

        let namespace = property(child, "namespace")
            .and_then(|v| v.as_string())
            .ok_or_else(|| {
                anyhow!(
                    "Endpoint '{}' requires a 'namespace' property, e.g., endpoint \"app1\" namespace=\"alice\"",
                    hostname
                )
            })?
            .to_string();

        trace!(hostname = %hostname, namespace = %namespace, "Parsed endpoint");
        endpoints.push(EndpointConfig { hostname, namespace });
    }

    Ok(endpoints)
}
