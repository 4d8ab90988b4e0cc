//! ACME and coordination settings validation

use url::Url;

use super::{is_dns_label, ErrorCategory, ValidationError};
use crate::{Config, DNS_PROPAGATION_TIMEOUT, MAX_RENEWAL_CHECK_INTERVAL};

/// Validate the `acme` block
///
/// Only checked when ACME is enabled; a disabled block is inert.
pub fn validate_acme(config: &Config) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let acme = &config.acme;

    if !acme.enabled {
        return errors;
    }

    if acme.email.is_empty() {
        errors.push(ValidationError::new(
            ErrorCategory::Acme,
            "email is required when ACME is enabled",
        ));
    } else if !acme.email.contains('@') {
        errors.push(ValidationError::new(
            ErrorCategory::Acme,
            format!("email '{}' is not a valid address", acme.email),
        ));
    }

    if let Some(ref url) = acme.directory_url {
        if let Err(e) = Url::parse(url) {
            errors.push(ValidationError::new(
                ErrorCategory::Acme,
                format!("directory-url '{}' is invalid: {}", url, e),
            ));
        }
    }

    if !acme.base_domain.split('.').all(is_dns_label) {
        errors.push(ValidationError::new(
            ErrorCategory::Acme,
            format!("base-domain '{}' is not a valid domain name", acme.base_domain),
        ));
    }

    if acme.renewal_check_interval_secs == 0 {
        errors.push(ValidationError::new(
            ErrorCategory::Acme,
            "renewal-check-interval-secs must be greater than zero",
        ));
    } else if acme.renewal_check_interval() > MAX_RENEWAL_CHECK_INTERVAL {
        errors.push(ValidationError::new(
            ErrorCategory::Acme,
            format!(
                "renewal-check-interval-secs ({}) must not exceed {}",
                acme.renewal_check_interval_secs,
                MAX_RENEWAL_CHECK_INTERVAL.as_secs()
            ),
        ));
    }

    if acme.issuance_timeout() <= DNS_PROPAGATION_TIMEOUT {
        errors.push(ValidationError::new(
            ErrorCategory::Acme,
            format!(
                "issuance-timeout-secs ({}) must exceed the DNS propagation timeout ({}s)",
                acme.issuance_timeout_secs,
                DNS_PROPAGATION_TIMEOUT.as_secs()
            ),
        ));
    }

    errors
}

/// Validate the `coordination` block
///
/// The coordination URL is required whenever ACME is enabled because every
/// DNS-01 challenge is relayed through it.
pub fn validate_coordination(config: &Config) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let coordination = &config.coordination;

    if coordination.url.is_empty() {
        if config.acme.enabled {
            errors.push(ValidationError::new(
                ErrorCategory::Coordination,
                "url is required when ACME is enabled",
            ));
        }
        return errors;
    }

    match Url::parse(&coordination.url) {
        Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
        Ok(url) => errors.push(ValidationError::new(
            ErrorCategory::Coordination,
            format!("url scheme '{}' is not http or https", url.scheme()),
        )),
        Err(e) => errors.push(ValidationError::new(
            ErrorCategory::Coordination,
            format!("url '{}' is invalid: {}", coordination.url, e),
        )),
    }

    if coordination.request_timeout_secs == 0 {
        errors.push(ValidationError::new(
            ErrorCategory::Coordination,
            "request-timeout-secs must be greater than zero",
        ));
    }

    errors
}
