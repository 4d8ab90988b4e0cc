//! Endpoint validation

use std::collections::HashSet;

use super::{is_dns_label, ErrorCategory, ValidationError};
use crate::Config;

pub fn validate_endpoints(config: &Config) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();

    for endpoint in &config.endpoints {
        if !is_dns_label(&endpoint.namespace) {
            errors.push(ValidationError::new(
                ErrorCategory::Endpoint,
                format!("namespace '{}' is not a valid DNS label", endpoint.namespace),
            ));
            continue;
        }

        if !endpoint.hostname.is_empty() && !is_dns_label(&endpoint.hostname) {
            errors.push(ValidationError::new(
                ErrorCategory::Endpoint,
                format!(
                    "hostname '{}' in namespace '{}' is not a valid DNS label",
                    endpoint.hostname, endpoint.namespace
                ),
            ));
            continue;
        }

        if !seen.insert((&endpoint.hostname, &endpoint.namespace)) {
            errors.push(ValidationError::new(
                ErrorCategory::Endpoint,
                format!(
                    "duplicate endpoint '{}' in namespace '{}'",
                    endpoint.hostname, endpoint.namespace
                ),
            ));
        }
    }

    errors
}
