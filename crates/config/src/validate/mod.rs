//! Configuration validation
//!
//! Validation collects every problem instead of stopping at the first one so
//! operators can fix a configuration in a single pass.

use std::fmt;

use thiserror::Error;

use crate::Config;

mod acme;
mod endpoints;

/// Area of the configuration a problem belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Acme,
    Coordination,
    Endpoint,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCategory::Acme => "acme",
            ErrorCategory::Coordination => "coordination",
            ErrorCategory::Endpoint => "endpoint",
        };
        f.write_str(name)
    }
}

/// A single validation failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("[{category}] {message}")]
pub struct ValidationError {
    pub category: ErrorCategory,
    pub message: String,
}

impl ValidationError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }
}

pub(crate) fn validate_config(config: &Config) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    errors.extend(acme::validate_acme(config));
    errors.extend(acme::validate_coordination(config));
    errors.extend(endpoints::validate_endpoints(config));

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Whether `label` is a valid DNS label (1-63 chars, alphanumerics and
/// inner hyphens)
pub(crate) fn is_dns_label(label: &str) -> bool {
    !label.is_empty()
        && label.len() <= 63
        && !label.starts_with('-')
        && !label.ends_with('-')
        && label
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EndpointConfig;

    fn valid_config() -> Config {
        let mut config = Config::default();
        config.acme.enabled = true;
        config.acme.email = "ops@example.com".to_string();
        config.coordination.url = "https://central.example.com".to_string();
        config.endpoints.push(EndpointConfig {
            hostname: "app1".to_string(),
            namespace: "alice".to_string(),
        });
        config
    }

    #[test]
    fn test_valid_config() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_disabled_acme_skips_acme_checks() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = valid_config();
        config.acme.email = "not-an-email".to_string();
        config.coordination.url = "not a url".to_string();
        config.endpoints[0].namespace = "Bad_Namespace".to_string();

        let errors = config.validate().unwrap_err();
        let categories: Vec<_> = errors.iter().map(|e| e.category).collect();
        assert_eq!(
            categories,
            vec![
                ErrorCategory::Acme,
                ErrorCategory::Coordination,
                ErrorCategory::Endpoint
            ]
        );
    }

    #[test]
    fn test_display() {
        let err = ValidationError::new(ErrorCategory::Acme, "email is required");
        assert_eq!(err.to_string(), "[acme] email is required");
    }

    #[test]
    fn test_dns_label() {
        assert!(is_dns_label("app1"));
        assert!(is_dns_label("my-app"));
        assert!(!is_dns_label(""));
        assert!(!is_dns_label("-app"));
        assert!(!is_dns_label("app-"));
        assert!(!is_dns_label("app.one"));
        assert!(!is_dns_label("App_1"));
        assert!(!is_dns_label(&"a".repeat(64)));
    }
}
