//! ACME client built on `instant-acme`
//!
//! Issues one certificate per hostname through DNS-01. Every request to the
//! CA is bounded by [`REQUEST_TIMEOUT`]; polling loops are bounded by the
//! solver's propagation timeout.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use instant_acme::{
    Account, AccountCredentials, AuthorizationStatus, ChallengeType, Identifier, NewAccount,
    NewOrder, Order, OrderStatus,
};
use parking_lot::RwLock;
use rcgen::{CertificateParams, DistinguishedName, KeyPair, PKCS_ECDSA_P256_SHA256};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, trace, warn};

use super::account::{AccountKey, Registration};
use super::authority::{AccountBinding, CertificateAuthority, Dns01Solver, IssuedCertificate};
use super::error::{AcmeError, CertificateError};
use super::propagation::PropagationChecker;

/// Upper bound for a single request to the CA
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const CHALLENGE_PREFIX: &str = "_acme-challenge.";

/// A challenge published through the solver, remembered for cleanup
struct PresentedChallenge {
    domain: String,
    token: String,
    key_authorization: String,
}

/// `instant-acme` backed certificate authority
pub struct AcmeClient {
    directory_url: String,
    account: RwLock<Option<Account>>,
}

impl AcmeClient {
    /// Create a client for the given ACME directory
    ///
    /// No request is made until [`register`](CertificateAuthority::register).
    pub fn new(directory_url: impl Into<String>) -> Self {
        Self {
            directory_url: directory_url.into(),
            account: RwLock::new(None),
        }
    }

    fn account(&self) -> Result<Account, AcmeError> {
        self.account.read().clone().ok_or(AcmeError::NotRegistered)
    }

    /// Restore the account the registration points at
    async fn restore_account(
        &self,
        key: &AccountKey,
        registration: &Registration,
    ) -> Result<Account, AcmeError> {
        let credentials: AccountCredentials = serde_json::from_value(serde_json::json!({
            "id": registration.account_url,
            "key_pkcs8": URL_SAFE_NO_PAD.encode(key.pkcs8_der()),
            "directory": registration.directory_url,
        }))
        .map_err(|e| AcmeError::InvalidRegistration(e.to_string()))?;

        let account = request("restore account", Account::from_credentials(credentials)).await?;

        info!(account_url = %registration.account_url, "Restored ACME account");
        Ok(account)
    }

    /// Create a new account; the CA binds a key generated for it
    async fn create_account(&self, contact: &str) -> Result<(Account, AccountBinding), AcmeError> {
        let contact_uri = format!("mailto:{}", contact);
        let contacts: Vec<&str> = if contact.is_empty() {
            Vec::new()
        } else {
            vec![contact_uri.as_str()]
        };

        let (account, credentials) = request(
            "create account",
            Account::create(
                &NewAccount {
                    contact: &contacts,
                    terms_of_service_agreed: true,
                    only_return_existing: false,
                },
                &self.directory_url,
                None,
            ),
        )
        .await?;

        let (account_url, bound_key) = credentials_parts(&credentials)?;

        info!(
            account_url = %account_url,
            directory = %self.directory_url,
            "Created ACME account"
        );

        let registration = Registration {
            account_url,
            directory_url: self.directory_url.clone(),
            contact: (!contact.is_empty()).then(|| contact.to_string()),
            created: Utc::now(),
        };

        Ok((
            account,
            AccountBinding {
                registration,
                replacement_key: Some(bound_key),
            },
        ))
    }

    /// Create an order for exactly `hostname`
    async fn create_order(&self, hostname: &str) -> Result<Order, AcmeError> {
        let account = self.account()?;
        let identifiers = [Identifier::Dns(hostname.to_string())];

        let order = request(
            "new order",
            account.new_order(&NewOrder {
                identifiers: &identifiers,
            }),
        )
        .await?;

        debug!(hostname = %hostname, "Created ACME order");
        Ok(order)
    }

    /// Present every pending DNS-01 challenge and tell the CA they are ready
    async fn validate_challenges(
        &self,
        order: &mut Order,
        solver: &dyn Dns01Solver,
        presented: &mut Vec<PresentedChallenge>,
    ) -> Result<(), AcmeError> {
        let (timeout, interval) = solver.timeout();
        let authorizations = request("fetch authorizations", order.authorizations()).await?;
        let propagation = PropagationChecker::from_system();

        let mut ready_urls = Vec::new();
        for authz in &authorizations {
            match authz.status {
                AuthorizationStatus::Valid => continue,
                AuthorizationStatus::Pending => {}
                _ => {
                    return Err(AcmeError::Challenge(format!(
                        "authorization for {:?} is {:?}",
                        authz.identifier, authz.status
                    )))
                }
            }

            let Identifier::Dns(identifier) = &authz.identifier;
            let challenge = authz
                .challenges
                .iter()
                .find(|c| c.r#type == ChallengeType::Dns01)
                .ok_or_else(|| {
                    AcmeError::Challenge(format!("no dns-01 challenge offered for {}", identifier))
                })?;

            let key_authorization = order.key_authorization(challenge);
            let domain = format!("{}{}", CHALLENGE_PREFIX, identifier);

            solver
                .present(&domain, &challenge.token, key_authorization.as_str())
                .await?;
            presented.push(PresentedChallenge {
                domain: domain.clone(),
                token: challenge.token.clone(),
                key_authorization: key_authorization.as_str().to_string(),
            });

            propagation
                .wait_for_txt(&domain, &key_authorization.dns_value(), timeout, interval)
                .await?;

            ready_urls.push(challenge.url.clone());
        }

        for url in &ready_urls {
            request("mark challenge ready", order.set_challenge_ready(url)).await?;
        }

        self.wait_for_order_ready(order, timeout, interval).await
    }

    /// Poll until the CA has validated every authorization
    async fn wait_for_order_ready(
        &self,
        order: &mut Order,
        timeout: Duration,
        interval: Duration,
    ) -> Result<(), AcmeError> {
        let deadline = Instant::now() + timeout;

        loop {
            let state = request("refresh order", order.refresh()).await?;
            match state.status {
                OrderStatus::Ready | OrderStatus::Valid => return Ok(()),
                OrderStatus::Invalid => {
                    return Err(AcmeError::OrderFailed(
                        "order became invalid during validation".to_string(),
                    ))
                }
                _ => {}
            }

            if Instant::now() + interval > deadline {
                return Err(AcmeError::Challenge(format!(
                    "validation not finished after {:?}",
                    timeout
                )));
            }
            trace!("Waiting for ACME order to become ready");
            sleep(interval).await;
        }
    }

    /// Finalize with a fresh P-256 key and download the chain
    async fn finalize_order(
        &self,
        order: &mut Order,
        hostname: &str,
        timeout: Duration,
    ) -> Result<IssuedCertificate, AcmeError> {
        let key = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256).map_err(CertificateError::from)?;
        let mut params =
            CertificateParams::new(vec![hostname.to_string()]).map_err(CertificateError::from)?;
        params.distinguished_name = DistinguishedName::new();
        let csr = params
            .serialize_request(&key)
            .map_err(CertificateError::from)?;

        request("finalize order", order.finalize(csr.der())).await?;

        let deadline = Instant::now() + timeout;
        let poll = Duration::from_secs(1);
        loop {
            if let Some(chain_pem) = request("download certificate", order.certificate()).await? {
                return Ok(IssuedCertificate {
                    chain_pem,
                    key_pem: key.serialize_pem(),
                });
            }

            if Instant::now() + poll > deadline {
                return Err(AcmeError::OrderFailed(format!(
                    "certificate not available after {:?}",
                    timeout
                )));
            }
            sleep(poll).await;
        }
    }
}

#[async_trait]
impl CertificateAuthority for AcmeClient {
    fn directory_url(&self) -> &str {
        &self.directory_url
    }

    async fn register(
        &self,
        key: &AccountKey,
        existing: Option<&Registration>,
        contact: &str,
    ) -> Result<AccountBinding, AcmeError> {
        let (account, binding) = match existing {
            Some(registration) if registration.directory_url == self.directory_url => {
                let account = self.restore_account(key, registration).await?;
                let binding = AccountBinding {
                    registration: registration.clone(),
                    replacement_key: None,
                };
                (account, binding)
            }
            _ => self.create_account(contact).await?,
        };

        *self.account.write() = Some(account);
        Ok(binding)
    }

    async fn issue(
        &self,
        hostname: &str,
        solver: &dyn Dns01Solver,
    ) -> Result<IssuedCertificate, AcmeError> {
        let started = Instant::now();
        let mut order = self.create_order(hostname).await?;

        let mut presented = Vec::new();
        let validated = self
            .validate_challenges(&mut order, solver, &mut presented)
            .await;

        for challenge in &presented {
            solver
                .clean_up(&challenge.domain, &challenge.token, &challenge.key_authorization)
                .await;
        }
        validated?;

        let (timeout, _) = solver.timeout();
        let issued = self.finalize_order(&mut order, hostname, timeout).await?;

        info!(
            hostname = %hostname,
            elapsed_secs = started.elapsed().as_secs(),
            "Certificate issued"
        );
        Ok(issued)
    }
}

impl std::fmt::Debug for AcmeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcmeClient")
            .field("directory_url", &self.directory_url)
            .field("registered", &self.account.read().is_some())
            .finish()
    }
}

/// Run one CA request under [`REQUEST_TIMEOUT`]
async fn request<T, F>(operation: &'static str, future: F) -> Result<T, AcmeError>
where
    F: Future<Output = Result<T, instant_acme::Error>>,
{
    match tokio::time::timeout(REQUEST_TIMEOUT, future).await {
        Ok(result) => result.map_err(AcmeError::from),
        Err(_) => {
            warn!(operation = %operation, "ACME request timed out");
            Err(AcmeError::RequestTimeout {
                operation,
                after: REQUEST_TIMEOUT,
            })
        }
    }
}

/// Account URL and bound key out of serialized credentials
fn credentials_parts(credentials: &AccountCredentials) -> Result<(String, AccountKey), AcmeError> {
    let value = serde_json::to_value(credentials)
        .map_err(|e| AcmeError::InvalidRegistration(e.to_string()))?;

    let field = |name: &str| {
        value
            .get(name)
            .and_then(|v| v.as_str())
            .ok_or_else(|| AcmeError::InvalidRegistration(format!("credentials lack '{}'", name)))
    };

    let account_url = field("id")?.to_string();
    let der = URL_SAFE_NO_PAD
        .decode(field("key_pkcs8")?)
        .map_err(|e| AcmeError::InvalidRegistration(e.to_string()))?;
    let key = AccountKey::from_pkcs8_der(&der)?;

    Ok((account_url, key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_round_trip() {
        let key = AccountKey::generate().unwrap();
        let credentials: AccountCredentials = serde_json::from_value(serde_json::json!({
            "id": "https://ca.test/acct/1",
            "key_pkcs8": URL_SAFE_NO_PAD.encode(key.pkcs8_der()),
            "directory": "https://ca.test/directory",
        }))
        .unwrap();

        let (account_url, bound) = credentials_parts(&credentials).unwrap();
        assert_eq!(account_url, "https://ca.test/acct/1");
        assert_eq!(bound, key);
    }

    #[tokio::test]
    async fn test_issue_requires_registration() {
        let client = AcmeClient::new("https://ca.test/directory");
        let result = client.create_order("app1.alice.enbox.id").await;
        assert!(matches!(result, Err(AcmeError::NotRegistered)));
    }
}
