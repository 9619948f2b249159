//! Domain registrar interface.
//!
//! Registration runs through a thin HTTP gateway in production. The trait
//! keeps the billing core testable; [`StaticRegistrar`] is the in-crate
//! double used by unit tests.

use std::future::Future;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::{BillingError, BillingResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainAvailability {
    pub domain: String,
    pub available: bool,
    pub premium: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainQuote {
    pub domain: String,
    pub price_cents: i64,
    pub years: u32,
}

#[derive(Debug, Clone)]
pub struct RegisteredDomain {
    pub domain: String,
    pub expires_on: Option<OffsetDateTime>,
}

pub trait DomainRegistrar: Send + Sync {
    fn check(
        &self,
        domains: &[String],
    ) -> impl Future<Output = BillingResult<Vec<DomainAvailability>>> + Send;

    fn quote(
        &self,
        domains: &[String],
        years: u32,
    ) -> impl Future<Output = BillingResult<Vec<DomainQuote>>> + Send;

    fn register(
        &self,
        domain: &str,
        years: u32,
    ) -> impl Future<Output = BillingResult<RegisteredDomain>> + Send;
}

/// Production implementation against the registrar gateway.
#[derive(Clone)]
pub struct HttpRegistrar {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Deserialize)]
struct RegisterResponse {
    domain: String,
    /// Unix timestamp of the registration expiry, when the gateway knows it.
    expires_at: Option<i64>,
}

impl HttpRegistrar {
    pub fn new(base_url: String, api_key: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            api_key,
        }
    }

    /// Reads `REGISTRAR_API_URL` and `REGISTRAR_API_KEY`.
    pub fn from_env() -> BillingResult<Self> {
        let base_url = std::env::var("REGISTRAR_API_URL")
            .map_err(|_| BillingError::Internal("REGISTRAR_API_URL not set".to_string()))?;
        let api_key = std::env::var("REGISTRAR_API_KEY")
            .map_err(|_| BillingError::Internal("REGISTRAR_API_KEY not set".to_string()))?;
        Ok(Self::new(base_url, api_key))
    }

    async fn post_json<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> BillingResult<T> {
        let response = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| BillingError::Registrar(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(BillingError::Registrar(format!(
                "gateway returned {status}: {text}"
            )));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| BillingError::Registrar(format!("invalid gateway response: {e}")))
    }
}

impl DomainRegistrar for HttpRegistrar {
    async fn check(&self, domains: &[String]) -> BillingResult<Vec<DomainAvailability>> {
        self.post_json("/v1/domains/check", &serde_json::json!({ "domains": domains }))
            .await
    }

    async fn quote(&self, domains: &[String], years: u32) -> BillingResult<Vec<DomainQuote>> {
        self.post_json(
            "/v1/domains/quote",
            &serde_json::json!({ "domains": domains, "years": years }),
        )
        .await
    }

    async fn register(&self, domain: &str, years: u32) -> BillingResult<RegisteredDomain> {
        let response: RegisterResponse = self
            .post_json(
                "/v1/domains/register",
                &serde_json::json!({ "domain": domain, "years": years }),
            )
            .await?;

        let expires_on = response
            .expires_at
            .and_then(|ts| OffsetDateTime::from_unix_timestamp(ts).ok());

        Ok(RegisteredDomain {
            domain: response.domain,
            expires_on,
        })
    }
}

/// Fixed-price registrar for tests: every domain costs the same, and
/// registration fails for any domain listed in `failing`.
#[derive(Clone, Default)]
pub struct StaticRegistrar {
    pub price_cents: i64,
    pub taken: Vec<String>,
    pub failing: Vec<String>,
}

impl DomainRegistrar for StaticRegistrar {
    async fn check(&self, domains: &[String]) -> BillingResult<Vec<DomainAvailability>> {
        Ok(domains
            .iter()
            .map(|d| DomainAvailability {
                domain: d.clone(),
                available: !self.taken.contains(d),
                premium: false,
            })
            .collect())
    }

    async fn quote(&self, domains: &[String], years: u32) -> BillingResult<Vec<DomainQuote>> {
        Ok(domains
            .iter()
            .map(|d| DomainQuote {
                domain: d.clone(),
                price_cents: self.price_cents * years as i64,
                years,
            })
            .collect())
    }

    async fn register(&self, domain: &str, years: u32) -> BillingResult<RegisteredDomain> {
        if self.failing.contains(&domain.to_string()) {
            return Err(BillingError::Registrar(format!(
                "registration refused for {domain}"
            )));
        }
        let expires_on = OffsetDateTime::now_utc() + time::Duration::days(365 * years as i64);
        Ok(RegisteredDomain {
            domain: domain.to_string(),
            expires_on: Some(expires_on),
        })
    }
}
