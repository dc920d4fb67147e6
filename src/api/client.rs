use crate::api::models::{self, Pin, PinExistsResponse, RegisterRequest, RegisterResponse};
use crate::error::{ClientError, Result};
use reqwest::Client as HttpClient;
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use url::Url;

/// REST calls the chat session depends on.
pub trait ChatBackend: Clone + Send + Sync + 'static {
    fn register(&self, stored: Option<Pin>) -> impl Future<Output = Result<RegisterResponse>> + Send;
    fn pin_exists(&self, pin: Pin) -> impl Future<Output = Result<bool>> + Send;
    fn contacts(&self) -> impl Future<Output = Result<Vec<Pin>>> + Send;
}

#[derive(Clone)]
pub struct ApiClient {
    pub http: HttpClient,
    pub base_url: Url,
}

impl ApiClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = HttpClient::builder().timeout(timeout).build()?;
        Ok(Self { http, base_url: Url::parse(base_url)? })
    }

    fn base_api(&self) -> String {
        let trimmed = self.base_url.as_str().trim_end_matches('/');
        if trimmed.ends_with("/api") { trimmed.to_string() } else { format!("{}/api", trimmed) }
    }

    fn check(endpoint: &str, resp: reqwest::Response) -> Result<reqwest::Response> {
        if resp.status().is_success() {
            Ok(resp)
        } else {
            Err(ClientError::Status { endpoint: endpoint.to_string(), status: resp.status().as_u16() })
        }
    }

    /// Used by the setup screen to validate a server before saving it.
    pub async fn ping(&self) -> Result<u16> {
        let endpoint = format!("{}/contacts", self.base_api());
        let resp = self.http.get(&endpoint).send().await?;
        Ok(resp.status().as_u16())
    }
}

impl ChatBackend for ApiClient {
    /// Register a new PIN, or reuse the stored one when the backend still knows it.
    async fn register(&self, stored: Option<Pin>) -> Result<RegisterResponse> {
        let endpoint = format!("{}/register", self.base_api());
        let body = RegisterRequest::new(stored.as_ref());
        let resp = self.http.post(&endpoint).json(&body).send().await?;
        let resp = Self::check(&endpoint, resp)?;
        let bytes = resp.bytes().await?;
        let parsed: RegisterResponse = serde_json::from_slice(&bytes)?;
        log::debug!("registered as {} (reused: {})", parsed.pin, parsed.reused);
        Ok(parsed)
    }

    async fn pin_exists(&self, pin: Pin) -> Result<bool> {
        let endpoint = format!("{}/pin_exists", self.base_api());
        let resp = self
            .http
            .get(&endpoint)
            .query(&[("pin", pin.as_str())])
            .send()
            .await?;
        let resp = Self::check(&endpoint, resp)?;
        let bytes = resp.bytes().await?;
        let parsed: PinExistsResponse = serde_json::from_slice(&bytes)?;
        Ok(parsed.exists)
    }

    /// Known contact PINs, in backend order.
    async fn contacts(&self) -> Result<Vec<Pin>> {
        let endpoint = format!("{}/contacts", self.base_api());
        let resp = self.http.get(&endpoint).send().await?;
        let resp = Self::check(&endpoint, resp)?;
        let bytes = resp.bytes().await?;
        let json: Value = serde_json::from_slice(&bytes)?;
        Ok(models::contacts_from_json(&json))
    }
}
