//! HTTP client implementation

use std::time::Duration;

use reqwest::{header, Client};
use secrecy::{ExposeSecret, SecretString};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, error};
use url::Url;

use crate::errors::AgentError;

/// Thin reqwest wrapper shared by the outbound collaborators
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// Create a new HTTP client with a per-request timeout
    pub fn new(timeout: Duration) -> Result<Self, AgentError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("deploybot/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    /// Make a JSON POST request with an optional bearer token
    pub async fn post_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        url: &Url,
        bearer: Option<&SecretString>,
        body: &B,
    ) -> Result<T, AgentError> {
        debug!("POST {}{}", url.host_str().unwrap_or_default(), url.path());

        let mut request = self.client.post(url.clone()).json(body);
        if let Some(token) = bearer {
            request = request.header(
                header::AUTHORIZATION,
                format!("Bearer {}", token.expose_secret()),
            );
        }

        let response = request.send().await.map_err(|e| e.without_url())?;
        Self::decode(url, response).await
    }

    /// Make a form-encoded POST request.
    ///
    /// Only the host is logged and errors carry no URL, since some gateways
    /// put keys in the path.
    pub async fn post_form<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        url: &Url,
        form: &B,
    ) -> Result<T, AgentError> {
        debug!("POST {} (form)", url.host_str().unwrap_or_default());

        let response = self
            .client
            .post(url.clone())
            .form(form)
            .send()
            .await
            .map_err(|e| e.without_url())?;
        Self::decode(url, response).await
    }

    async fn decode<T: DeserializeOwned>(
        url: &Url,
        response: reqwest::Response,
    ) -> Result<T, AgentError> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!(
                "HTTP POST to {} failed: {} - {}",
                url.host_str().unwrap_or_default(),
                status,
                body
            );
            return Err(AgentError::UpstreamError(format!("{}: {}", status, body)));
        }

        let body = response.json().await.map_err(|e| e.without_url())?;
        Ok(body)
    }
}
