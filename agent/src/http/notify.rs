//! Push notifications through a ServerChan-style gateway

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::info;
use url::Url;

use crate::deploy::report::Notification;
use crate::errors::AgentError;
use crate::http::client::HttpClient;

/// Delivers a rendered notification
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), AgentError>;
}

/// Gateway settings
#[derive(Debug, Clone)]
pub struct NotificationOptions {
    /// Gateway base, e.g. `https://sctapi.ftqq.com`
    pub endpoint: String,
    pub sendkey: SecretString,
    pub timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct GatewayReply {
    code: i64,
    #[serde(default)]
    message: Option<String>,
}

/// Notifier posting `{title, desp}` to `<endpoint>/<sendkey>.send`
pub struct ServerChanNotifier {
    http: HttpClient,
    url: Url,
}

impl ServerChanNotifier {
    pub fn new(options: NotificationOptions) -> Result<Self, AgentError> {
        let url = Url::parse(&format!(
            "{}/{}.send",
            options.endpoint.trim_end_matches('/'),
            options.sendkey.expose_secret()
        ))?;
        Ok(Self {
            http: HttpClient::new(options.timeout)?,
            url,
        })
    }
}

#[async_trait]
impl Notifier for ServerChanNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), AgentError> {
        let form = [
            ("title", notification.title.as_str()),
            ("desp", notification.body.as_str()),
        ];

        let reply: GatewayReply = self
            .http
            .post_form(&self.url, &form)
            .await
            .map_err(|e| AgentError::NotificationError(e.to_string()))?;

        if reply.code != 0 {
            return Err(AgentError::NotificationError(format!(
                "gateway returned code {}: {}",
                reply.code,
                reply.message.unwrap_or_default()
            )));
        }

        info!("Notification sent: {}", notification.title);
        Ok(())
    }
}
