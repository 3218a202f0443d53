//! AI failure diagnosis over an OpenAI-compatible chat completion API

use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use crate::errors::AgentError;
use crate::http::client::HttpClient;

const SYSTEM_PROMPT: &str = "You are a senior Linux operations engineer who deploys Python web \
applications (Flask, Django, gunicorn). Diagnose the deployment error you are given: \
1. explain the cause; \
2. give concrete Linux commands that fix it and can be copied and run as-is; \
3. keep the steps short and clear enough for a beginner.";

/// Produces remediation text for a failed deployment
#[async_trait]
pub trait Diagnoser: Send + Sync {
    async fn diagnose(&self, failure: &str) -> Result<String, AgentError>;
}

/// Chat completion settings
#[derive(Debug, Clone)]
pub struct DiagnosisOptions {
    pub base_url: String,
    pub model: String,
    pub api_key: SecretString,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// Diagnoser backed by `POST <base_url>/chat/completions`
pub struct ChatCompletionDiagnoser {
    http: HttpClient,
    endpoint: Url,
    options: DiagnosisOptions,
}

impl ChatCompletionDiagnoser {
    pub fn new(options: DiagnosisOptions) -> Result<Self, AgentError> {
        let endpoint = Url::parse(&format!(
            "{}/chat/completions",
            options.base_url.trim_end_matches('/')
        ))?;
        Ok(Self {
            http: HttpClient::new(options.timeout)?,
            endpoint,
            options,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl Diagnoser for ChatCompletionDiagnoser {
    async fn diagnose(&self, failure: &str) -> Result<String, AgentError> {
        info!("Requesting AI diagnosis from {}", self.endpoint.host_str().unwrap_or_default());

        let user_prompt = format!("Deploying a web application failed with:\n{}", failure);
        let request = ChatRequest {
            model: &self.options.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &user_prompt,
                },
            ],
            temperature: self.options.temperature,
            max_tokens: self.options.max_tokens,
        };

        let response: ChatResponse = self
            .http
            .post_json(&self.endpoint, Some(&self.options.api_key), &request)
            .await
            .map_err(|e| AgentError::DiagnosisError(e.to_string()))?;

        let text = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or_else(|| AgentError::DiagnosisError("empty completion".to_string()))?;

        debug!("AI diagnosis received ({} chars)", text.len());
        Ok(text)
    }
}
