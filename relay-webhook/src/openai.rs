//! OpenAI chat-completions provider.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use std::time::{Duration, Instant};

use crate::traits::{CompletionProvider, CompletionRequest, ProviderError, ProviderResult};
use relay_common::config::OpenAiConfig;
use relay_common::Error;

const PROVIDER: &str = "openai";

/// OpenAI API provider (also works with compatible endpoints).
pub struct OpenAiCompletion {
    client: reqwest::Client,
    base_url: String,
}

impl OpenAiCompletion {
    /// Create a provider from configuration.
    pub fn new(config: &OpenAiConfig) -> relay_common::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", config.api_key))
            .map_err(|_| Error::Config("openai.api_key contains invalid characters".into()))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("Failed to build OpenAI client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl CompletionProvider for OpenAiCompletion {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn complete(&self, request: CompletionRequest) -> ProviderResult<Option<String>> {
        let start = Instant::now();
        let url = format!("{}/v1/chat/completions", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| ProviderError::Request {
                provider: PROVIDER,
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                provider: PROVIDER,
                status: status.as_u16(),
                body,
            });
        }

        let parsed: OpenAiResponse = response.json().await.map_err(|e| ProviderError::Decode {
            provider: PROVIDER,
            message: e.to_string(),
        })?;

        tracing::debug!(
            model = %request.model,
            latency_ms = start.elapsed().as_millis() as u64,
            completion_tokens = parsed.usage.as_ref().map_or(0, |u| u.completion_tokens),
            "Completion received"
        );

        Ok(parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|text| !text.trim().is_empty()))
    }
}

// ============================================================================
// OpenAI API Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    completion_tokens: u64,
}
