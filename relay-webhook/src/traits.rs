//! Provider traits for the two upstream collaborators.

use async_trait::async_trait;
use serde::Serialize;

use crate::message::ChatMessage;

/// Result type for provider calls.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Upstream provider error.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Request to {provider} failed: {message}")]
    Request {
        provider: &'static str,
        message: String,
    },

    #[error("{provider} API error ({status}): {body}")]
    Api {
        provider: &'static str,
        status: u16,
        body: String,
    },

    #[error("Failed to parse {provider} response: {message}")]
    Decode {
        provider: &'static str,
        message: String,
    },
}

impl ProviderError {
    /// Name of the provider that failed.
    pub const fn provider(&self) -> &'static str {
        match self {
            Self::Request { provider, .. }
            | Self::Api { provider, .. }
            | Self::Decode { provider, .. } => *provider,
        }
    }
}

/// A completion request: the recent conversation window plus sampling limits.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

/// Language-model backend producing replies.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Provider name (e.g., "openai").
    fn name(&self) -> &'static str;

    /// Generate a reply. `Ok(None)` means the provider returned no content.
    async fn complete(&self, request: CompletionRequest) -> ProviderResult<Option<String>>;
}

/// A text message to deliver through the messaging gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Configured sender identifier
    pub from: String,
    /// Recipient, always the inbound sender
    pub to: String,
    pub body: String,
}

/// Messaging gateway delivering replies.
#[async_trait]
pub trait MessagingProvider: Send + Sync {
    /// Provider name (e.g., "twilio").
    fn name(&self) -> &'static str;

    /// Sender identifier used as `from` on outbound messages.
    fn sender(&self) -> &str;

    /// Deliver a message. Returns the provider's message id.
    async fn send(&self, message: OutboundMessage) -> ProviderResult<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_display() {
        let err = ProviderError::Api {
            provider: "twilio",
            status: 401,
            body: "Authenticate".into(),
        };
        assert_eq!(err.to_string(), "twilio API error (401): Authenticate");
        assert_eq!(err.provider(), "twilio");
    }

    #[test]
    fn completion_request_omits_unset_temperature() {
        let request = CompletionRequest {
            model: "gpt-3.5-turbo".into(),
            messages: vec![ChatMessage::user("hi")],
            max_tokens: 150,
            temperature: None,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("temperature").is_none());
        assert_eq!(json["messages"][0]["role"], "user");
    }
}
