//! Twilio messaging gateway.
//!
//! Sends WhatsApp messages through the Programmable Messaging API
//! (`POST /2010-04-01/Accounts/{sid}/Messages.json`, form-encoded, basic auth).

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::traits::{MessagingProvider, OutboundMessage, ProviderError, ProviderResult};
use relay_common::config::TwilioConfig;
use relay_common::util::mask_address;
use relay_common::Error;

const PROVIDER: &str = "twilio";

/// Twilio WhatsApp sender.
pub struct TwilioMessaging {
    client: reqwest::Client,
    account_sid: String,
    auth_token: String,
    sender: String,
    base_url: String,
}

impl TwilioMessaging {
    /// Create a gateway client from configuration.
    pub fn new(config: &TwilioConfig) -> relay_common::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("Failed to build Twilio client: {e}")))?;

        Ok(Self {
            client,
            account_sid: config.account_sid.clone(),
            auth_token: config.auth_token.clone(),
            sender: config.whatsapp_number.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.base_url, self.account_sid
        )
    }
}

#[async_trait]
impl MessagingProvider for TwilioMessaging {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    fn sender(&self) -> &str {
        &self.sender
    }

    async fn send(&self, message: OutboundMessage) -> ProviderResult<String> {
        let form = [
            ("From", message.from.as_str()),
            ("To", message.to.as_str()),
            ("Body", message.body.as_str()),
        ];

        let resp = self
            .client
            .post(self.messages_url())
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&form[..])
            .send()
            .await
            .map_err(|e| ProviderError::Request {
                provider: PROVIDER,
                message: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                provider: PROVIDER,
                status: status.as_u16(),
                body,
            });
        }

        let created: MessageResource = resp.json().await.map_err(|e| ProviderError::Decode {
            provider: PROVIDER,
            message: e.to_string(),
        })?;

        tracing::info!(
            to = %mask_address(&message.to),
            sid = %created.sid,
            "WhatsApp message sent"
        );
        Ok(created.sid)
    }
}

#[derive(Debug, Deserialize)]
struct MessageResource {
    sid: String,
}
