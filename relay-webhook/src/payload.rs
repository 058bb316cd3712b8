//! Inbound webhook payload: extraction and validation.
//!
//! The gateway posts its native form-encoded webhook; JSON bodies with the
//! same field names are accepted as well. Both land in [`InboundPayload`],
//! which validates into an [`InboundMessage`].

use axum::{
    async_trait,
    extract::{FromRequest, Request},
    http::header::CONTENT_TYPE,
    Form, Json,
};
use serde::{Deserialize, Serialize};

use crate::handler::RelayError;
use relay_common::util::check_channel_address;
use relay_common::Error;

/// Raw webhook fields. Other gateway fields (`MessageSid`, `ProfileName`,
/// ...) are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InboundPayload {
    #[serde(rename = "Body", default)]
    pub body: Option<String>,
    #[serde(rename = "From", default)]
    pub from: Option<String>,
}

/// A validated inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Message text, trimmed and non-empty
    pub body: String,
    /// Sender channel address; also the conversation key
    pub from: String,
}

/// One violated field, reported in the 400 response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldViolation {
    pub field: &'static str,
    pub reason: String,
}

impl FieldViolation {
    fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

impl InboundPayload {
    /// Check both fields, reporting every violation at once.
    pub fn validate(self, require_prefix: bool) -> Result<InboundMessage, Vec<FieldViolation>> {
        let mut violations = Vec::new();

        let body = self.body.as_deref().map(str::trim).unwrap_or_default();
        if body.is_empty() {
            violations.push(FieldViolation::new("Body", "must be a non-empty string"));
        }

        let from = self.from.as_deref().map(str::trim).unwrap_or_default();
        if let Err(e) = check_channel_address(from, require_prefix) {
            violations.push(FieldViolation::new("From", e.reason()));
        }

        if violations.is_empty() {
            Ok(InboundMessage {
                body: body.to_string(),
                from: from.to_string(),
            })
        } else {
            Err(violations)
        }
    }
}

fn is_json(req: &Request) -> bool {
    req.headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| {
            let mime = ct.split(';').next().unwrap_or_default().trim();
            mime == "application/json" || mime.ends_with("+json")
        })
}

#[async_trait]
impl<S> FromRequest<S> for InboundPayload
where
    S: Send + Sync,
{
    type Rejection = RelayError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let decoded = if is_json(&req) {
            Json::<Self>::from_request(req, state)
                .await
                .map(|Json(payload)| payload)
                .map_err(|rejection| rejection.body_text())
        } else {
            Form::<Self>::from_request(req, state)
                .await
                .map(|Form(payload)| payload)
                .map_err(|rejection| rejection.body_text())
        };

        decoded.map_err(|reason| {
            tracing::warn!(reason = %reason, "Rejected undecodable webhook payload");
            RelayError::Payload(Error::InvalidInput(reason))
        })
    }
}
