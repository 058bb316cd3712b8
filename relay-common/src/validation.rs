//! Configuration validation.
//!
//! Missing credentials are a deployment-time failure: the binary validates
//! its configuration before binding a socket and refuses to start otherwise.

use thiserror::Error;

use crate::config::{Config, ContextConfig, OpenAiConfig, RelayConfig, ServerConfig, TwilioConfig};
use crate::util::check_channel_address;

/// Configuration validation error.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid port {port}: must be between 1 and 65535")]
    InvalidPort { port: u16, field: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Multiple validation errors: {0:?}")]
    Multiple(Vec<ValidationError>),
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Trait for validatable configuration sections.
pub trait Validate {
    /// Validate this configuration section, collecting every problem.
    fn validate_into(&self, errors: &mut Vec<ValidationError>);

    /// Validate this configuration section.
    fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();
        self.validate_into(&mut errors);
        collapse(errors)
    }
}

fn collapse(mut errors: Vec<ValidationError>) -> ValidationResult<()> {
    match errors.len() {
        0 => Ok(()),
        1 => Err(errors.remove(0)),
        _ => Err(ValidationError::Multiple(errors)),
    }
}

fn require(value: &str, field: &str, errors: &mut Vec<ValidationError>) {
    if value.trim().is_empty() {
        errors.push(ValidationError::MissingField {
            field: field.to_string(),
        });
    }
}

fn require_url(value: &str, field: &str, errors: &mut Vec<ValidationError>) {
    if !(value.starts_with("http://") || value.starts_with("https://")) {
        errors.push(ValidationError::InvalidValue {
            field: field.to_string(),
            reason: format!("'{value}' is not an http(s) URL"),
        });
    }
}

impl Validate for ServerConfig {
    fn validate_into(&self, errors: &mut Vec<ValidationError>) {
        if self.port == 0 {
            errors.push(ValidationError::InvalidPort {
                port: self.port,
                field: "server.port".into(),
            });
        }
        if self.host.parse::<std::net::IpAddr>().is_err() {
            errors.push(ValidationError::InvalidValue {
                field: "server.host".into(),
                reason: format!("'{}' is not an IP address", self.host),
            });
        }
    }
}

impl Validate for TwilioConfig {
    fn validate_into(&self, errors: &mut Vec<ValidationError>) {
        require(&self.account_sid, "twilio.account_sid", errors);
        require(&self.auth_token, "twilio.auth_token", errors);
        require(&self.whatsapp_number, "twilio.whatsapp_number", errors);
        if !self.whatsapp_number.trim().is_empty() {
            if let Err(e) = check_channel_address(&self.whatsapp_number, true) {
                errors.push(ValidationError::InvalidValue {
                    field: "twilio.whatsapp_number".into(),
                    reason: e.reason().into(),
                });
            }
        }
        require_url(&self.base_url, "twilio.base_url", errors);
    }
}

impl Validate for OpenAiConfig {
    fn validate_into(&self, errors: &mut Vec<ValidationError>) {
        require(&self.api_key, "openai.api_key", errors);
        require(&self.model, "openai.model", errors);
        require_url(&self.base_url, "openai.base_url", errors);
        if self.max_tokens == 0 || self.max_tokens > 4096 {
            errors.push(ValidationError::InvalidValue {
                field: "openai.max_tokens".into(),
                reason: "must be between 1 and 4096".into(),
            });
        }
        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                errors.push(ValidationError::InvalidValue {
                    field: "openai.temperature".into(),
                    reason: "must be between 0.0 and 2.0".into(),
                });
            }
        }
    }
}

impl Validate for RelayConfig {
    fn validate_into(&self, errors: &mut Vec<ValidationError>) {
        require(&self.system_prompt, "relay.system_prompt", errors);
        require(&self.fallback_reply, "relay.fallback_reply", errors);
        require(&self.empty_reply, "relay.empty_reply", errors);
        require(&self.apology_message, "relay.apology_message", errors);
        if self.history_window == 0 {
            errors.push(ValidationError::InvalidValue {
                field: "relay.history_window".into(),
                reason: "must be at least 1".into(),
            });
        }
    }
}

impl Validate for ContextConfig {
    fn validate_into(&self, errors: &mut Vec<ValidationError>) {
        if self.capacity == 0 {
            errors.push(ValidationError::InvalidValue {
                field: "context.capacity".into(),
                reason: "must be at least 1".into(),
            });
        }
        if self.sweep_interval_secs == 0 {
            errors.push(ValidationError::InvalidValue {
                field: "context.sweep_interval_secs".into(),
                reason: "must be at least 1".into(),
            });
        }
    }
}

impl Config {
    /// Validate the entire configuration.
    pub fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();
        self.server.validate_into(&mut errors);
        self.twilio.validate_into(&mut errors);
        self.openai.validate_into(&mut errors);
        self.relay.validate_into(&mut errors);
        self.context.validate_into(&mut errors);
        collapse(errors)
    }
}
