//! Relay Common - Shared configuration, errors, and logging for the relay.
//!
//! This crate provides:
//! - Configuration types and loading (file + environment)
//! - Configuration validation
//! - Error types and handling utilities
//! - Logging setup and trace ids
//! - Channel address checks shared by config validation and the webhook

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod logging;
pub mod util;
pub mod validation;

pub use config::{
    Config, ContextConfig, ObservabilityConfig, OpenAiConfig, RelayConfig, ServerConfig,
    TwilioConfig,
};
pub use error::{Error, Result};
pub use validation::{Validate, ValidationError, ValidationResult};
