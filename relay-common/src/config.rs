//! Configuration types and loading for the relay.
//!
//! Configuration is read from `~/.chatrelay/config.json` (or the file named by
//! `CHATRELAY_CONFIG`) and then overlaid with environment variables. Every
//! field has a default, so an absent file is not an error; missing
//! credentials are reported by [`Config::validate`](crate::validation).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "CHATRELAY_CONFIG";

/// Get the configuration directory (`~/.chatrelay`).
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".chatrelay"),
        |dirs| dirs.home_dir().join(".chatrelay"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    std::env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| config_dir().join("config.json"))
}

// ============================================================================
// Server
// ============================================================================

/// HTTP listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address
    #[serde(default = "default_host")]
    pub host: String,

    /// Listen port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Maximum accepted request body in bytes
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

fn default_host() -> String {
    "127.0.0.1".into()
}

const fn default_port() -> u16 {
    3000
}

const fn default_body_limit() -> usize {
    64 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            body_limit_bytes: default_body_limit(),
        }
    }
}

// ============================================================================
// Messaging gateway (Twilio)
// ============================================================================

/// Twilio messaging-gateway credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwilioConfig {
    /// Account SID
    #[serde(default)]
    pub account_sid: String,

    /// Auth token
    #[serde(default)]
    pub auth_token: String,

    /// Sender identifier, e.g. `whatsapp:+14155238886`
    #[serde(default)]
    pub whatsapp_number: String,

    /// API base URL (overridable for sandboxes and tests)
    #[serde(default = "default_twilio_base_url")]
    pub base_url: String,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_twilio_base_url() -> String {
    "https://api.twilio.com".into()
}

const fn default_timeout_secs() -> u64 {
    30
}

impl Default for TwilioConfig {
    fn default() -> Self {
        Self {
            account_sid: String::new(),
            auth_token: String::new(),
            whatsapp_number: String::new(),
            base_url: default_twilio_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

// ============================================================================
// Completion provider (OpenAI)
// ============================================================================

/// OpenAI-compatible completion provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    /// API key
    #[serde(default)]
    pub api_key: String,

    /// Model identifier
    #[serde(default = "default_model")]
    pub model: String,

    /// API base URL (without the `/v1` suffix)
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,

    /// Maximum tokens in a generated reply
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Sampling temperature; omitted from requests when unset
    #[serde(default = "default_temperature")]
    pub temperature: Option<f64>,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_model() -> String {
    "gpt-3.5-turbo".into()
}

fn default_openai_base_url() -> String {
    "https://api.openai.com".into()
}

const fn default_max_tokens() -> u32 {
    150
}

#[allow(clippy::unnecessary_wraps)]
fn default_temperature() -> Option<f64> {
    Some(0.7)
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_model(),
            base_url: default_openai_base_url(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

// ============================================================================
// Relay behavior
// ============================================================================

/// Conversation behavior of the relay pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// System prompt seeded into every new conversation
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Number of most recent messages sent to the completion provider
    #[serde(default = "default_history_window")]
    pub history_window: usize,

    /// Reply used when the completion provider fails
    #[serde(default = "default_fallback_reply")]
    pub fallback_reply: String,

    /// Reply used when the completion provider returns no content
    #[serde(default = "default_empty_reply")]
    pub empty_reply: String,

    /// Best-effort message sent after a failed delivery
    #[serde(default = "default_apology_message")]
    pub apology_message: String,

    /// Require the gateway channel prefix on the sender (`whatsapp:`)
    #[serde(default = "default_true")]
    pub require_channel_prefix: bool,
}

fn default_system_prompt() -> String {
    "You are a helpful assistant replying over WhatsApp. \
     Keep answers short, friendly, and plain text."
        .into()
}

const fn default_history_window() -> usize {
    6
}

fn default_fallback_reply() -> String {
    "Sorry, I'm having trouble thinking right now. Please try again in a moment.".into()
}

fn default_empty_reply() -> String {
    "Sorry, I couldn't come up with a reply to that.".into()
}

fn default_apology_message() -> String {
    "Sorry, something went wrong while handling your message. Please try again later.".into()
}

const fn default_true() -> bool {
    true
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            history_window: default_history_window(),
            fallback_reply: default_fallback_reply(),
            empty_reply: default_empty_reply(),
            apology_message: default_apology_message(),
            require_channel_prefix: true,
        }
    }
}

// ============================================================================
// Context store
// ============================================================================

/// Retention settings for the conversation context store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Maximum number of conversations kept in memory
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Idle time after which a conversation is dropped (0 disables expiry)
    #[serde(default = "default_idle_ttl_secs")]
    pub idle_ttl_secs: u64,

    /// Interval of the background expiry sweep
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

const fn default_capacity() -> usize {
    1000
}

const fn default_idle_ttl_secs() -> u64 {
    24 * 60 * 60
}

const fn default_sweep_interval_secs() -> u64 {
    60
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            idle_ttl_secs: default_idle_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

// ============================================================================
// Observability
// ============================================================================

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level", alias = "level")]
    pub log_level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format", alias = "format")]
    pub log_format: String,
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

// ============================================================================
// Root
// ============================================================================

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub twilio: TwilioConfig,

    #[serde(default)]
    pub openai: OpenAiConfig,

    #[serde(default)]
    pub relay: RelayConfig,

    #[serde(default)]
    pub context: ContextConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load() -> Result<Self> {
        let path = config_path();
        if !path.exists() {
            tracing::info!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Load configuration with environment variable overrides.
    pub fn load_with_env() -> Result<Self> {
        let mut config = Self::load()?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary lookup (the process environment in
    /// production, a map in tests).
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(sid) = lookup("TWILIO_ACCOUNT_SID") {
            self.twilio.account_sid = sid;
        }
        if let Some(token) = lookup("TWILIO_AUTH_TOKEN") {
            self.twilio.auth_token = token;
        }
        if let Some(number) = lookup("TWILIO_WHATSAPP_NUMBER") {
            self.twilio.whatsapp_number = number;
        }
        if let Some(url) = lookup("TWILIO_BASE_URL") {
            self.twilio.base_url = url;
        }
        if let Some(key) = lookup("OPENAI_API_KEY") {
            self.openai.api_key = key;
        }
        if let Some(model) = lookup("OPENAI_MODEL") {
            self.openai.model = model;
        }
        if let Some(url) = lookup("OPENAI_BASE_URL") {
            self.openai.base_url = url;
        }
        if let Some(host) = lookup("CHATRELAY_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("CHATRELAY_PORT") {
            match port.parse() {
                Ok(p) => self.server.port = p,
                Err(_) => tracing::warn!(value = %port, "Ignoring invalid CHATRELAY_PORT"),
            }
        }
        if let Some(level) = lookup("CHATRELAY_LOG_LEVEL") {
            self.observability.log_level = level;
        }
        if let Some(format) = lookup("CHATRELAY_LOG_FORMAT") {
            self.observability.log_format = format;
        }
    }
}
