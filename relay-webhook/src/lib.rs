//! Relay Webhook - WhatsApp to LLM relay.
//!
//! Receives inbound WhatsApp messages from the Twilio gateway, asks a
//! completion provider for a reply using the sender's recent conversation,
//! and sends the reply back to the sender through the gateway.
//!
//! ## Architecture
//!
//! ```text
//! WhatsApp → Twilio → POST /webhook → Relay ──→ CompletionProvider (OpenAI)
//!                                       │  ↕
//!                                       │ ContextStore (bounded, per-sender lease)
//!                                       ↓
//! WhatsApp ← Twilio ←────────── MessagingProvider
//! ```

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod context;
pub mod handler;
pub mod message;
pub mod openai;
pub mod payload;
pub mod routes;
pub mod traits;
pub mod twilio;

pub use context::{ContextStore, ConversationLease, EvictionPolicy};
pub use handler::{
    ApologyOutcome, CompletionOutcome, Relay, RelayError, RelayReceipt, RelaySettings,
    ReplySource,
};
pub use message::{ChatMessage, ConversationContext, Role};
pub use openai::OpenAiCompletion;
pub use payload::{FieldViolation, InboundMessage, InboundPayload};
pub use routes::build_router;
pub use traits::{
    CompletionProvider, CompletionRequest, MessagingProvider, OutboundMessage, ProviderError,
    ProviderResult,
};
pub use twilio::TwilioMessaging;

use relay_common::config::Config;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

/// Wire the production providers and the context store from configuration.
pub fn build_relay(config: &Config) -> relay_common::Result<Relay> {
    let completion = Arc::new(OpenAiCompletion::new(&config.openai)?);
    let messaging = Arc::new(TwilioMessaging::new(&config.twilio)?);
    let store = Arc::new(ContextStore::new(
        config.relay.system_prompt.clone(),
        EvictionPolicy::from_config(&config.context),
    ));

    Ok(Relay::new(
        completion,
        messaging,
        store,
        RelaySettings::from_config(config),
    ))
}

/// Periodically drop idle conversations.
pub fn spawn_expiry_sweep(
    store: Arc<ContextStore>,
    every: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            let purged = store.purge_expired();
            if purged > 0 {
                tracing::debug!(purged, remaining = store.len(), "Expired conversations purged");
            }
        }
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}

/// Start the relay HTTP server on the configured address.
pub async fn start_server(config: &Config) -> anyhow::Result<()> {
    let addr = SocketAddr::from((
        config.server.host.parse::<std::net::IpAddr>()?,
        config.server.port,
    ));
    let listener = TcpListener::bind(addr).await?;
    serve(listener, config, shutdown_signal()).await
}

/// Serve the relay on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, config: &Config, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let relay = Arc::new(build_relay(config)?);
    let sweep_handle = spawn_expiry_sweep(
        Arc::clone(relay.store()),
        Duration::from_secs(config.context.sweep_interval_secs),
    );
    let router = build_router(relay, config.server.body_limit_bytes);

    tracing::info!(
        model = %config.openai.model,
        capacity = config.context.capacity,
        "Starting relay webhook on {}",
        listener.local_addr()?
    );

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;

    sweep_handle.abort();
    Ok(())
}
