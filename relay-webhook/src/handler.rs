//! The relay pipeline: one inbound message in, one reply out.
//!
//! ```text
//! validate → lease(sender) → context + user msg → completion → + assistant msg
//!          → put → release → deliver reply ──fail──→ apology (best effort)
//! ```
//!
//! Completion failures and apology failures are absorbed and surface only as
//! typed outcomes ([`CompletionOutcome`], [`ApologyOutcome`]); a failed
//! primary delivery is returned as [`RelayError::Delivery`]. A panic anywhere
//! after validation is caught, answered with one apology, and returned as
//! [`RelayError::Unexpected`].

use futures_util::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::Instrument;

use crate::context::ContextStore;
use crate::message::ConversationContext;
use crate::payload::{FieldViolation, InboundMessage, InboundPayload};
use crate::traits::{
    CompletionProvider, CompletionRequest, MessagingProvider, OutboundMessage, ProviderError,
};
use relay_common::logging::generate_trace_id;
use relay_common::util::mask_address;
use relay_common::Config;

/// Per-request behavior, taken from configuration.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: Option<f64>,
    pub history_window: usize,
    pub fallback_reply: String,
    pub empty_reply: String,
    pub apology_message: String,
    pub require_channel_prefix: bool,
}

impl RelaySettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            model: config.openai.model.clone(),
            max_tokens: config.openai.max_tokens,
            temperature: config.openai.temperature,
            history_window: config.relay.history_window,
            fallback_reply: config.relay.fallback_reply.clone(),
            empty_reply: config.relay.empty_reply.clone(),
            apology_message: config.relay.apology_message.clone(),
            require_channel_prefix: config.relay.require_channel_prefix,
        }
    }
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// What the completion step produced.
#[derive(Debug)]
pub enum CompletionOutcome {
    /// Provider returned text
    Generated(String),
    /// Provider answered without content
    Empty,
    /// Provider call failed; the fallback reply is used
    Failed(ProviderError),
}

impl CompletionOutcome {
    /// Text to store and deliver for this outcome.
    pub fn reply_text<'a>(&'a self, settings: &'a RelaySettings) -> &'a str {
        match self {
            Self::Generated(text) => text,
            Self::Empty => &settings.empty_reply,
            Self::Failed(_) => &settings.fallback_reply,
        }
    }

    pub const fn source(&self) -> ReplySource {
        match self {
            Self::Generated(_) => ReplySource::Generated,
            Self::Empty => ReplySource::Empty,
            Self::Failed(_) => ReplySource::Fallback,
        }
    }
}

/// Where a delivered reply came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplySource {
    Generated,
    Empty,
    Fallback,
}

/// Result of the best-effort apology after a failed delivery.
#[derive(Debug)]
pub enum ApologyOutcome {
    Delivered,
    Failed(ProviderError),
    /// The messaging client panicked while sending the apology
    Panicked(String),
}

impl ApologyOutcome {
    pub const fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered)
    }
}

/// A successfully relayed reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayReceipt {
    pub reply: String,
    pub source: ReplySource,
    /// Gateway message id
    pub message_id: String,
}

/// Relay failures visible to the webhook caller.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Body could not be decoded as JSON or form data
    #[error(transparent)]
    Payload(#[from] relay_common::Error),

    /// Decoded, but `Body`/`From` are missing or malformed
    #[error("Invalid webhook fields: {0:?}")]
    Validation(Vec<FieldViolation>),

    /// The reply could not be delivered
    #[error("Reply delivery failed: {source}")]
    Delivery {
        #[source]
        source: ProviderError,
        apology: ApologyOutcome,
    },

    /// Relaying panicked after validation
    #[error("Unexpected relay failure: {reason}")]
    Unexpected {
        reason: String,
        apology: ApologyOutcome,
    },
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_reason(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<String>()
        .cloned()
        .or_else(|| panic.downcast_ref::<&str>().map(|s| (*s).to_string()))
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Orchestrates one request/response cycle.
pub struct Relay {
    completion: Arc<dyn CompletionProvider>,
    messaging: Arc<dyn MessagingProvider>,
    store: Arc<ContextStore>,
    settings: RelaySettings,
}

impl Relay {
    pub fn new(
        completion: Arc<dyn CompletionProvider>,
        messaging: Arc<dyn MessagingProvider>,
        store: Arc<ContextStore>,
        settings: RelaySettings,
    ) -> Self {
        Self {
            completion,
            messaging,
            store,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<ContextStore> {
        &self.store
    }

    pub fn settings(&self) -> &RelaySettings {
        &self.settings
    }

    /// Validate a decoded payload and relay it.
    pub async fn handle_payload(
        &self,
        payload: InboundPayload,
    ) -> Result<RelayReceipt, RelayError> {
        let inbound = payload
            .validate(self.settings.require_channel_prefix)
            .map_err(|violations| {
                tracing::warn!(?violations, "Rejected invalid webhook payload");
                RelayError::Validation(violations)
            })?;
        self.handle(inbound).await
    }

    /// Relay a validated message.
    pub async fn handle(&self, inbound: InboundMessage) -> Result<RelayReceipt, RelayError> {
        let span = tracing::info_span!(
            "relay",
            trace_id = %generate_trace_id(),
            sender = %mask_address(&inbound.from),
        );
        let key = inbound.from.clone();

        async move {
            match AssertUnwindSafe(self.relay(inbound)).catch_unwind().await {
                Ok(result) => result,
                Err(panic) => {
                    let reason = panic_reason(&*panic);
                    tracing::error!(reason = %reason, "Relay panicked");
                    let apology = self.send_apology(&key).await;
                    Err(RelayError::Unexpected { reason, apology })
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn relay(&self, inbound: InboundMessage) -> Result<RelayReceipt, RelayError> {
        let key = inbound.from;

        let outcome = {
            let lease = self.store.lease(&key).await;
            let mut context = self.store.get_or_create(lease.key());
            context.push_user(inbound.body);

            let outcome = self.complete(&context).await;
            context.push_assistant(outcome.reply_text(&self.settings));
            tracing::debug!(turns = context.turns(), "Conversation updated");
            self.store.put(lease.key(), context);
            outcome
        };

        let reply = outcome.reply_text(&self.settings).to_string();
        match self.deliver(&key, reply.clone()).await {
            Ok(message_id) => Ok(RelayReceipt {
                reply,
                source: outcome.source(),
                message_id,
            }),
            Err(source) => {
                tracing::error!(error = %source, "Failed to deliver reply");
                let apology = self.send_apology(&key).await;
                Err(RelayError::Delivery { source, apology })
            }
        }
    }

    fn completion_request(&self, context: &ConversationContext) -> CompletionRequest {
        CompletionRequest {
            model: self.settings.model.clone(),
            messages: context.recent(self.settings.history_window).to_vec(),
            max_tokens: self.settings.max_tokens,
            temperature: self.settings.temperature,
        }
    }

    async fn complete(&self, context: &ConversationContext) -> CompletionOutcome {
        let request = self.completion_request(context);
        match self.completion.complete(request).await {
            Ok(Some(text)) => CompletionOutcome::Generated(text),
            Ok(None) => {
                tracing::warn!(provider = self.completion.name(), "Completion returned no content");
                CompletionOutcome::Empty
            }
            Err(e) => {
                tracing::warn!(error = %e, "Completion failed, using fallback reply");
                CompletionOutcome::Failed(e)
            }
        }
    }

    async fn deliver(&self, to: &str, body: String) -> Result<String, ProviderError> {
        self.messaging
            .send(OutboundMessage {
                from: self.messaging.sender().to_string(),
                to: to.to_string(),
                body,
            })
            .await
    }

    async fn send_apology(&self, to: &str) -> ApologyOutcome {
        let send = self.deliver(to, self.settings.apology_message.clone());
        match AssertUnwindSafe(send).catch_unwind().await {
            Ok(Ok(_)) => ApologyOutcome::Delivered,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Apology delivery failed");
                ApologyOutcome::Failed(e)
            }
            Err(panic) => {
                let reason = panic_reason(&*panic);
                tracing::warn!(reason = %reason, "Apology delivery panicked");
                ApologyOutcome::Panicked(reason)
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::context::EvictionPolicy;
    use crate::message::{ChatMessage, Role};
    use crate::traits::ProviderResult;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Completion stub replaying scripted results and recording requests.
    #[derive(Default)]
    pub(crate) struct ScriptedCompletion {
        replies: Mutex<VecDeque<ProviderResult<Option<String>>>>,
        pub(crate) requests: Mutex<Vec<CompletionRequest>>,
        delay: Option<Duration>,
    }

    impl ScriptedCompletion {
        pub(crate) fn replying(text: &str) -> Self {
            Self::default().then(Ok(Some(text.to_string())))
        }

        pub(crate) fn then(self, reply: ProviderResult<Option<String>>) -> Self {
            self.replies.lock().unwrap().push_back(reply);
            self
        }

        pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        pub(crate) fn calls(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl CompletionProvider for ScriptedCompletion {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn complete(&self, request: CompletionRequest) -> ProviderResult<Option<String>> {
            let turn = {
                let mut requests = self.requests.lock().unwrap();
                requests.push(request);
                requests.len()
            };
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Some(format!("reply {turn}"))))
        }
    }

    /// Messaging stub failing the first `failures` sends.
    #[derive(Default)]
    pub(crate) struct RecordingMessaging {
        pub(crate) sent: Mutex<Vec<OutboundMessage>>,
        failures: Mutex<usize>,
    }

    impl RecordingMessaging {
        pub(crate) fn failing(failures: usize) -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                failures: Mutex::new(failures),
            }
        }

        pub(crate) fn sent(&self) -> Vec<OutboundMessage> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MessagingProvider for RecordingMessaging {
        fn name(&self) -> &'static str {
            "recording"
        }

        fn sender(&self) -> &str {
            "whatsapp:+14155238886"
        }

        async fn send(&self, message: OutboundMessage) -> ProviderResult<String> {
            let n = {
                let mut sent = self.sent.lock().unwrap();
                sent.push(message);
                sent.len()
            };
            let mut failures = self.failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(ProviderError::Api {
                    provider: "recording",
                    status: 503,
                    body: "unavailable".into(),
                });
            }
            Ok(format!("SM{n}"))
        }
    }

    /// Completion stub that panics on every call.
    pub(crate) struct PanickingCompletion;

    #[async_trait]
    impl CompletionProvider for PanickingCompletion {
        fn name(&self) -> &'static str {
            "panicking"
        }

        async fn complete(&self, _request: CompletionRequest) -> ProviderResult<Option<String>> {
            panic!("completion client bug");
        }
    }

    pub(crate) fn relay_with(
        completion: Arc<ScriptedCompletion>,
        messaging: Arc<RecordingMessaging>,
    ) -> Relay {
        let store = Arc::new(ContextStore::new(
            "You are a test assistant.",
            EvictionPolicy::default(),
        ));
        Relay::new(completion, messaging, store, RelaySettings::default())
    }

    fn inbound(body: &str, from: &str) -> InboundMessage {
        InboundMessage {
            body: body.into(),
            from: from.into(),
        }
    }

    fn provider_down() -> ProviderError {
        ProviderError::Request {
            provider: "scripted",
            message: "connection refused".into(),
        }
    }

    #[tokio::test]
    async fn end_to_end_reply_goes_back_to_sender() {
        let completion = Arc::new(ScriptedCompletion::replying("Hi there!"));
        let messaging = Arc::new(RecordingMessaging::default());
        let relay = relay_with(completion.clone(), messaging.clone());

        let receipt = relay
            .handle(inbound("Hello", "whatsapp:+100"))
            .await
            .unwrap();

        assert_eq!(receipt.reply, "Hi there!");
        assert_eq!(receipt.source, ReplySource::Generated);
        assert_eq!(
            messaging.sent(),
            vec![OutboundMessage {
                from: "whatsapp:+14155238886".into(),
                to: "whatsapp:+100".into(),
                body: "Hi there!".into(),
            }]
        );
    }

    #[tokio::test]
    async fn one_cycle_stores_three_messages() {
        let completion = Arc::new(ScriptedCompletion::replying("Hi there!"));
        let messaging = Arc::new(RecordingMessaging::default());
        let relay = relay_with(completion.clone(), messaging);

        relay.handle(inbound("Hello", "whatsapp:+100")).await.unwrap();

        let ctx = relay.store().get_or_create("whatsapp:+100");
        let roles: Vec<Role> = ctx.messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant]);
        assert_eq!(ctx.messages[1].content, "Hello");
        assert_eq!(ctx.messages[2].content, "Hi there!");

        let requests = completion.requests.lock().unwrap();
        assert_eq!(requests[0].messages.len(), 2);
        assert_eq!(requests[0].max_tokens, 150);
        assert_eq!(requests[0].temperature, Some(0.7));
    }

    #[tokio::test]
    async fn completion_window_is_bounded_and_ends_with_user() {
        let completion = Arc::new(ScriptedCompletion::default());
        let messaging = Arc::new(RecordingMessaging::default());
        let relay = relay_with(completion.clone(), messaging);

        for i in 0..5 {
            relay
                .handle(inbound(&format!("question {i}"), "whatsapp:+100"))
                .await
                .unwrap();
        }

        let requests = completion.requests.lock().unwrap();
        assert_eq!(requests.len(), 5);
        for request in requests.iter() {
            assert!(request.messages.len() <= 6);
        }
        let last = requests.last().unwrap();
        assert_eq!(last.messages.len(), 6);
        assert_eq!(
            last.messages.last(),
            Some(&ChatMessage::user("question 4"))
        );
        assert_eq!(last.messages[0].role, Role::Assistant);
        assert_eq!(last.messages[1], ChatMessage::user("question 2"));
    }

    #[tokio::test]
    async fn completion_failure_delivers_fallback() {
        let completion = Arc::new(ScriptedCompletion::default().then(Err(provider_down())));
        let messaging = Arc::new(RecordingMessaging::default());
        let relay = relay_with(completion, messaging.clone());

        let receipt = relay
            .handle(inbound("Hello", "whatsapp:+100"))
            .await
            .unwrap();

        let fallback = RelaySettings::default().fallback_reply;
        assert_eq!(receipt.source, ReplySource::Fallback);
        assert_eq!(messaging.sent()[0].body, fallback);

        let ctx = relay.store().get_or_create("whatsapp:+100");
        assert_eq!(ctx.messages[2], ChatMessage::assistant(fallback));
    }

    #[tokio::test]
    async fn empty_completion_uses_generic_reply() {
        let completion = Arc::new(ScriptedCompletion::default().then(Ok(None)));
        let messaging = Arc::new(RecordingMessaging::default());
        let relay = relay_with(completion, messaging.clone());

        let receipt = relay
            .handle(inbound("Hello", "whatsapp:+100"))
            .await
            .unwrap();

        assert_eq!(receipt.source, ReplySource::Empty);
        assert_eq!(messaging.sent()[0].body, RelaySettings::default().empty_reply);
    }

    #[tokio::test]
    async fn delivery_failure_sends_one_apology() {
        let completion = Arc::new(ScriptedCompletion::replying("Hi there!"));
        let messaging = Arc::new(RecordingMessaging::failing(1));
        let relay = relay_with(completion, messaging.clone());

        let err = relay
            .handle(inbound("Hello", "whatsapp:+100"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            RelayError::Delivery {
                apology: ApologyOutcome::Delivered,
                ..
            }
        ));
        let sent = messaging.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].to, "whatsapp:+100");
        assert_eq!(sent[1].body, RelaySettings::default().apology_message);
    }

    #[tokio::test]
    async fn failed_apology_is_absorbed() {
        let completion = Arc::new(ScriptedCompletion::replying("Hi there!"));
        let messaging = Arc::new(RecordingMessaging::failing(2));
        let relay = relay_with(completion, messaging.clone());

        let err = relay
            .handle(inbound("Hello", "whatsapp:+100"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            RelayError::Delivery {
                apology: ApologyOutcome::Failed(_),
                ..
            }
        ));
        assert_eq!(messaging.sent().len(), 2);
    }

    #[tokio::test]
    async fn invalid_payload_makes_no_upstream_calls() {
        let completion = Arc::new(ScriptedCompletion::default());
        let messaging = Arc::new(RecordingMessaging::default());
        let relay = relay_with(completion.clone(), messaging.clone());

        let err = relay
            .handle_payload(InboundPayload {
                body: Some("".into()),
                from: Some("whatsapp:+100".into()),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, RelayError::Validation(ref v) if v[0].field == "Body"));
        assert_eq!(completion.calls(), 0);
        assert!(messaging.sent().is_empty());
        assert!(relay.store().is_empty());
    }

    #[tokio::test]
    async fn completion_panic_sends_one_apology() {
        let messaging = Arc::new(RecordingMessaging::default());
        let store = Arc::new(ContextStore::new("sys", EvictionPolicy::default()));
        let relay = Relay::new(
            Arc::new(PanickingCompletion),
            messaging.clone(),
            Arc::clone(&store),
            RelaySettings::default(),
        );

        let err = relay
            .handle(inbound("Hello", "whatsapp:+100"))
            .await
            .unwrap_err();

        match err {
            RelayError::Unexpected { reason, apology } => {
                assert_eq!(reason, "completion client bug");
                assert!(apology.is_delivered());
            }
            other => panic!("expected Unexpected, got {other:?}"),
        }
        let sent = messaging.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "whatsapp:+100");
        assert_eq!(sent[0].body, RelaySettings::default().apology_message);

        // The lease was released during unwinding.
        assert_eq!(store.active_leases(), 0);
        let _lease = store.lease("whatsapp:+100").await;
    }

    #[test]
    fn panic_reason_reads_str_and_string_payloads() {
        let literal: Box<dyn Any + Send> = Box::new("boom");
        let owned: Box<dyn Any + Send> = Box::new(String::from("bang"));
        let other: Box<dyn Any + Send> = Box::new(7_u8);

        assert_eq!(panic_reason(&*literal), "boom");
        assert_eq!(panic_reason(&*owned), "bang");
        assert_eq!(panic_reason(&*other), "unknown panic");
    }

    #[tokio::test]
    async fn concurrent_requests_from_one_sender_stay_ordered() {
        let completion =
            Arc::new(ScriptedCompletion::default().with_delay(Duration::from_millis(20)));
        let messaging = Arc::new(RecordingMessaging::default());
        let relay = Arc::new(relay_with(completion.clone(), messaging));

        let a = {
            let relay = Arc::clone(&relay);
            tokio::spawn(async move { relay.handle(inbound("first", "whatsapp:+100")).await })
        };
        let b = {
            let relay = Arc::clone(&relay);
            tokio::spawn(async move { relay.handle(inbound("second", "whatsapp:+100")).await })
        };
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        let ctx = relay.store().get_or_create("whatsapp:+100");
        let roles: Vec<Role> = ctx.messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![
                Role::System,
                Role::User,
                Role::Assistant,
                Role::User,
                Role::Assistant
            ]
        );

        // The second completion saw the first exchange.
        let requests = completion.requests.lock().unwrap();
        assert_eq!(requests[1].messages.len(), 4);
    }
}
