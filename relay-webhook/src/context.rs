//! Bounded, per-key serialized conversation store.
//!
//! Conversations live in an LRU map capped at [`EvictionPolicy::capacity`];
//! entries idle longer than [`EvictionPolicy::idle_ttl`] are treated as absent
//! and removed by [`ContextStore::purge_expired`].
//!
//! A request for a sender holds that sender's [`ConversationLease`] across
//! the whole get-mutate-put sequence, so two webhook deliveries from the same
//! sender cannot interleave their user/assistant appends. Leases for
//! different senders are independent.

use dashmap::DashMap;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::time::Instant;

use crate::message::ConversationContext;
use relay_common::config::ContextConfig;

const DEFAULT_CAPACITY: NonZeroUsize = match NonZeroUsize::new(1000) {
    Some(n) => n,
    None => NonZeroUsize::MIN,
};

/// Retention rules for the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvictionPolicy {
    /// Maximum number of conversations; the least recently used is dropped
    pub capacity: NonZeroUsize,
    /// Conversations untouched for longer than this are expired
    pub idle_ttl: Option<Duration>,
}

impl EvictionPolicy {
    pub const fn new(capacity: NonZeroUsize) -> Self {
        Self {
            capacity,
            idle_ttl: None,
        }
    }

    pub const fn with_idle_ttl(mut self, ttl: Duration) -> Self {
        self.idle_ttl = Some(ttl);
        self
    }

    pub fn from_config(config: &ContextConfig) -> Self {
        let capacity = NonZeroUsize::new(config.capacity).unwrap_or(NonZeroUsize::MIN);
        let policy = Self::new(capacity);
        match config.idle_ttl_secs {
            0 => policy,
            secs => policy.with_idle_ttl(Duration::from_secs(secs)),
        }
    }

    fn is_expired(&self, touched: Instant, now: Instant) -> bool {
        self.idle_ttl
            .is_some_and(|ttl| now.saturating_duration_since(touched) > ttl)
    }
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY).with_idle_ttl(Duration::from_secs(24 * 60 * 60))
    }
}

struct Slot {
    context: ConversationContext,
    touched: Instant,
}

type Gates = DashMap<String, Arc<AsyncMutex<()>>>;

/// Process-wide conversation store.
pub struct ContextStore {
    entries: Mutex<LruCache<String, Slot>>,
    gates: Arc<Gates>,
    policy: EvictionPolicy,
    system_prompt: String,
}

impl ContextStore {
    pub fn new(system_prompt: impl Into<String>, policy: EvictionPolicy) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(policy.capacity)),
            gates: Arc::new(DashMap::new()),
            policy,
            system_prompt: system_prompt.into(),
        }
    }

    pub fn policy(&self) -> &EvictionPolicy {
        &self.policy
    }

    fn lock_entries(&self) -> MutexGuard<'_, LruCache<String, Slot>> {
        // Slots are only ever replaced whole, so a poisoned map is still consistent.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the conversation for `key`, creating it (seeded with the system
    /// prompt) when absent or expired.
    pub fn get_or_create(&self, key: &str) -> ConversationContext {
        let now = Instant::now();
        let mut entries = self.lock_entries();

        if let Some(slot) = entries.get_mut(key) {
            if !self.policy.is_expired(slot.touched, now) {
                slot.touched = now;
                return slot.context.clone();
            }
            tracing::debug!(key = %key, "Conversation expired, starting a new one");
        }

        let context = ConversationContext::new(key, &self.system_prompt);
        let slot = Slot {
            context: context.clone(),
            touched: now,
        };
        if let Some((evicted, _)) = entries.push(key.to_string(), slot) {
            if evicted != key {
                tracing::debug!(evicted = %evicted, "Conversation evicted (capacity)");
            }
        }
        context
    }

    /// Overwrite the stored conversation for `key`.
    pub fn put(&self, key: &str, context: ConversationContext) {
        let slot = Slot {
            context,
            touched: Instant::now(),
        };
        if let Some((evicted, _)) = self.lock_entries().push(key.to_string(), slot) {
            if evicted != key {
                tracing::debug!(evicted = %evicted, "Conversation evicted (capacity)");
            }
        }
    }

    /// Acquire exclusive access to the conversation for `key`.
    ///
    /// Waits while another request for the same key holds its lease.
    pub async fn lease(&self, key: &str) -> ConversationLease {
        let gate = Arc::clone(self.gates.entry(key.to_string()).or_default().value());
        let guard = gate.lock_owned().await;
        ConversationLease {
            key: key.to_string(),
            gates: Arc::clone(&self.gates),
            guard: Some(guard),
        }
    }

    /// Drop every conversation idle longer than the TTL.
    pub fn purge_expired(&self) -> usize {
        if self.policy.idle_ttl.is_none() {
            return 0;
        }

        let now = Instant::now();
        let mut entries = self.lock_entries();
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, slot)| self.policy.is_expired(slot.touched, now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            entries.pop(key);
        }
        expired.len()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock_entries().contains(key)
    }

    pub fn len(&self) -> usize {
        self.lock_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of keys with a lease held or awaited.
    pub fn active_leases(&self) -> usize {
        self.gates.len()
    }
}

/// Exclusive access to one conversation; released on drop.
pub struct ConversationLease {
    key: String,
    gates: Arc<Gates>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl ConversationLease {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for ConversationLease {
    fn drop(&mut self) {
        self.guard.take();
        // Only the table's own reference left: no holder and no waiter.
        self.gates
            .remove_if(self.key.as_str(), |_, gate| Arc::strong_count(gate) == 1);
    }
}
