//! API Key Pool Management
//!
//! Per-provider key pool with rotation, cooldown and failover.
//!
//! A key is in one of three states: available, cooling down after a 429, or
//! disabled after a 401/403. Cooling keys are skipped while a fresher key
//! exists but are never removed from the pool; disabled keys never return.

use crate::config::KeyPoolConfig;
use crate::error::{DispatchError, Result};
use parking_lot::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// A single API key with usage tracking
struct KeySlot {
    /// The actual API key value
    value: String,

    /// False once the key failed authentication
    enabled: bool,

    /// Time until which this key is rate limited (if any)
    cooling_until: Option<Instant>,

    /// Total number of requests handed this key
    request_count: u64,
}

impl KeySlot {
    fn new(value: String) -> Self {
        Self {
            value,
            enabled: true,
            cooling_until: None,
            request_count: 0,
        }
    }

    fn is_cooling(&self, now: Instant) -> bool {
        matches!(self.cooling_until, Some(until) if now < until)
    }

    fn is_ready(&self, now: Instant) -> bool {
        self.enabled && !self.is_cooling(now)
    }
}

struct PoolState {
    slots: Vec<KeySlot>,
    current: usize,
}

/// Pool of API keys for one provider.
///
/// All state sits behind one mutex so selection, rotation and failure
/// marking are atomic with respect to each other.
pub struct ApiKeyManager {
    /// Provider name this pool belongs to
    provider: String,

    state: Mutex<PoolState>,

    policy: KeyPoolConfig,
}

impl ApiKeyManager {
    /// Create a new key pool
    pub fn new(provider: impl Into<String>, keys: Vec<String>, policy: KeyPoolConfig) -> Self {
        Self {
            provider: provider.into(),
            state: Mutex::new(PoolState {
                slots: keys.into_iter().map(KeySlot::new).collect(),
                current: 0,
            }),
            policy,
        }
    }

    /// Get the provider name
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Get the number of keys in the pool, disabled ones included
    pub fn len(&self) -> usize {
        self.state.lock().slots.len()
    }

    /// Check if the pool is empty
    pub fn is_empty(&self) -> bool {
        self.state.lock().slots.is_empty()
    }

    /// Keys that have not failed authentication
    pub fn available_count(&self) -> usize {
        self.state.lock().slots.iter().filter(|s| s.enabled).count()
    }

    /// Return the active key, moving past cooling or disabled keys.
    ///
    /// When every enabled key is cooling, the one whose cooldown ends first is
    /// returned rather than failing. Only a pool without enabled keys is exhausted.
    pub fn current_key(&self) -> Result<String> {
        let mut state = self.state.lock();
        let len = state.slots.len();
        if len == 0 {
            return Err(DispatchError::Config(format!(
                "No API keys configured for '{}'",
                self.provider
            )));
        }

        let now = Instant::now();
        let start = state.current % len;
        let ready = (0..len)
            .map(|offset| (start + offset) % len)
            .find(|idx| state.slots[*idx].is_ready(now));

        let idx = match ready {
            Some(idx) => idx,
            None => state
                .slots
                .iter()
                .enumerate()
                .filter(|(_, slot)| slot.enabled)
                .min_by_key(|(_, slot)| slot.cooling_until)
                .map(|(idx, _)| idx)
                .ok_or_else(|| DispatchError::KeysExhausted(self.provider.clone()))?,
        };

        state.current = idx;
        let slot = &mut state.slots[idx];
        slot.request_count += 1;
        Ok(slot.value.clone())
    }

    /// Advance the pointer after a successful call to spread load across keys
    pub fn rotate_key(&self) {
        let mut state = self.state.lock();
        let len = state.slots.len();
        if len > 1 {
            state.current = (state.current + 1) % len;
        }
    }

    /// Disable a key after an authentication failure
    pub fn mark_hard_failure(&self, key: &str) {
        let mut state = self.state.lock();
        let mut hit = false;
        for slot in state.slots.iter_mut().filter(|s| s.value == key && s.enabled) {
            slot.enabled = false;
            hit = true;
        }
        if hit {
            let remaining = state.slots.iter().filter(|s| s.enabled).count();
            warn!(
                provider = %self.provider,
                key = %mask_key(key),
                remaining,
                "API key disabled after authentication failure"
            );
            Self::advance_past(&mut state, key);
        }
    }

    /// Put a key into cooldown after a rate-limit response.
    ///
    /// `retry_after` from the provider wins when the policy honors it; a zero
    /// cooldown only moves the pointer.
    pub fn mark_rate_limited(&self, key: &str, retry_after: Option<Duration>) {
        let cooldown = match retry_after {
            Some(d) if self.policy.honor_retry_after => d,
            _ => self.policy.cooldown(),
        };

        let mut state = self.state.lock();
        if !cooldown.is_zero() {
            let until = Instant::now() + cooldown;
            for slot in state.slots.iter_mut().filter(|s| s.value == key) {
                slot.cooling_until = Some(until);
            }
        }
        debug!(
            provider = %self.provider,
            key = %mask_key(key),
            cooldown_ms = cooldown.as_millis() as u64,
            "API key rate limited"
        );
        Self::advance_past(&mut state, key);
    }

    /// Clear every cooldown, keeping disabled keys disabled
    pub fn clear_cooldowns(&self) {
        for slot in self.state.lock().slots.iter_mut() {
            slot.cooling_until = None;
        }
    }

    // Move the pointer only if it still points at the failed key, so a
    // rotation made by another caller in between is not undone.
    fn advance_past(state: &mut PoolState, key: &str) {
        let len = state.slots.len();
        if len > 0 && state.slots[state.current % len].value == key {
            state.current = (state.current + 1) % len;
        }
    }

    /// Get statistics about the pool
    pub fn stats(&self) -> KeyPoolStats {
        let state = self.state.lock();
        let now = Instant::now();
        let total = state.slots.len();
        let disabled = state.slots.iter().filter(|s| !s.enabled).count();
        let cooling = state
            .slots
            .iter()
            .filter(|s| s.enabled && s.is_cooling(now))
            .count();

        KeyPoolStats {
            total_keys: total,
            available_keys: total - disabled - cooling,
            cooling_keys: cooling,
            disabled_keys: disabled,
            total_requests: state.slots.iter().map(|s| s.request_count).sum(),
        }
    }
}

impl std::fmt::Debug for ApiKeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKeyManager")
            .field("provider", &self.provider)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Statistics about a key pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPoolStats {
    pub total_keys: usize,
    pub available_keys: usize,
    pub cooling_keys: usize,
    pub disabled_keys: usize,
    pub total_requests: u64,
}

/// Log-safe rendering of a secret
pub(crate) fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        return "****".to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("****{}", tail)
}
