//! Process-wide spacing of model calls.
//!
//! The provider rate-limits aggressively, so every call to the model first
//! passes through a single [`CooldownGate`]. The gate remembers the start
//! slot handed out last; each caller reserves the next slot, `min_delay`
//! after it or now if that has already passed, and sleeps until then. The
//! lock only guards the reservation and is never held across a sleep, so
//! concurrent callers are spaced in arrival order. Slow responses do not
//! stack up extra delay because the gate tracks starts, not completions.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use marginalia_core::defaults;

/// Minimum-delay gate shared by all model calls.
#[derive(Debug)]
pub struct CooldownGate {
    min_delay: Duration,
    last_start: Mutex<Option<Instant>>,
}

impl Default for CooldownGate {
    fn default() -> Self {
        Self::new(Duration::from_millis(defaults::COOLDOWN_MIN_DELAY_MS))
    }
}

impl CooldownGate {
    pub fn new(min_delay: Duration) -> Self {
        Self {
            min_delay,
            last_start: Mutex::new(None),
        }
    }

    /// A gate that never waits.
    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    /// Read `AI_COOLDOWN_MS`, falling back to the default delay.
    pub fn from_env() -> Self {
        let ms = std::env::var(defaults::ENV_AI_COOLDOWN_MS)
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults::COOLDOWN_MIN_DELAY_MS);
        Self::new(Duration::from_millis(ms))
    }

    pub fn min_delay(&self) -> Duration {
        self.min_delay
    }

    /// Reserve the next start slot and wait for it.
    ///
    /// Returns how long the caller was held back, including time spent
    /// behind callers that reserved earlier slots.
    pub async fn acquire(&self) -> Duration {
        let slot = {
            let mut last_start = self.last_start.lock().await;
            let now = Instant::now();
            let slot = match *last_start {
                Some(previous) => (previous + self.min_delay).max(now),
                None => now,
            };
            *last_start = Some(slot);
            slot
        };

        let waited = slot.saturating_duration_since(Instant::now());
        if !waited.is_zero() {
            debug!(wait_ms = waited.as_millis() as u64, "Cooling down before model call");
            tokio::time::sleep_until(slot).await;
        }
        waited
    }
}
