//! Shared rate-limit tracking
//!
//! GitHub reports the remaining quota and the reset time on every response.
//! All fetch tasks share one [`RateLimiter`]; the check-then-wait and the
//! update both run under its single lock, so two tasks can never both decide
//! to proceed past the safety floor.

use chrono::{DateTime, TimeZone, Utc};
use reqwest::header::HeaderMap;
use std::time::Duration;
use tokio::sync::Mutex;

/// Remaining quota below which requests wait for the reset
pub const DEFAULT_SAFETY_FLOOR: u32 = 50;

/// Quota assumed before the first response arrives
const INITIAL_QUOTA: u32 = 5000;

const REMAINING_HEADER: &str = "x-ratelimit-remaining";
const RESET_HEADER: &str = "x-ratelimit-reset";

/// Point-in-time view of the tracked quota
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitSnapshot {
    pub remaining: u32,
    pub reset_at: Option<DateTime<Utc>>,
}

impl Default for RateLimitSnapshot {
    fn default() -> Self {
        Self {
            remaining: INITIAL_QUOTA,
            reset_at: None,
        }
    }
}

/// Quota tracker shared by every fetch task
#[derive(Debug)]
pub struct RateLimiter {
    state: Mutex<RateLimitSnapshot>,
    safety_floor: u32,
    reset_grace: Duration,
    fallback_wait: Duration,
}

impl RateLimiter {
    /// Creates a limiter with the default quota assumption
    ///
    /// # Arguments
    ///
    /// * `safety_floor` - Remaining quota below which requests wait
    /// * `reset_grace` - Extra wait added after the reported reset time
    /// * `fallback_wait` - Wait used on a rejection when no reset time is known
    pub fn new(safety_floor: u32, reset_grace: Duration, fallback_wait: Duration) -> Self {
        Self::with_snapshot(
            RateLimitSnapshot::default(),
            safety_floor,
            reset_grace,
            fallback_wait,
        )
    }

    /// Creates a limiter starting from a known quota state
    pub fn with_snapshot(
        snapshot: RateLimitSnapshot,
        safety_floor: u32,
        reset_grace: Duration,
        fallback_wait: Duration,
    ) -> Self {
        Self {
            state: Mutex::new(snapshot),
            safety_floor,
            reset_grace,
            fallback_wait,
        }
    }

    /// Builds a limiter from the API section of the configuration
    pub fn from_config(config: &crate::config::ApiConfig) -> Self {
        Self::new(
            config.safety_floor,
            Duration::from_secs(config.reset_grace_secs),
            Duration::from_secs(config.rate_limit_fallback_secs),
        )
    }

    pub async fn snapshot(&self) -> RateLimitSnapshot {
        *self.state.lock().await
    }

    pub fn safety_floor(&self) -> u32 {
        self.safety_floor
    }

    /// Waits until a request may be dispatched
    ///
    /// Returns immediately while the remaining quota is at or above the floor.
    /// Below it, sleeps until the tracked reset time while holding the lock,
    /// which holds back every other task as well. Either way one request is
    /// reserved against the tracked quota until the next response corrects it.
    pub async fn acquire(&self) {
        let mut state = self.state.lock().await;

        if state.remaining < self.safety_floor {
            if let Some(wait) = time_until_reset(state.reset_at, Utc::now(), self.reset_grace) {
                tracing::warn!(
                    "Rate limit nearly exhausted ({} remaining), waiting {}s for reset",
                    state.remaining,
                    wait.as_secs()
                );
                tokio::time::sleep(wait).await;
            }
        }

        state.remaining = state.remaining.saturating_sub(1);
    }

    /// Waits out a rate-limit rejection
    ///
    /// Uses the tracked reset time when it lies in the future, otherwise the
    /// fallback wait.
    pub async fn wait_for_reset(&self) {
        let state = self.state.lock().await;
        let wait = time_until_reset(state.reset_at, Utc::now(), self.reset_grace)
            .unwrap_or(self.fallback_wait);

        tracing::warn!("Rate limited by API, waiting {}s", wait.as_secs());
        tokio::time::sleep(wait).await;
    }

    /// Records the quota headers of a response
    ///
    /// Missing or unparsable headers leave the tracked values unchanged.
    pub async fn update_from_headers(&self, headers: &HeaderMap) {
        let remaining = header_value::<u32>(headers, REMAINING_HEADER);
        let reset_at = header_value::<i64>(headers, RESET_HEADER)
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single());

        if remaining.is_none() && reset_at.is_none() {
            return;
        }

        let mut state = self.state.lock().await;
        if let Some(remaining) = remaining {
            state.remaining = remaining;
        }
        if let Some(reset_at) = reset_at {
            state.reset_at = Some(reset_at);
        }
        tracing::trace!(
            "Rate limit: {} remaining, resets at {:?}",
            state.remaining,
            state.reset_at
        );
    }
}

fn header_value<T: std::str::FromStr>(headers: &HeaderMap, name: &str) -> Option<T> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Time left until `reset_at` plus grace, or `None` if unknown or already past
fn time_until_reset(
    reset_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    grace: Duration,
) -> Option<Duration> {
    let left = (reset_at? - now).to_std().ok()?;
    if left.is_zero() {
        None
    } else {
        Some(left + grace)
    }
}
