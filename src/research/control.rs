//! Shared control plane for the worker pool.
//!
//! Two pieces of mutable state are shared across workers, both passed
//! explicitly via [`SharedControl`]: a token bucket spacing upstream
//! requests, and a pause flag raised on rate-limit/anti-automation signals.
//! Everything else in the pipeline is worker-local.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{info, warn};

/// Pure exponential backoff policy, kept separate from any call site so the
/// schedule is testable without I/O.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub base_ms: u64,
    pub max_ms: u64,
}

impl BackoffPolicy {
    pub fn new(base_ms: u64, max_ms: u64) -> Self {
        Self { base_ms, max_ms }
    }

    /// Deterministic delay for the given attempt (0-based): base * 2^attempt,
    /// capped.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = self.base_ms.saturating_mul(1u64 << attempt.min(20));
        Duration::from_millis(exp.min(self.max_ms))
    }

    /// Delay plus up to 50% uniform jitter, so retry storms decorrelate.
    pub fn delay_with_jitter(&self, attempt: u32, rng: &mut impl Rng) -> Duration {
        let base = self.delay(attempt);
        let jitter_ms = rng.gen_range(0..=base.as_millis() as u64 / 2);
        base + Duration::from_millis(jitter_ms)
    }
}

/// Token bucket spacing requests to one upstream target. Capacity allows a
/// small initial burst; steady state is one request per `request_delay`.
pub struct TokenBucket {
    state: Mutex<BucketState>,
    capacity: f64,
    refill_per_sec: f64,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(capacity: usize, request_delay: Duration) -> Self {
        let refill_per_sec = if request_delay.as_secs_f64() > 0.0 {
            1.0 / request_delay.as_secs_f64()
        } else {
            f64::INFINITY
        };
        Self {
            state: Mutex::new(BucketState {
                tokens: capacity as f64,
                last_refill: Instant::now(),
            }),
            capacity: capacity as f64,
            refill_per_sec,
        }
    }

    /// Take a token, sleeping until one is available.
    pub async fn acquire(&self) {
        if self.refill_per_sec.is_infinite() {
            return;
        }
        loop {
            let wait = {
                let mut state = self.state.lock();
                let now = Instant::now();
                let elapsed = now.duration_since(state.last_refill).as_secs_f64();
                state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
                state.last_refill = now;
                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return;
                }
                let deficit = 1.0 - state.tokens;
                Duration::from_secs_f64(deficit / self.refill_per_sec)
            };
            tokio::time::sleep(wait).await;
        }
    }

    /// Non-blocking variant used by tests.
    pub fn try_acquire(&self) -> bool {
        if self.refill_per_sec.is_infinite() {
            return true;
        }
        let mut state = self.state.lock();
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        state.last_refill = now;
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Pool-wide pause switch. Raised when an upstream signals rate limiting or
/// an automation challenge; workers finish their current item and idle
/// until it is cleared.
pub struct PauseFlag {
    paused: AtomicBool,
    notify: Notify,
}

impl PauseFlag {
    pub fn new() -> Self {
        Self {
            paused: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    pub fn pause(&self, reason: &str) {
        if !self.paused.swap(true, Ordering::SeqCst) {
            warn!(reason, "pausing all workers");
        }
    }

    pub fn resume(&self) {
        if self.paused.swap(false, Ordering::SeqCst) {
            info!("resuming workers");
            self.notify.notify_waiters();
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Block until the flag is clear. Returns immediately when not paused.
    pub async fn wait_if_paused(&self) {
        while self.is_paused() {
            let notified = self.notify.notified();
            // Re-check after arming the waiter to avoid a lost wakeup.
            if !self.is_paused() {
                return;
            }
            notified.await;
        }
    }
}

impl Default for PauseFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// The control handles every worker receives. Dependency-injected, never
/// global.
pub struct SharedControl {
    pub limiter: TokenBucket,
    pub pause: PauseFlag,
}

impl SharedControl {
    pub fn new(pool_size: usize, request_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            limiter: TokenBucket::new(pool_size.max(1), request_delay),
            pause: PauseFlag::new(),
        })
    }
}
