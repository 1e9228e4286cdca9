//! Per-client, per-stage fixed-window request caps held in process memory.
//!
//! One [`RateLimiter`] is built at startup and shared (via `Arc`) by every
//! request. Records are created lazily on the first request of a window and
//! reset once the window has passed. [`RateLimiter::spawn_sweeper`] drops
//! stale records periodically to bound memory; correctness never depends on
//! the sweep having run.
//!
//! Client identity comes from proxy headers (see [`client_id`]), which a
//! client can forge unless a trusted reverse proxy overwrites them.

use crate::config::{PipelineConfig, RateLimitRule};
use crate::error::RateStage;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Identity used when no proxy header is present.
pub const LOOPBACK_CLIENT: &str = "127.0.0.1";

/// Default period of the background sweep.
pub const DEFAULT_SWEEP_PERIOD: Duration = Duration::from_secs(5 * 60);

// ── Clock ────────────────────────────────────────────────────────────────

/// Source of "now" for the limiter.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to. For tests and simulations.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: Mutex<Duration>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(|p| p.into_inner());
        *offset += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let offset = *self.offset.lock().unwrap_or_else(|p| p.into_inner());
        self.origin + offset
    }
}

// ── Limiter ──────────────────────────────────────────────────────────────

/// Counter for one (client, stage) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitRecord {
    pub count: u32,
    pub window_reset_at: Instant,
}

/// Result of [`RateLimiter::check_and_consume`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateDecision {
    /// The request was counted.
    Allowed,
    /// The cap is reached; nothing was counted.
    Exceeded {
        retry_after_secs: u64,
        message: String,
    },
}

impl RateDecision {
    pub fn is_exceeded(&self) -> bool {
        matches!(self, RateDecision::Exceeded { .. })
    }

    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            RateDecision::Allowed => None,
            RateDecision::Exceeded {
                retry_after_secs, ..
            } => Some(*retry_after_secs),
        }
    }
}

type Table = HashMap<String, HashMap<RateStage, RateLimitRecord>>;

/// Fixed-window limiter keyed by client id and [`RateStage`].
pub struct RateLimiter {
    normalize: RateLimitRule,
    clean: RateLimitRule,
    clock: Arc<dyn Clock>,
    table: Mutex<Table>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("normalize", &self.normalize)
            .field("clean", &self.clean)
            .field("clients", &self.client_count())
            .finish()
    }
}

impl RateLimiter {
    pub fn new(normalize: RateLimitRule, clean: RateLimitRule, clock: Arc<dyn Clock>) -> Self {
        Self {
            normalize,
            clean,
            clock,
            table: Mutex::new(HashMap::new()),
        }
    }

    /// Limiter using the caps from `config` and the wall clock.
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(
            config.normalize_limit,
            config.clean_limit,
            Arc::new(SystemClock),
        )
    }

    pub fn rule(&self, stage: RateStage) -> RateLimitRule {
        match stage {
            RateStage::Normalize => self.normalize,
            RateStage::Clean => self.clean,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Table> {
        // A panic while holding the lock cannot leave a record half-written.
        self.table.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Count one request for `(client_id, stage)` unless the cap is reached.
    pub fn check_and_consume(&self, client_id: &str, stage: RateStage) -> RateDecision {
        let rule = self.rule(stage);
        let now = self.clock.now();
        let mut table = self.lock();

        let record = table
            .entry(client_id.to_string())
            .or_default()
            .entry(stage)
            .or_insert(RateLimitRecord {
                count: 0,
                window_reset_at: now + rule.window,
            });

        if now > record.window_reset_at {
            *record = RateLimitRecord {
                count: 0,
                window_reset_at: now + rule.window,
            };
        }

        if record.count >= rule.max_requests {
            let remaining = record.window_reset_at.saturating_duration_since(now);
            let retry_after_secs = remaining.as_millis().div_ceil(1000) as u64;
            warn!(
                client = client_id,
                stage = stage.label(),
                retry_after_secs,
                "Rate limit exceeded"
            );
            return RateDecision::Exceeded {
                retry_after_secs,
                message: format!(
                    "Too many requests: the {} step allows at most {} requests per {}s. \
                     Please retry in {} seconds.",
                    stage.label(),
                    rule.max_requests,
                    rule.window.as_secs(),
                    retry_after_secs
                ),
            };
        }

        record.count += 1;
        RateDecision::Allowed
    }

    /// Snapshot of the record for `(client_id, stage)`, if any.
    pub fn record(&self, client_id: &str, stage: RateStage) -> Option<RateLimitRecord> {
        self.lock()
            .get(client_id)
            .and_then(|stages| stages.get(&stage))
            .copied()
    }

    pub fn client_count(&self) -> usize {
        self.lock().len()
    }

    /// Drop expired records, then clients left with no records.
    /// Returns the number of records removed.
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let mut table = self.lock();
        let mut removed = 0;
        for stages in table.values_mut() {
            let before = stages.len();
            stages.retain(|_, r| now <= r.window_reset_at);
            removed += before - stages.len();
        }
        table.retain(|_, stages| !stages.is_empty());
        removed
    }

    /// Run [`Self::sweep_expired`] every `period` until the handle is aborted
    /// or the runtime shuts down.
    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = limiter.sweep_expired();
                if removed > 0 {
                    debug!(removed, "Swept expired rate-limit records");
                }
            }
        })
    }
}

/// Derive a client id from proxy headers.
///
/// First entry of `X-Forwarded-For`, else `X-Real-IP`, else [`LOOPBACK_CLIENT`].
pub fn client_id(forwarded_for: Option<&str>, real_ip: Option<&str>) -> String {
    if let Some(first) = forwarded_for
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return first.to_string();
    }
    if let Some(ip) = real_ip.map(str::trim).filter(|v| !v.is_empty()) {
        return ip.to_string();
    }
    LOOPBACK_CLIENT.to_string()
}
