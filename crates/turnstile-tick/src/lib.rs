//! Fixed-rate pacing for Turnstile's drive loop.
//!
//! The admission coordinator does its work in discrete ticks: apply
//! validator verdicts, check the auth deadline, take at most one queued
//! operation. [`TickScheduler`] decides *when* those ticks happen. The
//! rate bounds both how quickly a queued connect is picked up and how
//! precisely the auth timeout is enforced (to within one tick).
//!
//! # Integration
//!
//! The scheduler sits inside the server's `tokio::select!` loop next to
//! the peer event channel:
//!
//! ```ignore
//! loop {
//!     tokio::select! {
//!         Some(event) = events.recv() => { /* handshake bookkeeping */ }
//!         info = scheduler.wait_for_tick() => {
//!             coordinator.tick(info.at, &peers);
//!             scheduler.record_tick_end();
//!         }
//!     }
//! }
//! ```
//!
//! Time comes from `tokio::time`, so tests driven with
//! `#[tokio::test(start_paused = true)]` control it completely.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::time::{self, Instant as TokioInstant};
use tracing::{debug, trace, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// What to do when the loop falls behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TickPolicy {
    /// Forget the missed ticks and schedule the next one from now.
    Skip,
    /// Fire missed ticks back-to-back, up to `max_burst` of them. Beyond
    /// that the scheduler gives up and behaves like `Skip`.
    Burst { max_burst: u32 },
}

impl Default for TickPolicy {
    fn default() -> Self {
        Self::Skip
    }
}

/// Drive loop pacing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TickConfig {
    /// Ticks per second, 1 to [`Self::MAX_TICK_RATE_HZ`].
    pub tick_rate_hz: u32,

    pub policy: TickPolicy,

    /// Fraction of the tick period (0.0–1.0) a tick may use before a
    /// warning is logged. Default: 0.80.
    pub budget_warn_threshold: f64,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: Self::DEFAULT_TICK_RATE_HZ,
            policy: TickPolicy::default(),
            budget_warn_threshold: 0.80,
        }
    }
}

impl TickConfig {
    pub const DEFAULT_TICK_RATE_HZ: u32 = 20;
    pub const MAX_TICK_RATE_HZ: u32 = 128;

    /// A config for `tick_rate_hz` with everything else defaulted.
    pub fn with_rate(tick_rate_hz: u32) -> Self {
        Self {
            tick_rate_hz,
            ..Default::default()
        }
    }

    /// Clamps out-of-range values. Called by [`TickScheduler::new`].
    ///
    /// - `tick_rate_hz` is clamped to `1..=MAX_TICK_RATE_HZ`; the drive
    ///   loop has to tick for timeouts to fire at all.
    /// - `budget_warn_threshold` is clamped to `0.0..=1.0`.
    pub fn validated(mut self) -> Self {
        let clamped = self.tick_rate_hz.clamp(1, Self::MAX_TICK_RATE_HZ);
        if clamped != self.tick_rate_hz {
            warn!(
                rate = self.tick_rate_hz,
                clamped,
                "tick_rate_hz out of range, clamping"
            );
            self.tick_rate_hz = clamped;
        }
        self.budget_warn_threshold = self.budget_warn_threshold.clamp(0.0, 1.0);
        self
    }

    /// Length of one tick.
    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate_hz.max(1) as f64)
    }
}

// ---------------------------------------------------------------------------
// TickInfo / TickStats
// ---------------------------------------------------------------------------

/// One fired tick, as returned by [`TickScheduler::wait_for_tick`].
#[derive(Debug, Clone)]
pub struct TickInfo {
    /// Tick number, starting at 1.
    pub tick: u64,

    /// When the tick fired. Taken from the tokio clock, so it follows
    /// paused time in tests. Pass this as the coordinator's `now`.
    pub at: Instant,

    /// The tick fired more than a tenth of a period late.
    pub overrun: bool,

    /// Ticks dropped to get back on schedule.
    pub ticks_skipped: u64,
}

/// Counters since the scheduler was created.
#[derive(Debug, Clone, Default)]
pub struct TickStats {
    pub total_ticks: u64,
    pub total_overruns: u64,
    pub total_skipped: u64,
    /// Longest time between `wait_for_tick` returning and
    /// `record_tick_end`.
    pub max_tick_time: Duration,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Fixed-rate tick source for one drive loop.
pub struct TickScheduler {
    config: TickConfig,
    tick_duration: Duration,
    tick_count: u64,
    next_tick: TokioInstant,
    /// Set by `wait_for_tick`, consumed by `record_tick_end`.
    tick_start: Option<TokioInstant>,
    paused: bool,
    stats: TickStats,
}

impl TickScheduler {
    /// Creates a scheduler whose first tick is one period from now.
    pub fn new(config: TickConfig) -> Self {
        let config = config.validated();
        let tick_duration = config.tick_duration();

        debug!(
            rate_hz = config.tick_rate_hz,
            period_ms = tick_duration.as_secs_f64() * 1000.0,
            policy = ?config.policy,
            "tick scheduler created"
        );

        Self {
            config,
            tick_duration,
            tick_count: 0,
            next_tick: TokioInstant::now() + tick_duration,
            tick_start: None,
            paused: false,
            stats: TickStats::default(),
        }
    }

    pub fn with_rate(tick_rate_hz: u32) -> Self {
        Self::new(TickConfig::with_rate(tick_rate_hz))
    }

    /// Waits for the next tick.
    ///
    /// While paused this never resolves, which lets a surrounding
    /// `select!` keep serving its other branches.
    pub async fn wait_for_tick(&mut self) -> TickInfo {
        if self.paused {
            std::future::pending::<()>().await;
        }

        let scheduled = self.next_tick;
        time::sleep_until(scheduled).await;

        let now = TokioInstant::now();
        self.tick_count += 1;
        self.tick_start = Some(now);

        let period = self.tick_duration;
        let late_by = now.saturating_duration_since(scheduled);
        let overrun = late_by > period / 10;
        let behind = (late_by.as_nanos() / period.as_nanos()) as u64;
        let mut ticks_skipped = 0;

        self.next_tick = match self.config.policy {
            TickPolicy::Burst { max_burst } if overrun && behind <= u64::from(max_burst) => {
                // Stay on the original grid; the missed ticks fire at once.
                scheduled + period
            }
            TickPolicy::Skip | TickPolicy::Burst { .. } => {
                if overrun && behind > 0 {
                    ticks_skipped = behind;
                    warn!(
                        tick = self.tick_count,
                        skipped = behind,
                        late_ms = late_by.as_secs_f64() * 1000.0,
                        "drive loop behind schedule, skipping ticks"
                    );
                }
                now + period
            }
        };

        if overrun {
            self.stats.total_overruns += 1;
        }
        self.stats.total_skipped += ticks_skipped;
        self.stats.total_ticks += 1;

        trace!(tick = self.tick_count, overrun, "tick fired");

        TickInfo {
            tick: self.tick_count,
            at: now.into_std(),
            overrun,
            ticks_skipped,
        }
    }

    /// Marks the work for the current tick as done.
    ///
    /// Logs a warning when the tick used more than
    /// `budget_warn_threshold` of its period. Without this call no
    /// budget is tracked.
    pub fn record_tick_end(&mut self) {
        let Some(start) = self.tick_start.take() else {
            return;
        };
        let elapsed = TokioInstant::now().saturating_duration_since(start);
        if elapsed > self.stats.max_tick_time {
            self.stats.max_tick_time = elapsed;
        }

        let utilization = elapsed.as_secs_f64() / self.tick_duration.as_secs_f64();
        if utilization >= self.config.budget_warn_threshold {
            warn!(
                tick = self.tick_count,
                elapsed_ms = elapsed.as_secs_f64() * 1000.0,
                budget_ms = self.tick_duration.as_secs_f64() * 1000.0,
                utilization_pct = format!("{:.1}", utilization * 100.0),
                "drive tick approaching budget"
            );
        }
    }

    /// Stops ticking until [`resume`](Self::resume). Idempotent.
    pub fn pause(&mut self) {
        if !self.paused {
            self.paused = true;
            debug!(tick = self.tick_count, "tick scheduler paused");
        }
    }

    /// Restarts ticking one period from now, so time spent paused does
    /// not come back as a burst.
    pub fn resume(&mut self) {
        if self.paused {
            self.paused = false;
            self.next_tick = TokioInstant::now() + self.tick_duration;
            debug!(tick = self.tick_count, "tick scheduler resumed");
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn stats(&self) -> &TickStats {
        &self.stats
    }

    pub fn tick_rate_hz(&self) -> u32 {
        self.config.tick_rate_hz
    }

    pub fn tick_duration(&self) -> Duration {
        self.tick_duration
    }
}
