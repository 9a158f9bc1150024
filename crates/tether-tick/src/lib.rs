//! Fixed-cadence poll driver for Tether.
//!
//! The engine does nothing on its own: the host calls `poll()` regularly
//! and every callback fires inside that call. [`PollTicker`] decides when
//! "regularly" is, at a fixed rate between 1 and 128 Hz.
//!
//! Two ways to drive it:
//!
//! - **Frame loops** call [`PollTicker::due`] once per frame with the
//!   current time and poll when it returns `Some`.
//! - **Tokio hosts** await [`PollTicker::tick`], typically inside a
//!   `tokio::select!`:
//!
//! ```ignore
//! loop {
//!     tokio::select! {
//!         Some(line) = input.recv() => { /* handle a command */ }
//!         _ = ticker.tick() => {
//!             if let Err(e) = engine.poll() { /* refused */ }
//!         }
//!     }
//! }
//! ```
//!
//! Overruns are skipped, never caught up: if the host stalls for ten
//! intervals it gets one tick, not ten.

use std::time::{Duration, Instant};

use tokio::time::{self, Instant as TokioInstant};
use tracing::{debug, trace, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for the poll ticker.
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Polls per second. Clamped to `1..=128`.
    pub rate_hz: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self { rate_hz: 30 }
    }
}

impl PollConfig {
    pub const MIN_RATE_HZ: u32 = 1;
    pub const MAX_RATE_HZ: u32 = 128;

    pub fn with_rate(rate_hz: u32) -> Self {
        Self { rate_hz }
    }

    /// Clamps `rate_hz` into range. Called by [`PollTicker::new`].
    pub fn validated(mut self) -> Self {
        let clamped = self.rate_hz.clamp(Self::MIN_RATE_HZ, Self::MAX_RATE_HZ);
        if clamped != self.rate_hz {
            warn!(
                rate = self.rate_hz,
                clamped,
                "poll rate out of range, clamping"
            );
            self.rate_hz = clamped;
        }
        self
    }

    /// Time between polls.
    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.rate_hz.max(1)))
    }
}

// ---------------------------------------------------------------------------
// Tick info
// ---------------------------------------------------------------------------

/// Returned each time a poll is due.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollTick {
    /// Monotonically increasing, starts at 1.
    pub tick: u64,
    /// `true` if at least one whole interval was missed.
    pub overrun: bool,
    /// How many intervals were skipped (0 in normal operation).
    pub ticks_skipped: u64,
}

/// Counters since the ticker was created.
#[derive(Debug, Clone, Default)]
pub struct PollMetrics {
    pub total_ticks: u64,
    pub total_overruns: u64,
    pub total_skipped: u64,
}

// ---------------------------------------------------------------------------
// Ticker
// ---------------------------------------------------------------------------

/// Fixed-cadence poll driver.
pub struct PollTicker {
    config: PollConfig,
    interval: Duration,
    tick_count: u64,
    next_due: TokioInstant,
    paused: bool,
    metrics: PollMetrics,
}

impl PollTicker {
    /// Creates a ticker whose first tick is one interval from now.
    pub fn new(config: PollConfig) -> Self {
        Self::starting_at_tokio(config, TokioInstant::now())
    }

    /// Creates a ticker whose first tick is one interval after `start`.
    ///
    /// Frame loops that pass their own clock to [`due`](Self::due) should
    /// start from the same clock.
    pub fn starting_at(config: PollConfig, start: Instant) -> Self {
        Self::starting_at_tokio(config, TokioInstant::from_std(start))
    }

    fn starting_at_tokio(config: PollConfig, start: TokioInstant) -> Self {
        let config = config.validated();
        let interval = config.interval();
        debug!(
            rate_hz = config.rate_hz,
            interval_ms = interval.as_secs_f64() * 1000.0,
            "poll ticker created"
        );
        Self {
            config,
            interval,
            tick_count: 0,
            next_due: start + interval,
            paused: false,
            metrics: PollMetrics::default(),
        }
    }

    pub fn with_rate(rate_hz: u32) -> Self {
        Self::new(PollConfig::with_rate(rate_hz))
    }

    /// Returns a tick if one is due at `now`.
    ///
    /// Never blocks. Returns `None` while paused.
    pub fn due(&mut self, now: Instant) -> Option<PollTick> {
        if self.paused {
            return None;
        }
        let now = TokioInstant::from_std(now);
        if now < self.next_due {
            return None;
        }
        Some(self.fire(now))
    }

    /// Waits until the next tick is due.
    ///
    /// While paused this future never resolves, so a `tokio::select!`
    /// keeps serving its other branches.
    pub async fn tick(&mut self) -> PollTick {
        if self.paused {
            return std::future::pending().await;
        }
        time::sleep_until(self.next_due).await;
        self.fire(TokioInstant::now())
    }

    fn fire(&mut self, now: TokioInstant) -> PollTick {
        let late_by = now.saturating_duration_since(self.next_due);
        let ticks_skipped = (late_by.as_nanos() / self.interval.as_nanos().max(1)) as u64;
        let overrun = ticks_skipped > 0;

        self.tick_count += 1;
        self.next_due = if overrun {
            warn!(
                tick = self.tick_count,
                skipped = ticks_skipped,
                late_ms = late_by.as_secs_f64() * 1000.0,
                "poll overrun, skipping ahead"
            );
            now + self.interval
        } else {
            self.next_due + self.interval
        };

        self.metrics.total_ticks += 1;
        self.metrics.total_skipped += ticks_skipped;
        if overrun {
            self.metrics.total_overruns += 1;
        }
        trace!(tick = self.tick_count, overrun, "poll due");

        PollTick {
            tick: self.tick_count,
            overrun,
            ticks_skipped,
        }
    }

    /// Stops producing ticks until [`resume`](Self::resume). Idempotent.
    pub fn pause(&mut self) {
        if !self.paused {
            self.paused = true;
            debug!(tick = self.tick_count, "poll ticker paused");
        }
    }

    /// Resumes ticking, one interval from now.
    ///
    /// Time spent paused is not counted as an overrun.
    pub fn resume(&mut self) {
        if self.paused {
            self.paused = false;
            self.next_due = TokioInstant::now() + self.interval;
            debug!(tick = self.tick_count, "poll ticker resumed");
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn metrics(&self) -> &PollMetrics {
        &self.metrics
    }

    pub fn rate_hz(&self) -> u32 {
        self.config.rate_hz
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}
