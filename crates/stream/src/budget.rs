use std::collections::VecDeque;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Pacing of chunk dispatches: one token per `interval_ms`, at most `burst` banked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    /// Milliseconds between token refills. Zero disables pacing.
    pub interval_ms: u64,
    pub burst: u32,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            interval_ms: 30,
            burst: 1,
        }
    }
}

impl BudgetConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Token bucket driven by caller-supplied timestamps.
///
/// Starts full. Time never flows backwards: an earlier `now` than the last
/// refill grants nothing.
#[derive(Debug, Clone)]
pub struct DispatchBudget {
    interval: Duration,
    burst: u32,
    tokens: u32,
    last_refill: Option<Instant>,
}

impl DispatchBudget {
    pub fn new(config: BudgetConfig) -> Self {
        let burst = config.burst.max(1);
        Self {
            interval: config.interval(),
            burst,
            tokens: burst,
            last_refill: None,
        }
    }

    /// True when pacing is disabled and every request is granted.
    pub fn is_unlimited(&self) -> bool {
        self.interval.is_zero()
    }

    /// Take one token if available at `now`.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        if self.is_unlimited() {
            return true;
        }
        self.refill(now);
        if self.tokens == 0 {
            return false;
        }
        self.tokens -= 1;
        true
    }

    /// Refill to `burst` and restart the clock.
    pub fn reset(&mut self) {
        self.tokens = self.burst;
        self.last_refill = None;
    }

    fn refill(&mut self, now: Instant) {
        let Some(last) = self.last_refill else {
            self.last_refill = Some(now);
            return;
        };
        let elapsed = now.saturating_duration_since(last);
        let earned = elapsed.as_nanos() / self.interval.as_nanos();
        if earned == 0 {
            return;
        }
        let tokens = (self.tokens as u128 + earned).min(self.burst as u128) as u32;
        self.tokens = tokens;
        if tokens == self.burst {
            self.last_refill = Some(now);
        } else {
            // Whole intervals only; the remainder carries over.
            self.last_refill = Some(last + self.interval * earned as u32);
        }
    }
}

/// Per-update scan counters for instrumentation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanStats {
    pub chunks_dispatched: usize,
    pub chunks_culled: usize,
    pub sweeps_started: usize,
    pub sweeps_completed: usize,
}

impl ScanStats {
    pub fn accumulate(&mut self, other: &ScanStats) {
        self.chunks_dispatched += other.chunks_dispatched;
        self.chunks_culled += other.chunks_culled;
        self.sweeps_started += other.sweeps_started;
        self.sweeps_completed += other.sweeps_completed;
    }
}

/// Rolling window of recent durations.
#[derive(Debug, Clone)]
pub struct FrameTimer {
    window: VecDeque<Duration>,
    capacity: usize,
}

impl FrameTimer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn record(&mut self, dt: Duration) {
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(dt);
    }

    /// Time `f` and record it.
    pub fn time<T>(&mut self, f: impl FnOnce() -> T) -> T {
        let start = Instant::now();
        let out = f();
        self.record(start.elapsed());
        out
    }

    pub fn count(&self) -> usize {
        self.window.len()
    }

    pub fn average(&self) -> Duration {
        if self.window.is_empty() {
            return Duration::ZERO;
        }
        self.window.iter().sum::<Duration>() / self.window.len() as u32
    }

    pub fn max(&self) -> Duration {
        self.window.iter().copied().max().unwrap_or_default()
    }

    pub fn min(&self) -> Duration {
        self.window.iter().copied().min().unwrap_or_default()
    }
}
