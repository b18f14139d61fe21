use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Minimum-interval guard for the periodic streaming pass.
#[derive(Debug, Clone)]
pub struct UpdateThrottle {
    interval: Duration,
    last_pass: Option<Instant>,
}

impl UpdateThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_pass: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// True (and the pass is recorded) if at least one interval has elapsed
    /// since the last accepted pass. The first call always passes.
    pub fn try_begin(&mut self, now: Instant) -> bool {
        match self.last_pass {
            Some(last) if now.saturating_duration_since(last) < self.interval => false,
            _ => {
                self.last_pass = Some(now);
                true
            }
        }
    }
}

/// Statistics of one periodic pass.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UpdateStats {
    pub players_checked: usize,
    pub players_moved: usize,
    pub vehicles_checked: usize,
    pub vehicles_moved: usize,
    pub elapsed: Duration,
}

/// Bounded history of the most recent passes, oldest first.
#[derive(Debug, Clone)]
pub struct PassHistory {
    passes: VecDeque<UpdateStats>,
    capacity: usize,
    total_passes: u64,
}

impl PassHistory {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "capacity must be positive");
        Self {
            passes: VecDeque::with_capacity(capacity),
            capacity,
            total_passes: 0,
        }
    }

    pub fn record(&mut self, stats: UpdateStats) {
        if self.passes.len() == self.capacity {
            self.passes.pop_front();
        }
        self.passes.push_back(stats);
        self.total_passes += 1;
    }

    pub fn last(&self) -> Option<&UpdateStats> {
        self.passes.back()
    }

    /// Passes recorded since creation, including evicted ones.
    pub fn total_passes(&self) -> u64 {
        self.total_passes
    }

    pub fn len(&self) -> usize {
        self.passes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    pub fn average_elapsed(&self) -> Duration {
        if self.passes.is_empty() {
            return Duration::ZERO;
        }
        let total: Duration = self.passes.iter().map(|p| p.elapsed).sum();
        total / self.passes.len() as u32
    }

    pub fn max_elapsed(&self) -> Duration {
        self.passes
            .iter()
            .map(|p| p.elapsed)
            .max()
            .unwrap_or(Duration::ZERO)
    }
}
