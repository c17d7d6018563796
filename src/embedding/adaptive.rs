//! Rolling-window adaptive batch sizing (spec §4.4 "Adaptive batching").
//! New module; no teacher precedent since `StaticModel::encode_single` has
//! no batch-size dial to adapt.

use std::collections::VecDeque;
use std::time::Duration;

const DEFAULT_WINDOW: usize = 10;

pub struct AdaptiveBatchSizer {
    window: VecDeque<Duration>,
    window_capacity: usize,
    current_size: usize,
    min_size: usize,
    max_size: usize,
}

impl AdaptiveBatchSizer {
    pub fn new(initial_size: usize, min_size: usize, max_size: usize) -> Self {
        Self {
            window: VecDeque::with_capacity(DEFAULT_WINDOW),
            window_capacity: DEFAULT_WINDOW,
            current_size: initial_size.clamp(min_size, max_size),
            min_size,
            max_size,
        }
    }

    pub fn current_size(&self) -> usize {
        self.current_size
    }

    /// Record a batch's wall-clock time and adjust `current_size`
    /// accordingly: shrink to 80% if the mean of the last 3 observations
    /// exceeds 1.5x the window mean, grow to 120% if it's below 0.7x,
    /// otherwise leave unchanged.
    pub fn record(&mut self, elapsed: Duration) {
        if self.window.len() == self.window_capacity {
            self.window.pop_front();
        }
        self.window.push_back(elapsed);

        if self.window.len() < 3 {
            return;
        }

        let window_mean = mean(self.window.iter().copied());
        let recent_mean = mean(self.window.iter().rev().take(3).copied());

        if window_mean.is_zero() {
            return;
        }

        let ratio = recent_mean.as_secs_f64() / window_mean.as_secs_f64();

        if ratio > 1.5 && self.current_size > self.min_size {
            self.current_size = ((self.current_size as f64 * 0.8) as usize).max(self.min_size);
        } else if ratio < 0.7 && self.current_size < self.max_size {
            self.current_size = ((self.current_size as f64 * 1.2).ceil() as usize).min(self.max_size);
        }
    }
}

fn mean(values: impl Iterator<Item = Duration> + Clone) -> Duration {
    let count = values.clone().count().max(1) as u32;
    let total: Duration = values.sum();
    total / count
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shrinks_when_recent_batches_slow_down() {
        let mut sizer = AdaptiveBatchSizer::new(100, 10, 200);
        for _ in 0..7 {
            sizer.record(Duration::from_millis(100));
        }
        for _ in 0..3 {
            sizer.record(Duration::from_millis(500));
        }
        assert!(sizer.current_size() < 100);
    }

    #[test]
    fn grows_when_recent_batches_speed_up() {
        let mut sizer = AdaptiveBatchSizer::new(100, 10, 200);
        for _ in 0..7 {
            sizer.record(Duration::from_millis(500));
        }
        for _ in 0..3 {
            sizer.record(Duration::from_millis(50));
        }
        assert!(sizer.current_size() > 100);
    }

    #[test]
    fn never_exceeds_configured_max() {
        let mut sizer = AdaptiveBatchSizer::new(190, 10, 200);
        for _ in 0..20 {
            sizer.record(Duration::from_millis(10));
        }
        assert!(sizer.current_size() <= 200);
    }
}
