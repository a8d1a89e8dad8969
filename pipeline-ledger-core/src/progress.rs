//! Progress estimator: a rolling ETA for the items of one run.
//!
//! Purely observational. The estimate uses cumulative-average pacing,
//! `elapsed / completed * (total - completed)`.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct ProgressEstimator {
    total_items: usize,
    completed: AtomicUsize,
    start_time: Instant,
}

impl ProgressEstimator {
    pub fn new(total_items: usize) -> Self {
        Self::with_start(total_items, Instant::now())
    }

    pub fn with_start(total_items: usize, start_time: Instant) -> Self {
        Self {
            total_items,
            completed: AtomicUsize::new(0),
            start_time,
        }
    }

    /// Count one more item as done and return the updated estimate.
    pub fn step(&self) -> Estimate {
        let completed = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
        Estimate::compute(completed, self.total_items, self.start_time.elapsed())
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn total_items(&self) -> usize {
        self.total_items
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Estimate {
    pub completed: usize,
    pub total: usize,
    pub elapsed: Duration,
    pub remaining: Duration,
}

impl Estimate {
    /// Remaining time is zero when nothing is left (including `total == 0` and
    /// `completed > total`) and when nothing has completed yet to pace against.
    pub fn compute(completed: usize, total: usize, elapsed: Duration) -> Self {
        let left = total.saturating_sub(completed);
        let remaining = if completed == 0 || left == 0 {
            Duration::ZERO
        } else {
            let per_item = elapsed.as_secs_f64() / completed as f64;
            Duration::try_from_secs_f64(per_item * left as f64).unwrap_or(Duration::MAX)
        };
        Self {
            completed,
            total,
            elapsed,
            remaining,
        }
    }

    pub fn is_done(&self) -> bool {
        self.completed >= self.total
    }
}

impl fmt::Display for Estimate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} done", self.completed.min(self.total), self.total)?;
        if !self.is_done() {
            write!(f, ", about {} remaining", format_duration(self.remaining))?;
        }
        Ok(())
    }
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let (hours, minutes, seconds) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if hours > 0 {
        format!("{hours}h {minutes:02}m {seconds:02}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds:02}s")
    } else {
        format!("{seconds}s")
    }
}
