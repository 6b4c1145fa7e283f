//! Context clocks
//!
//! The processing context's `current_time` comes from a [`Clock`]. Real
//! sessions use [`SystemClock`]; tests inject a [`ManualClock`] and advance
//! it by hand.

use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Monotonic time source in seconds
pub trait Clock: Send + Sync {
    /// Seconds elapsed since the clock's origin
    fn now(&self) -> f64;
}

/// Wall clock anchored at construction
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// Hand-driven clock, cloneable so a test can keep a handle to it
///
/// # Example
/// ```
/// use ktv::audio::{Clock, ManualClock};
///
/// let clock = ManualClock::new();
/// clock.advance(1.5);
/// assert_eq!(clock.now(), 1.5);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<Mutex<f64>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move time forward by `secs`
    pub fn advance(&self, secs: f64) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += secs.max(0.0);
    }

    /// Jump to an absolute time; never moves backwards
    pub fn set(&self, secs: f64) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now = now.max(secs);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}
