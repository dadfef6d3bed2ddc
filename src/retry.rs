//! Bounded fixed-interval polling
//!
//! Every wait in the orchestrator is a fixed number of attempts separated by
//! a fixed sleep. The sleep goes through [`Sleeper`] so tests can run the
//! full timeout paths without wall-clock delay.

use crate::config::RetryPolicy;
use log::debug;
use std::time::Duration;

/// Source of suspension between polls
pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

/// Production sleeper backed by `std::thread::sleep`
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Call `attempt` up to `policy.attempts` times, sleeping `policy.interval()`
/// between calls (never after the last one). Returns the first `Some`.
///
/// `attempt` receives the 1-based attempt number.
pub fn poll<T, F>(sleeper: &dyn Sleeper, policy: RetryPolicy, what: &str, mut attempt: F) -> Option<T>
where
    F: FnMut(u32) -> Option<T>,
{
    for n in 1..=policy.attempts {
        if let Some(value) = attempt(n) {
            return Some(value);
        }
        debug!("{what}: attempt {n}/{} not satisfied", policy.attempts);
        if n < policy.attempts {
            sleeper.sleep(policy.interval());
        }
    }
    None
}
