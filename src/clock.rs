//! A seam over "now", so that condition timestamp invariants are
//! testable without a wall clock.

use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

/// Supplies the current time for condition timestamps.
pub trait Clock: Send + Sync {
    /// The current time.
    fn now(&self) -> Time;
}

/// The default clock, backed by the system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Time {
        Time(Utc::now())
    }
}

/// A clock that always returns a fixed instant, for deterministic tests of the
/// `lastTransitionTime`/`lastUpdateTime` invariants.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub Time);

impl Clock for FixedClock {
    fn now(&self) -> Time {
        self.0.clone()
    }
}
