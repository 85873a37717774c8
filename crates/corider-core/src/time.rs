//! Wall-clock seam
//!
//! Offer expiry and broadcast deadlines compare server timestamps against the
//! local wall clock. Components take an `Arc<dyn Clock>` so tests can move
//! time explicitly.

use chrono::{DateTime, Utc};
use std::fmt;

/// Source of the current UTC time
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current instant
    fn now(&self) -> DateTime<Utc>;
}

/// Clock backed by the operating system
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
