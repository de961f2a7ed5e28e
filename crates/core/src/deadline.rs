//! Wall-clock budget shared by the pipeline stages

use std::time::{Duration, Instant};

use crate::error::{Error, Result};

/// Start time plus an optional limit.
///
/// Stages call [`Deadline::check`] at their boundaries; nothing is
/// interrupted mid-stage.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    start: Instant,
    limit: Option<Duration>,
}

impl Deadline {
    /// Start the clock now
    pub fn start(limit: Option<Duration>) -> Self {
        Self {
            start: Instant::now(),
            limit,
        }
    }

    /// A deadline that never expires
    pub fn unbounded() -> Self {
        Self::start(None)
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Fail with [`Error::Timeout`] if the limit has been exceeded
    pub fn check(&self, stage: &'static str) -> Result<()> {
        match self.limit {
            Some(limit) if self.elapsed() > limit => Err(Error::Timeout {
                stage,
                elapsed_secs: self.elapsed().as_secs_f64(),
            }),
            _ => Ok(()),
        }
    }
}

impl Default for Deadline {
    fn default() -> Self {
        Self::unbounded()
    }
}
