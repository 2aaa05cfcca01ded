//! Rate window configuration.

use std::time::Duration;

use crate::error::{Error, Result};

/// How many items may be dispatched (`quota`) per time window (`interval`).
///
/// Both values are fixed for the lifetime of a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    interval: Duration,
    quota: usize,
}

impl Config {
    /// Validates and builds a configuration.
    ///
    /// ```rust
    /// use std::time::Duration;
    /// use throttled_queue::{Config, Error};
    ///
    /// let config = Config::new(Duration::from_millis(250), 4).unwrap();
    /// assert_eq!(config.quota(), 4);
    ///
    /// assert!(matches!(Config::new(Duration::ZERO, 4), Err(Error::ZeroInterval)));
    /// assert!(matches!(Config::new(Duration::from_secs(1), 0), Err(Error::ZeroQuota)));
    /// ```
    pub fn new(interval: Duration, quota: usize) -> Result<Self> {
        if interval.is_zero() {
            return Err(Error::ZeroInterval);
        }
        if quota == 0 {
            return Err(Error::ZeroQuota);
        }
        Ok(Self { interval, quota })
    }

    /// `quota` items per second.
    pub fn per_second(quota: usize) -> Result<Self> {
        Self::new(Duration::from_secs(1), quota)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn quota(&self) -> usize {
        self.quota
    }
}
