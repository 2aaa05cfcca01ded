use thiserror::Error;
use tokio::runtime::TryCurrentError;

pub type Result<T> = core::result::Result<T, Error>;

/// Errors reported when a queue is configured or constructed incorrectly.
///
/// Work submitted to a queue never produces an error.
#[derive(Error, Debug)]
pub enum Error {
    #[error("interval must be greater than zero")]
    ZeroInterval,
    #[error("quota must be greater than zero")]
    ZeroQuota,
    #[error("no tokio runtime available: {0}")]
    NoRuntime(#[from] TryCurrentError),
    #[error("timers are disabled on this runtime; build it with `enable_time`")]
    TimerDisabled,
}
