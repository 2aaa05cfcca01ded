//! Throttled work queue
//!
//! This crate provides a queue that launches submitted work as independent tokio
//! tasks, but never more than `quota` of them within one `interval`.
//!
//! Submitting never blocks and never fails. If the current window still has room,
//! the work is spawned right away. Otherwise it is buffered, and a single release
//! timer is armed for the end of the current window. When the timer fires, up to
//! `quota` buffered items are spawned in submission order and, if anything is
//! left, the timer is rearmed one `interval` later. There is never more than one
//! timer, no matter how deep the buffer gets.
//!
//! The queue does not collect results and does not wait for work to finish before
//! admitting more. Two barriers are available:
//!
//! - [`ThrottledQueue::wait`] resolves once every buffered item has been
//!   *dispatched*. Dispatched work may still be running.
//! - [`ThrottledQueue::wait_finished`] additionally waits for every dispatched
//!   callable to return (or panic).
//!
//! ```rust
//! use std::time::Duration;
//! use throttled_queue::ThrottledQueue;
//!
//! tokio_test::block_on(async {
//!     let queue = ThrottledQueue::new(Duration::from_millis(10), 2).unwrap();
//!     for i in 0..5 {
//!         queue.submit(async move {
//!             println!("calling the api with {i}");
//!         });
//!     }
//!     // Two went out immediately, three are waiting for the next windows.
//!     assert_eq!(queue.len_queue(), 3);
//!
//!     queue.wait().await;
//!     assert_eq!(queue.len_queue(), 0);
//!     assert!(!queue.is_armed());
//! });
//! ```
mod common;
pub mod config;
pub mod error;
pub mod queue;

pub use config::Config;
pub use error::{Error, Result};
pub use queue::ThrottledQueue;
