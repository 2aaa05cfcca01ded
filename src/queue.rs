//! The throttled queue.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::Future;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, trace};

use crate::common::{InFlight, WorkItem};
use crate::config::Config;
use crate::error::{Error, Result};

/// Everything submit and release read and write. Only touched with the lock held.
struct State {
    pending: VecDeque<WorkItem>,
    admitted_in_window: usize,
    window_start: Instant,
    /// Present iff `pending` is non-empty.
    release_timer: Option<JoinHandle<()>>,
}

struct Shared {
    config: Config,
    handle: Handle,
    state: Mutex<State>,
    /// Release rounds that have been scheduled but have not fired yet.
    outstanding_rounds: watch::Sender<usize>,
    /// Dispatched items whose callable has not returned yet.
    in_flight: Arc<watch::Sender<usize>>,
}

/// Work queue that dispatches at most `quota` items per `interval`.
///
/// Cloning is cheap and every clone refers to the same queue. Items are
/// dispatched as detached tokio tasks in submission order; the submitter is
/// never blocked and never learns the outcome.
///
/// Dropping every handle does not cancel buffered work: the release timer keeps
/// the queue alive until its buffer has drained.
#[derive(Clone)]
pub struct ThrottledQueue {
    shared: Arc<Shared>,
}

impl ThrottledQueue {
    /// Creates a queue on the current tokio runtime.
    ///
    /// Fails if `interval` or `quota` is zero, if called outside a runtime, or
    /// if the runtime was built without its time driver.
    ///
    /// ```rust
    /// use std::time::Duration;
    /// use throttled_queue::ThrottledQueue;
    ///
    /// // Outside a runtime there is nothing to spawn onto
    /// assert!(ThrottledQueue::new(Duration::from_secs(1), 5).is_err());
    ///
    /// tokio_test::block_on(async {
    ///     let queue = ThrottledQueue::new(Duration::from_secs(1), 5).unwrap();
    ///     assert_eq!(queue.admitted_in_window(), 0);
    ///     assert!(!queue.is_armed());
    /// });
    /// ```
    pub fn new(interval: Duration, quota: usize) -> Result<Self> {
        Self::with_config(Config::new(interval, quota)?)
    }

    /// Creates a queue from an already validated [`Config`] on the current
    /// tokio runtime.
    pub fn with_config(config: Config) -> Result<Self> {
        let handle = Handle::try_current()?;
        Self::with_handle(config, handle)
    }

    /// Creates a queue that spawns onto `handle`. Usable from threads that are
    /// not running inside the runtime.
    ///
    /// Fails with [`Error::TimerDisabled`] if the runtime has no time driver,
    /// since buffered work could then never be released.
    pub fn with_handle(config: Config, handle: Handle) -> Result<Self> {
        if !has_time_driver(&handle) {
            return Err(Error::TimerDisabled);
        }
        debug!(
            interval = ?config.interval(),
            quota = config.quota(),
            "creating throttled queue"
        );
        let state = State {
            pending: VecDeque::new(),
            admitted_in_window: 0,
            window_start: Instant::now(),
            release_timer: None,
        };
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                handle,
                state: Mutex::new(state),
                outstanding_rounds: watch::channel(0).0,
                in_flight: Arc::new(watch::channel(0).0),
            }),
        })
    }

    /// Submits a future. It is spawned immediately if the current window has
    /// room, otherwise it is buffered until a later window.
    ///
    /// The future is not polled before it is dispatched, so its body counts as
    /// the callable.
    pub fn submit<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Shared::enqueue(&self.shared, WorkItem::Async(Box::pin(fut)));
    }

    /// Submits `callback` to be called with `args` once admitted.
    ///
    /// ```rust
    /// use std::time::Duration;
    /// use throttled_queue::ThrottledQueue;
    ///
    /// async fn fetch(page: u32, per_page: u32) {
    ///     println!("fetching page {page} ({per_page} per page)");
    /// }
    ///
    /// tokio_test::block_on(async {
    ///     let queue = ThrottledQueue::new(Duration::from_millis(5), 1).unwrap();
    ///     for page in 0..3 {
    ///         queue.submit_fn(|(page, per_page): (u32, u32)| fetch(page, per_page), (page, 50));
    ///     }
    ///     queue.wait_finished().await;
    /// });
    /// ```
    pub fn submit_fn<A, C, Fut>(&self, callback: C, args: A)
    where
        A: Send + 'static,
        C: FnOnce(A) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.submit(async move { callback(args).await });
    }

    /// Submits a synchronous callable. Once admitted it runs on the runtime's
    /// blocking pool, so it may block for as long as it needs.
    pub fn submit_blocking<C>(&self, callable: C)
    where
        C: FnOnce() + Send + 'static,
    {
        Shared::enqueue(&self.shared, WorkItem::Blocking(Box::new(callable)));
    }

    /// Resolves once every release round scheduled so far has fired, i.e. once
    /// every buffered item has been *dispatched*.
    ///
    /// Dispatched work may still be running when this returns; see
    /// [`wait_finished`](Self::wait_finished) for that. On an idle queue this
    /// returns immediately.
    pub async fn wait(&self) {
        let mut rounds = self.shared.outstanding_rounds.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rounds.wait_for(|n| *n == 0).await;
    }

    /// Blocking flavor of [`wait`](Self::wait) for synchronous callers.
    ///
    /// Must be called from a thread outside the runtime (or from
    /// `spawn_blocking`), never from async code.
    pub fn blocking_wait(&self) {
        futures::executor::block_on(self.wait());
    }

    /// Resolves once every buffered item has been dispatched *and* every
    /// dispatched callable has returned or panicked.
    pub async fn wait_finished(&self) {
        self.wait().await;
        let mut in_flight = self.shared.in_flight.subscribe();
        let _ = in_flight.wait_for(|n| *n == 0).await;
    }

    pub fn config(&self) -> Config {
        self.shared.config
    }

    /// Number of buffered items waiting for a release round.
    pub fn len_queue(&self) -> usize {
        self.shared.lock().pending.len()
    }

    pub fn is_empty_queue(&self) -> bool {
        self.shared.lock().pending.is_empty()
    }

    /// Items dispatched since the last window reset.
    pub fn admitted_in_window(&self) -> usize {
        self.shared.lock().admitted_in_window
    }

    /// Whether a release timer is currently armed.
    pub fn is_armed(&self) -> bool {
        self.shared.lock().release_timer.is_some()
    }

    /// Release rounds that still have to fire. This is what [`wait`](Self::wait)
    /// observes.
    pub fn outstanding_rounds(&self) -> usize {
        *self.shared.outstanding_rounds.borrow()
    }

    /// Dispatched callables that are still running.
    pub fn in_flight(&self) -> usize {
        *self.shared.in_flight.borrow()
    }
}

impl fmt::Debug for ThrottledQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("ThrottledQueue")
            .field("config", &self.shared.config)
            .field("pending", &state.pending.len())
            .field("admitted_in_window", &state.admitted_in_window)
            .field("armed", &state.release_timer.is_some())
            .finish()
    }
}

/// Tokio exposes no query for this; creating a timer panics without the driver.
fn has_time_driver(handle: &Handle) -> bool {
    let _enter = handle.enter();
    std::panic::catch_unwind(|| drop(tokio::time::sleep(Duration::ZERO))).is_ok()
}

impl Shared {
    /// Callables never run with the lock held, so a poisoned lock still guards
    /// consistent state.
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enqueue(this: &Arc<Self>, item: WorkItem) {
        let mut guard = this.lock();
        let state = &mut *guard;
        if state.admitted_in_window < this.config.quota() {
            debug_assert!(state.pending.is_empty());
            state.admitted_in_window += 1;
            trace!(
                admitted = state.admitted_in_window,
                "admitting work immediately"
            );
            this.dispatch(item);
            return;
        }

        state.pending.push_back(item);
        trace!(pending = state.pending.len(), "window full, buffering work");
        if state.release_timer.is_none() {
            // End of the current window, which may already lie in the past.
            let deadline = state.window_start + this.config.interval();
            this.outstanding_rounds.send_modify(|n| *n += 1);
            Self::arm(this, state, deadline);
        }
    }

    /// Spawns the single release timer. Barrier accounting is left to the caller.
    fn arm(this: &Arc<Self>, state: &mut State, deadline: Instant) {
        debug_assert!(state.release_timer.is_none());
        debug!(
            pending = state.pending.len(),
            delay = ?deadline.saturating_duration_since(Instant::now()),
            "arming release timer"
        );
        let shared = Arc::clone(this);
        state.release_timer = Some(this.handle.spawn(async move {
            sleep_until(deadline).await;
            Shared::release(&shared);
        }));
    }

    fn release(this: &Arc<Self>) {
        let mut guard = this.lock();
        let state = &mut *guard;
        let now = Instant::now();
        state.window_start = now;
        state.admitted_in_window = 0;
        // This task is the timer; dropping its handle just detaches it.
        state.release_timer = None;

        let batch = state.pending.len().min(this.config.quota());
        for item in state.pending.drain(..batch) {
            state.admitted_in_window += 1;
            this.dispatch(item);
        }
        debug!(
            released = batch,
            remaining = state.pending.len(),
            "release round fired"
        );

        if state.pending.is_empty() {
            this.outstanding_rounds.send_modify(|n| *n -= 1);
        } else {
            // The next round takes over this round's slot on the barrier, so
            // `wait` never observes zero while work is still buffered.
            Self::arm(this, state, now + this.config.interval());
        }
    }

    /// Once the runtime has shut down, `spawn` drops the item on the spot, with
    /// the lock held. Destructors of submitted work must not resubmit then.
    fn dispatch(&self, item: WorkItem) {
        item.launch(&self.handle, InFlight::enter(&self.in_flight));
    }
}
