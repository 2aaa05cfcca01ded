//! Module containing the unit of work and the bookkeeping shared by every
//! dispatched task.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use futures::Future;
use pin_project::pin_project;
use tokio::runtime::Handle;
use tokio::sync::watch;

/// A callable captured together with its arguments at submission time.
pub(crate) enum WorkItem {
    /// Runs as a regular tokio task.
    Async(BoxFuture<'static, ()>),
    /// Runs on the runtime's blocking pool.
    Blocking(Box<dyn FnOnce() + Send + 'static>),
}

impl WorkItem {
    /// Launches the item as an independent task and returns immediately.
    ///
    /// The task is detached: nothing awaits it and a panic inside it stays
    /// inside it. `guard` is released when the callable returns or unwinds.
    pub(crate) fn launch(self, handle: &Handle, guard: InFlight) {
        match self {
            WorkItem::Async(fut) => {
                handle.spawn(Tracked { inner: fut, _guard: guard });
            }
            WorkItem::Blocking(f) => {
                handle.spawn_blocking(move || {
                    let _guard = guard;
                    f()
                });
            }
        }
    }
}

/// Counts one dispatched item as running until dropped.
pub(crate) struct InFlight {
    counter: Arc<watch::Sender<usize>>,
}

impl InFlight {
    pub(crate) fn enter(counter: &Arc<watch::Sender<usize>>) -> Self {
        counter.send_modify(|n| *n += 1);
        Self {
            counter: Arc::clone(counter),
        }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.counter.send_modify(|n| *n -= 1);
    }
}

/// Future wrapper that keeps an [`InFlight`] guard alive for as long as the
/// inner future exists.
#[pin_project]
pub(crate) struct Tracked<F> {
    #[pin]
    inner: F,
    _guard: InFlight,
}

impl<F> Future for Tracked<F>
where
    F: Future,
{
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.project().inner.poll(cx)
    }
}
