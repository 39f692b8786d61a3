//! Futures with cooperative cancellation that propagates through chains.
//!
//! A [`CancellableFuture`] wraps one underlying future. Calling
//! [`abort`](CancellableFuture::abort) first runs the abort hook (for chained
//! futures this aborts the parent), then, if the wrapped future is still
//! pending, settles the future with [`Error::Aborted`]. Aborting never undoes
//! side effects already started; it only detaches the caller from the result.

use crate::{error::Result, Error};
use futures::future::BoxFuture;
use futures::task::AtomicWaker;
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

/// Settlement state of a [`CancellableFuture`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FutureState {
    Pending,
    Resolved,
    Rejected,
}

impl FutureState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => FutureState::Resolved,
            2 => FutureState::Rejected,
            _ => FutureState::Pending,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            FutureState::Pending => 0,
            FutureState::Resolved => 1,
            FutureState::Rejected => 2,
        }
    }
}

type AbortHook = Box<dyn FnOnce() + Send>;

struct Control {
    state: AtomicU8,
    aborted: AtomicBool,
    waker: AtomicWaker,
    hook: Mutex<Option<AbortHook>>,
}

impl Control {
    fn new(hook: Option<AbortHook>) -> Arc<Self> {
        Arc::new(Self {
            state: AtomicU8::new(FutureState::Pending.as_u8()),
            aborted: AtomicBool::new(false),
            waker: AtomicWaker::new(),
            hook: Mutex::new(hook),
        })
    }

    fn state(&self) -> FutureState {
        FutureState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn settle(&self, state: FutureState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }
}

/// Handle that can abort a [`CancellableFuture`] after it has been moved away.
#[derive(Clone)]
pub struct Canceller {
    control: Arc<Control>,
}

impl Canceller {
    /// Abort the future. Idempotent; does nothing once settled.
    pub fn abort(&self) {
        if self.control.state() != FutureState::Pending {
            return;
        }
        if self.control.aborted.swap(true, Ordering::AcqRel) {
            return;
        }

        let hook = self.control.hook.lock().take();
        if let Some(hook) = hook {
            hook();
        }
        self.control.waker.wake();
    }

    /// Current settlement state.
    pub fn state(&self) -> FutureState {
        self.control.state()
    }

    /// Whether `abort` has been requested.
    pub fn is_abort_requested(&self) -> bool {
        self.control.aborted.load(Ordering::Acquire)
    }
}

impl fmt::Debug for Canceller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Canceller")
            .field("state", &self.state())
            .field("abort_requested", &self.is_abort_requested())
            .finish()
    }
}

/// An asynchronous result that can be cancelled.
#[must_use = "futures do nothing unless polled"]
pub struct CancellableFuture<T> {
    inner: BoxFuture<'static, Result<T>>,
    control: Arc<Control>,
}

impl<T: Send + 'static> CancellableFuture<T> {
    /// Wrap a future.
    pub fn new(future: impl Future<Output = Result<T>> + Send + 'static) -> Self {
        Self {
            inner: Box::pin(future),
            control: Control::new(None),
        }
    }

    /// Wrap a future, running `hook` when the result is aborted.
    pub fn with_abort_hook(
        future: impl Future<Output = Result<T>> + Send + 'static,
        hook: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            inner: Box::pin(future),
            control: Control::new(Some(Box::new(hook))),
        }
    }

    /// An already settled future.
    pub fn ready(result: Result<T>) -> Self {
        Self::new(futures::future::ready(result))
    }

    /// An already resolved future.
    pub fn resolved(value: T) -> Self {
        Self::ready(Ok(value))
    }

    /// An already rejected future.
    pub fn rejected(error: Error) -> Self {
        Self::ready(Err(error))
    }

    /// Handle for aborting this future from elsewhere.
    pub fn canceller(&self) -> Canceller {
        Canceller {
            control: Arc::clone(&self.control),
        }
    }

    /// Abort this future.
    pub fn abort(&self) {
        self.canceller().abort();
    }

    /// Current settlement state.
    pub fn state(&self) -> FutureState {
        self.control.state()
    }

    /// Chain a continuation receiving either outcome.
    ///
    /// Aborting the returned future aborts this one.
    pub fn then<U, F, Fut>(self, f: F) -> CancellableFuture<U>
    where
        U: Send + 'static,
        F: FnOnce(Result<T>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<U>> + Send + 'static,
    {
        let parent = self.canceller();
        CancellableFuture::with_abort_hook(
            async move {
                let result = self.await;
                f(result).await
            },
            move || parent.abort(),
        )
    }

    /// Chain an asynchronous continuation on success.
    pub fn and_then<U, F, Fut>(self, f: F) -> CancellableFuture<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> Fut + Send + 'static,
        Fut: Future<Output = Result<U>> + Send + 'static,
    {
        self.then(move |result| async move {
            match result {
                Ok(value) => f(value).await,
                Err(err) => Err(err),
            }
        })
    }

    /// Transform the resolved value.
    pub fn map<U, F>(self, f: F) -> CancellableFuture<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> Result<U> + Send + 'static,
    {
        self.then(move |result| futures::future::ready(result.and_then(f)))
    }

    /// Observe a successful result.
    pub fn done(self, f: impl FnOnce(&T) + Send + 'static) -> Self {
        self.always(move |result| {
            if let Ok(value) = result {
                f(value);
            }
        })
    }

    /// Observe a failure.
    pub fn fail(self, f: impl FnOnce(&Error) + Send + 'static) -> Self {
        self.always(move |result| {
            if let Err(err) = result {
                f(err);
            }
        })
    }

    /// Observe either outcome.
    pub fn always(self, f: impl FnOnce(&Result<T>) + Send + 'static) -> Self {
        self.then(move |result| {
            f(&result);
            futures::future::ready(result)
        })
    }
}

impl<T> Future for CancellableFuture<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        match this.inner.as_mut().poll(cx) {
            Poll::Ready(result) => {
                let state = if result.is_ok() {
                    FutureState::Resolved
                } else {
                    FutureState::Rejected
                };
                this.control.settle(state);
                Poll::Ready(result)
            }
            Poll::Pending => {
                this.control.waker.register(cx.waker());
                if this.control.aborted.load(Ordering::Acquire) {
                    this.control.settle(FutureState::Rejected);
                    return Poll::Ready(Err(Error::Aborted));
                }
                Poll::Pending
            }
        }
    }
}

impl<T> fmt::Debug for CancellableFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellableFuture")
            .field("state", &self.control.state())
            .finish_non_exhaustive()
    }
}
