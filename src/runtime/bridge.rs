//! Async callback bridge
//!
//! Every asynchronous operation is paired with a completion token:
//!
//! ```text
//!   register(op) ──► (CallbackToken, Pending)
//!                        │             │
//!            worker ◄────┘             └──► caller awaits / .then(cb)
//!              │
//!              └── token.settle(result) ──► exactly one delivery
//! ```
//!
//! A token delivers at most once. A second `settle` is rejected with
//! [`NodeError::AlreadySettled`] and logged. A token dropped without
//! settling (worker panic, pool shut down) settles itself with
//! [`NodeError::Abandoned`], so a pending operation never waits forever.
//! The token's slot in the callback handle table is released as part of the
//! single delivery.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::Instant;

use lazy_static::lazy_static;
use parking_lot::Mutex;
use tracing::{error, trace, warn};

use super::context::CallerContext;
use super::handle::{HandleId, HandleTable, NativeHandle};
use crate::error::{NodeError, NodeResult};

lazy_static! {
    static ref CALLBACKS: HandleTable<CallbackRecord> = HandleTable::new("CallbackToken");
}

/// Bookkeeping stored in the callback table while an operation is in flight
pub struct CallbackRecord {
    operation: &'static str,
    registered_at: Instant,
}

/// Number of registered callbacks that have not settled yet
pub fn in_flight() -> usize {
    CALLBACKS.len()
}

type Listener<T> = Box<dyn FnOnce(NodeResult<T>) + Send + 'static>;

enum State<T> {
    Waiting {
        waker: Option<Waker>,
        listener: Option<Listener<T>>,
    },
    Ready(NodeResult<T>),
    Taken,
}

struct Completion<T> {
    state: Mutex<State<T>>,
}

impl<T> Completion<T> {
    fn new() -> Self {
        Self {
            state: Mutex::new(State::Waiting {
                waker: None,
                listener: None,
            }),
        }
    }

    fn complete(&self, result: NodeResult<T>) {
        let mut state = self.state.lock();
        match std::mem::replace(&mut *state, State::Taken) {
            State::Waiting {
                listener: Some(listener),
                ..
            } => {
                drop(state);
                listener(result);
            }
            State::Waiting {
                waker,
                listener: None,
            } => {
                *state = State::Ready(result);
                drop(state);
                if let Some(waker) = waker {
                    waker.wake();
                }
            }
            other => *state = other,
        }
    }
}

// =============================================================================
// Completion Token
// =============================================================================

/// Worker-side half of a registered operation
pub struct CallbackToken<T: Send + 'static> {
    handle: NativeHandle<CallbackRecord>,
    completion: Arc<Completion<T>>,
    operation: &'static str,
    fired: AtomicBool,
}

/// Register a completion token for `operation`.
///
/// The returned [`Pending`] resolves when the token settles. While the token
/// is unsettled it holds a keep-alive reference on the runtime.
pub fn register<T: Send + 'static>(operation: &'static str) -> (CallbackToken<T>, Pending<T>) {
    let handle = CALLBACKS.insert(CallbackRecord {
        operation,
        registered_at: Instant::now(),
    });
    let id = handle.id();
    let completion = Arc::new(Completion::new());
    super::acquire_ref();
    trace!(token = %id, operation, "callback registered");

    let token = CallbackToken {
        handle,
        completion: Arc::clone(&completion),
        operation,
        fired: AtomicBool::new(false),
    };
    (token, Pending { id, completion })
}

impl<T: Send + 'static> CallbackToken<T> {
    pub fn id(&self) -> HandleId {
        self.handle.id()
    }

    pub fn operation(&self) -> &'static str {
        self.operation
    }

    pub fn is_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    pub fn on_success(&self, value: T) -> NodeResult<()> {
        self.settle(Ok(value))
    }

    pub fn on_error(&self, error: NodeError) -> NodeResult<()> {
        self.settle(Err(error))
    }

    /// Deliver the outcome. Only the first call delivers.
    pub fn settle(&self, result: NodeResult<T>) -> NodeResult<()> {
        if self.fired.swap(true, Ordering::AcqRel) {
            error!(
                token = %self.id(),
                operation = self.operation,
                "completion delivered twice; dropping second result"
            );
            return Err(NodeError::AlreadySettled(self.id().to_raw()));
        }

        let _settled = Settled(&self.handle);
        self.completion.complete(result);
        Ok(())
    }
}

/// Frees the token's slot and keep-alive reference once delivery is over,
/// including when the listener panics.
struct Settled<'a>(&'a NativeHandle<CallbackRecord>);

impl Drop for Settled<'_> {
    fn drop(&mut self) {
        if let Some(record) = self.0.release() {
            trace!(
                token = %self.0.id(),
                operation = record.operation,
                elapsed_us = record.registered_at.elapsed().as_micros() as u64,
                "callback settled"
            );
        }
        super::release_ref();
    }
}

impl<T: Send + 'static> Drop for CallbackToken<T> {
    fn drop(&mut self) {
        if !self.is_fired() {
            warn!(
                token = %self.id(),
                operation = self.operation,
                "callback token dropped before settling"
            );
            let _ = self.settle(Err(NodeError::Abandoned(self.operation)));
        }
    }
}

impl<T: Send + 'static> std::fmt::Debug for CallbackToken<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackToken")
            .field("id", &self.id())
            .field("operation", &self.operation)
            .field("fired", &self.is_fired())
            .finish()
    }
}

// =============================================================================
// Caller Side
// =============================================================================

/// Caller-side half of a registered operation
///
/// Either await it as a [`Future`] or attach a callback with
/// [`Pending::then`] / [`Pending::then_on`].
pub struct Pending<T> {
    id: HandleId,
    completion: Arc<Completion<T>>,
}

impl<T: Send + 'static> Pending<T> {
    pub fn id(&self) -> HandleId {
        self.id
    }

    /// True once the result is available (or already consumed)
    pub fn is_settled(&self) -> bool {
        !matches!(*self.completion.state.lock(), State::Waiting { .. })
    }

    /// Invoke `callback` with the result. Runs inline if already settled,
    /// otherwise on the worker that settles the token.
    pub fn then<F>(self, callback: F)
    where
        F: FnOnce(NodeResult<T>) + Send + 'static,
    {
        let mut state = self.completion.state.lock();
        match std::mem::replace(&mut *state, State::Taken) {
            State::Ready(result) => {
                drop(state);
                callback(result);
            }
            State::Waiting { .. } => {
                *state = State::Waiting {
                    waker: None,
                    listener: Some(Box::new(callback)),
                };
            }
            State::Taken => {
                drop(state);
                callback(Err(NodeError::AlreadySettled(self.id.to_raw())));
            }
        }
    }

    /// Invoke `callback` on the thread that drains `context`
    pub fn then_on<F>(self, context: &CallerContext, callback: F)
    where
        F: FnOnce(NodeResult<T>) + Send + 'static,
    {
        let context = context.clone();
        self.then(move |result| context.post(move || callback(result)));
    }

    /// Block the current thread until the operation settles
    pub fn wait(self) -> NodeResult<T> {
        futures::executor::block_on(self)
    }
}

impl<T> Future for Pending<T> {
    type Output = NodeResult<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.completion.state.lock();
        match std::mem::replace(&mut *state, State::Taken) {
            State::Ready(result) => Poll::Ready(result),
            State::Waiting { listener, .. } => {
                *state = State::Waiting {
                    waker: Some(cx.waker().clone()),
                    listener,
                };
                Poll::Pending
            }
            State::Taken => Poll::Ready(Err(NodeError::AlreadySettled(self.id.to_raw()))),
        }
    }
}

impl<T> std::fmt::Debug for Pending<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pending").field("id", &self.id).finish()
    }
}

// =============================================================================
// Dispatch
// =============================================================================

/// Run `operation` on the worker pool and settle `token` with its result
pub fn dispatch<T, F>(token: CallbackToken<T>, operation: F) -> NodeResult<()>
where
    T: Send + 'static,
    F: FnOnce() -> NodeResult<T> + Send + 'static,
{
    let name = token.operation;
    let runtime = super::current()?;
    let accepted = runtime.pool().execute(move || {
        let result = operation();
        let _ = token.settle(result);
    });
    if accepted {
        Ok(())
    } else {
        Err(NodeError::Abandoned(name))
    }
}

/// Register a token for `name`, dispatch `operation`, return the caller half
pub fn spawn<T, F>(name: &'static str, operation: F) -> NodeResult<Pending<T>>
where
    T: Send + 'static,
    F: FnOnce() -> NodeResult<T> + Send + 'static,
{
    let (token, pending) = register(name);
    dispatch(token, operation)?;
    Ok(pending)
}
