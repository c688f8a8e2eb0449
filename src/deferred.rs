//! A `Deferred` is one shared state machine. Every handle, every chained
//! `then`/`catch`/`finally` and every resolver points at the same instance,
//! so registering a continuation never creates a new deferred.

use crate::{scheduler::SharedScheduler, Error};
use std::{
    collections::VecDeque,
    fmt, mem,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

type OnFulfilled<T, E> = Box<dyn FnOnce(T) -> Result<Next<T, E>, E> + Send>;
type OnRejected<E> = Box<dyn FnOnce(E) -> Result<(), E> + Send>;
type OnFinally<E> = Box<dyn FnOnce() -> Result<(), E> + Send>;

/// What a fulfillment handler hands to the rest of the chain.
#[derive(Debug)]
pub enum Next<T, E> {
    /// Becomes the input of the next fulfillment handler.
    Value(T),
    /// Stops this chain and moves its remaining continuations onto the
    /// returned deferred, which then decides how they run.
    Defer(Deferred<T, E>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Pending,
    Fulfilled,
    Rejected,
}

struct Inner<T, E> {
    status: Status,
    value: Option<T>,
    on_fulfilled: VecDeque<OnFulfilled<T, E>>,
    on_rejected: VecDeque<OnRejected<E>>,
    on_finally: VecDeque<OnFinally<E>>,
    rejection_cursor: usize,
    // Set once this deferred's tick has finished; queues are never read again.
    drained: bool,
}

impl<T, E> Inner<T, E> {
    fn new() -> Self {
        Self {
            status: Status::Pending,
            value: None,
            on_fulfilled: VecDeque::new(),
            on_rejected: VecDeque::new(),
            on_finally: VecDeque::new(),
            rejection_cursor: 0,
            drained: false,
        }
    }
}

/// A value that is fulfilled or rejected later, by whoever holds its
/// [`Resolver`] or [`Rejecter`].
///
/// Continuations run on a tick handed to the scheduler, never inline with the
/// call that settles the deferred.
///
/// # Examples
///
/// ```
/// use deferred::{Deferred, EventLoop, Next};
/// use std::sync::{Arc, Mutex};
///
/// let event_loop = EventLoop::default();
/// let log = Arc::new(Mutex::new(Vec::new()));
/// let (a, b) = (log.clone(), log.clone());
///
/// let deferred = Deferred::<u32, String>::resolved(&event_loop.scheduler(), 20);
/// let chained = deferred
///     .then(|value| Ok(Next::Value(value + 1)))
///     .then(|value| Err(format!("{value} is too small")))
///     .catch(move |reason| {
///         a.lock().unwrap().push(reason);
///         Ok(())
///     })
///     .finally(move || {
///         b.lock().unwrap().push("done".to_string());
///         Ok(())
///     });
///
/// assert!(chained.ptr_eq(&deferred));
/// event_loop.run().unwrap();
/// assert_eq!(*log.lock().unwrap(), vec!["21 is too small", "done"]);
/// ```
pub struct Deferred<T, E> {
    promise: Arc<Mutex<Inner<T, E>>>,
    scheduler: SharedScheduler,
}

impl<T, E> Clone for Deferred<T, E> {
    fn clone(&self) -> Self {
        Self {
            promise: self.promise.clone(),
            scheduler: self.scheduler.clone(),
        }
    }
}

impl<T, E> fmt::Debug for Deferred<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("Deferred")
            .field("status", &inner.status)
            .field("on_fulfilled", &inner.on_fulfilled.len())
            .field("on_rejected", &inner.on_rejected.len())
            .field("on_finally", &inner.on_finally.len())
            .field("rejection_cursor", &inner.rejection_cursor)
            .field("drained", &inner.drained)
            .finish()
    }
}

impl<T, E> Deferred<T, E> {
    fn lock(&self) -> MutexGuard<'_, Inner<T, E>> {
        self.promise.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self) -> Status {
        self.lock().status
    }

    /// The value left by the last fulfillment handler, once the fulfillment
    /// queue has drained without delegating.
    pub fn value(&self) -> Option<T>
    where
        T: Clone,
    {
        self.lock().value.clone()
    }

    /// Number of rejection handlers that failed against the current error.
    pub fn rejection_cursor(&self) -> usize {
        self.lock().rejection_cursor
    }

    /// True when both handles refer to the same instance.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.promise, &other.promise)
    }

    pub fn scheduler(&self) -> &SharedScheduler {
        &self.scheduler
    }
}

impl<T, E> Deferred<T, E>
where
    T: Send + 'static,
    E: fmt::Display + Send + 'static,
{
    /// Builds a deferred and runs `executor` synchronously.
    ///
    /// An `Err` returned by the executor rejects the deferred, unless the
    /// executor already settled it.
    pub fn new<F>(scheduler: &SharedScheduler, executor: F) -> Self
    where
        F: FnOnce(Resolver<T, E>, Rejecter<T, E>) -> Result<(), E>,
    {
        let deferred = Self {
            promise: Arc::new(Mutex::new(Inner::new())),
            scheduler: scheduler.clone(),
        };
        let resolver = Resolver {
            deferred: deferred.clone(),
        };
        let rejecter = Rejecter {
            deferred: deferred.clone(),
        };
        if let Err(reason) = executor(resolver, rejecter) {
            deferred.settle_rejected(reason);
        }
        deferred
    }

    /// A deferred already fulfilled with `T::default()`.
    pub fn resolve(scheduler: &SharedScheduler) -> Self
    where
        T: Default,
    {
        Self::resolved(scheduler, T::default())
    }

    pub fn resolved(scheduler: &SharedScheduler, value: T) -> Self {
        Self::new(scheduler, move |resolve, _| {
            resolve.resolve(value);
            Ok(())
        })
    }

    pub fn reject(scheduler: &SharedScheduler, reason: E) -> Self {
        Self::new(scheduler, move |_, reject| {
            reject.reject(reason);
            Ok(())
        })
    }

    /// Appends a fulfillment handler and returns this same deferred.
    ///
    /// Handlers must be callable; anything else does not compile:
    ///
    /// ```compile_fail
    /// use deferred::{Deferred, EventLoop};
    ///
    /// let event_loop = EventLoop::default();
    /// let deferred = Deferred::<i32, String>::resolved(&event_loop.scheduler(), 1);
    /// deferred.then(42);
    /// ```
    pub fn then<F>(&self, on_fulfilled: F) -> Self
    where
        F: FnOnce(T) -> Result<Next<T, E>, E> + Send + 'static,
    {
        self.lock().on_fulfilled.push_back(Box::new(on_fulfilled));
        self.clone()
    }

    /// `then` and `catch` in one call.
    pub fn then_else<F, R>(&self, on_fulfilled: F, on_rejected: R) -> Self
    where
        F: FnOnce(T) -> Result<Next<T, E>, E> + Send + 'static,
        R: FnOnce(E) -> Result<(), E> + Send + 'static,
    {
        self.then(on_fulfilled);
        self.catch(on_rejected)
    }

    /// Appends a rejection handler. A handler that returns `Err` passes its
    /// error on to the next registered handler.
    pub fn catch<R>(&self, on_rejected: R) -> Self
    where
        R: FnOnce(E) -> Result<(), E> + Send + 'static,
    {
        self.lock().on_rejected.push_back(Box::new(on_rejected));
        self.clone()
    }

    /// Appends a callback that runs after either pipeline completes.
    ///
    /// ```compile_fail
    /// use deferred::{Deferred, EventLoop};
    ///
    /// let event_loop = EventLoop::default();
    /// let deferred = Deferred::<i32, String>::resolved(&event_loop.scheduler(), 1);
    /// deferred.finally("not a callback");
    /// ```
    pub fn finally<C>(&self, on_finally: C) -> Self
    where
        C: FnOnce() -> Result<(), E> + Send + 'static,
    {
        self.lock().on_finally.push_back(Box::new(on_finally));
        self.clone()
    }

    fn settle_fulfilled(&self, value: T) {
        {
            let mut inner = self.lock();
            if inner.status != Status::Pending {
                return;
            }
            inner.status = Status::Fulfilled;
        }
        tracing::trace!("deferred fulfilled");
        let this = self.clone();
        self.scheduler.schedule(Box::new(move || {
            let result = this.drain_fulfilled(value);
            this.lock().drained = true;
            result
        }));
    }

    fn settle_rejected(&self, reason: E) {
        {
            let mut inner = self.lock();
            if inner.status != Status::Pending {
                return;
            }
            inner.status = Status::Rejected;
        }
        tracing::trace!("deferred rejected");
        let this = self.clone();
        self.scheduler.schedule(Box::new(move || {
            let result = this
                .dispatch_rejection(reason)
                .and_then(|()| this.drain_finally());
            this.lock().drained = true;
            result
        }));
    }

    fn drain_fulfilled(&self, value: T) -> Result<(), Error> {
        let mut current = value;
        loop {
            // The lock is released before the handler runs so it may chain
            // onto this same deferred.
            let handler = self.lock().on_fulfilled.pop_front();
            let Some(handler) = handler else {
                break;
            };
            match handler(current) {
                Ok(Next::Value(next)) => current = next,
                Ok(Next::Defer(target)) => {
                    self.delegate(&target);
                    return Ok(());
                }
                Err(reason) => {
                    self.dispatch_rejection(reason)?;
                    return self.drain_finally();
                }
            }
        }
        self.lock().value = Some(current);
        self.drain_finally()
    }

    /// Moves every continuation not yet run onto `target`.
    fn delegate(&self, target: &Self) {
        let (on_fulfilled, on_rejected, on_finally) = {
            let mut inner = self.lock();
            (
                mem::take(&mut inner.on_fulfilled),
                mem::take(&mut inner.on_rejected),
                mem::take(&mut inner.on_finally),
            )
        };
        let dropped = on_fulfilled.len() + on_rejected.len() + on_finally.len();
        if self.ptr_eq(target) {
            tracing::warn!(
                dropped,
                "fulfillment handler returned its own deferred; continuations can never run"
            );
            return;
        }
        let mut inner = target.lock();
        if inner.drained {
            // Release the lock first: dropping a continuation may run user Drop code.
            drop(inner);
            tracing::warn!(
                dropped,
                "nested deferred has already drained; continuations can never run"
            );
            return;
        }
        tracing::debug!(
            on_fulfilled = on_fulfilled.len(),
            on_rejected = on_rejected.len(),
            on_finally = on_finally.len(),
            "delegating continuations to nested deferred"
        );
        inner.on_fulfilled.extend(on_fulfilled);
        inner.on_rejected.extend(on_rejected);
        inner.on_finally.extend(on_finally);
    }

    fn dispatch_rejection(&self, reason: E) -> Result<(), Error> {
        self.lock().status = Status::Rejected;
        let mut reason = reason;
        loop {
            let handler = self.lock().on_rejected.pop_front();
            let Some(handler) = handler else {
                let reason = reason.to_string();
                tracing::error!(%reason, "unhandled rejection");
                return Err(Error::UnhandledRejection { reason });
            };
            match handler(reason) {
                Ok(()) => return Ok(()),
                Err(next) => {
                    let cursor = {
                        let mut inner = self.lock();
                        inner.rejection_cursor += 1;
                        inner.rejection_cursor
                    };
                    tracing::debug!(cursor, reason = %next, "rejection handler failed");
                    reason = next;
                }
            }
        }
    }

    fn drain_finally(&self) -> Result<(), Error> {
        loop {
            let callback = self.lock().on_finally.pop_front();
            let Some(callback) = callback else {
                return Ok(());
            };
            if let Err(err) = callback() {
                let reason = err.to_string();
                tracing::error!(%reason, "finally callback failed");
                return Err(Error::FinallyFailed { reason });
            }
        }
    }
}

/// Fulfills the deferred it was created with. Calls after the deferred left
/// pending do nothing.
pub struct Resolver<T, E> {
    deferred: Deferred<T, E>,
}

impl<T, E> Clone for Resolver<T, E> {
    fn clone(&self) -> Self {
        Self {
            deferred: self.deferred.clone(),
        }
    }
}

impl<T, E> fmt::Debug for Resolver<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Resolver").field(&self.deferred).finish()
    }
}

impl<T, E> Resolver<T, E>
where
    T: Send + 'static,
    E: fmt::Display + Send + 'static,
{
    pub fn resolve(&self, value: T) {
        self.deferred.settle_fulfilled(value);
    }
}

/// Rejects the deferred it was created with. Calls after the deferred left
/// pending do nothing.
pub struct Rejecter<T, E> {
    deferred: Deferred<T, E>,
}

impl<T, E> Clone for Rejecter<T, E> {
    fn clone(&self) -> Self {
        Self {
            deferred: self.deferred.clone(),
        }
    }
}

impl<T, E> fmt::Debug for Rejecter<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Rejecter").field(&self.deferred).finish()
    }
}

impl<T, E> Rejecter<T, E>
where
    T: Send + 'static,
    E: fmt::Display + Send + 'static,
{
    pub fn reject(&self, reason: E) {
        self.deferred.settle_rejected(reason);
    }
}
