use crate::{Deferred, Error, Next};
use std::{
    fmt,
    future::Future,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    task::{Poll, Waker},
};

/// This `Waiter` lets async code `.await` a [`Deferred`]. It yields
/// `Ok(Ok(value))` or `Ok(Err(reason))`, and `Err(Error::Dropped)` when the
/// deferred was dropped while still pending.
///
/// Creating a waiter chains a `then` and a `catch` onto the shared instance,
/// so the deferred's rejection counts as handled.
///
/// # Examples
///
/// ```
/// use deferred::{Deferred, EventLoop};
/// use futures::executor::block_on;
/// use std::thread;
///
/// let event_loop = EventLoop::default();
/// let timers = event_loop.clone();
/// let deferred = Deferred::<String, String>::new(&event_loop.scheduler(), move |resolve, _| {
///     timers.set_timeout(100, move || resolve.resolve("🍓".into()));
///     Ok(())
/// });
/// let waiter = deferred.waiter();
///
/// let driver = thread::spawn(move || event_loop.run());
/// assert_eq!(block_on(waiter), Ok(Ok("🍓".to_string())));
/// driver.join().expect("The driver thread has panicked").unwrap();
/// ```
pub struct Waiter<T, E> {
    promise: Arc<Mutex<Inner<T, E>>>,
}

#[derive(Debug)]
enum WakerState {
    Fresh,
    Tainted,
}

struct Inner<T, E> {
    value: Option<Result<T, E>>,
    waker: Result<Waker, WakerState>,
}

fn lock<T, E>(promise: &Mutex<Inner<T, E>>) -> MutexGuard<'_, Inner<T, E>> {
    promise.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared by the `then` and `catch` registered for one waiter. Whichever runs
/// stores the outcome; if neither ever runs, dropping the last copy taints the
/// waiter.
struct Notifier<T, E> {
    promise: Arc<Mutex<Inner<T, E>>>,
}

impl<T, E> Notifier<T, E> {
    fn settle(&self, outcome: Result<T, E>) {
        let mut promise = lock(&self.promise);
        promise.value = Some(outcome);
        if let Ok(waker) = std::mem::replace(&mut promise.waker, Err(WakerState::Tainted)) {
            waker.wake();
        }
    }
}

impl<T, E> Drop for Notifier<T, E> {
    fn drop(&mut self) {
        let mut promise = lock(&self.promise);
        if promise.value.is_some() {
            return;
        }
        if let Ok(waker) = std::mem::replace(&mut promise.waker, Err(WakerState::Tainted)) {
            waker.wake();
        }
    }
}

impl<T, E> Deferred<T, E>
where
    T: Clone + Send + 'static,
    E: fmt::Display + Send + 'static,
{
    pub fn waiter(&self) -> Waiter<T, E> {
        let promise = Arc::new(Mutex::new(Inner {
            value: None,
            waker: Err(WakerState::Fresh),
        }));
        let notifier = Arc::new(Notifier {
            promise: promise.clone(),
        });
        let on_rejected = notifier.clone();
        self.then_else(
            move |value| {
                notifier.settle(Ok(value.clone()));
                Ok(Next::Value(value))
            },
            move |reason| {
                on_rejected.settle(Err(reason));
                Ok(())
            },
        );
        Waiter { promise }
    }
}

impl<T, E> fmt::Debug for Waiter<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let promise = lock(&self.promise);
        f.debug_struct("Waiter")
            .field("ready", &promise.value.is_some())
            .field("waker", &promise.waker.as_ref().err())
            .finish()
    }
}

impl<T, E> Future for Waiter<T, E> {
    type Output = Result<Result<T, E>, Error>;

    fn poll(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Self::Output> {
        let mut promise = lock(&self.promise);
        match promise.value.take() {
            Some(value) => Poll::Ready(Ok(value)),
            None => {
                match std::mem::replace(&mut promise.waker, Ok(cx.waker().clone())) {
                    Err(WakerState::Tainted) => Poll::Ready(Err(Error::Dropped)),
                    _ => Poll::Pending,
                }
            }
        }
    }
}
