//! Deferred values with shared-instance chaining.
//!
//! A [`Deferred`] eventually holds a value or fails with a reason. `then`,
//! `catch` and `finally` append continuations to the one instance and hand
//! back that same instance. When a fulfillment handler returns another
//! deferred, the rest of the chain moves onto it.
//!
//! Nothing runs on its own: continuations are ticks handed to an injected
//! [`Scheduler`], and [`EventLoop`] is the scheduler you drive by hand.
//!
//! ```
//! use deferred::{Deferred, EventLoop};
//!
//! let event_loop = EventLoop::default();
//! let scheduler = event_loop.scheduler();
//! let timers = event_loop.clone();
//! let slow = Deferred::<i32, String>::new(&scheduler, move |resolve, _| {
//!     timers.set_timeout(150, move || resolve.resolve(1));
//!     Ok(())
//! });
//! let fast = Deferred::resolved(&scheduler, 2);
//! let waiter = Deferred::all(&scheduler, vec![slow, fast]).waiter();
//!
//! event_loop.run().unwrap();
//! assert_eq!(futures::executor::block_on(waiter), Ok(Ok(vec![1, 2])));
//! ```
//!
//! An unhandled rejection is fatal and stops the loop:
//!
//! ```
//! use deferred::{Deferred, Error, EventLoop};
//!
//! let event_loop = EventLoop::default();
//! Deferred::<(), String>::reject(&event_loop.scheduler(), "lost".into());
//! assert_eq!(
//!     event_loop.run(),
//!     Err(Error::UnhandledRejection { reason: "lost".into() })
//! );
//! ```

mod combinators;
mod deferred;
mod error;
pub mod scheduler;
mod waiter;

pub use deferred::{Deferred, Next, Rejecter, Resolver, Status};
pub use error::Error;
pub use scheduler::{EventLoop, EventLoopConfig, Scheduler, SharedScheduler, Tick, TickMode};
pub use waiter::Waiter;
