//! Tick scheduling.
//!
//! A [`Deferred`](crate::Deferred) never runs its continuations inline with
//! `resolve`/`reject`; it hands a [`Tick`] to the [`Scheduler`] it was built
//! with. [`EventLoop`] is the reference environment: a microtask queue, a
//! timer queue and a virtual clock, all driven explicitly by [`EventLoop::run`].

use crate::Error;
use std::{
    collections::{BTreeMap, VecDeque},
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

/// One deferred unit of execution.
pub type Tick = Box<dyn FnOnce() -> Result<(), Error> + Send>;

/// Scheduler handle shared by every deferred created against it.
pub type SharedScheduler = Arc<dyn Scheduler>;

/// Defers a tick until after the current synchronous unit of work.
pub trait Scheduler: Send + Sync {
    fn schedule(&self, tick: Tick);
}

/// Granularity used when a deferred asks for a tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TickMode {
    /// Runs before any pending timer.
    #[default]
    Immediate,
    /// Queued as a zero-delay timer behind timers that are already due.
    Timer,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventLoopConfig {
    pub tick_mode: TickMode,
    /// Fail a `run` call once it has executed this many ticks. The count
    /// starts over on every `run`.
    pub max_ticks: Option<usize>,
}

impl EventLoopConfig {
    pub fn with_tick_mode(mut self, tick_mode: TickMode) -> Self {
        self.tick_mode = tick_mode;
        self
    }

    pub fn with_max_ticks(mut self, max_ticks: usize) -> Self {
        self.max_ticks = Some(max_ticks);
        self
    }
}

struct Queues {
    now_ms: u64,
    next_seq: u64,
    executed: usize,
    microtasks: VecDeque<Tick>,
    // Keyed by (due time, insertion order) so equal deadlines stay FIFO.
    timers: BTreeMap<(u64, u64), Tick>,
}

struct LoopState {
    config: EventLoopConfig,
    queues: Mutex<Queues>,
}

impl LoopState {
    fn lock(&self) -> MutexGuard<'_, Queues> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push_timer(&self, delay_ms: u64, tick: Tick) {
        let mut queues = self.lock();
        let due = queues.now_ms.saturating_add(delay_ms);
        let seq = queues.next_seq;
        queues.next_seq += 1;
        queues.timers.insert((due, seq), tick);
    }
}

impl Scheduler for LoopState {
    fn schedule(&self, tick: Tick) {
        match self.config.tick_mode {
            TickMode::Immediate => self.lock().microtasks.push_back(tick),
            TickMode::Timer => self.push_timer(0, tick),
        }
    }
}

/// Single-threaded cooperative loop with a virtual millisecond clock.
///
/// Cloning yields another handle to the same loop, so executors can capture
/// one and arm timers from inside a deferred.
///
/// # Examples
///
/// ```
/// use deferred::{Deferred, EventLoop, Next};
/// use std::sync::{Arc, Mutex};
///
/// let event_loop = EventLoop::default();
/// let timers = event_loop.clone();
/// let seen = Arc::new(Mutex::new(None));
/// let sink = seen.clone();
///
/// Deferred::<i32, String>::new(&event_loop.scheduler(), move |resolve, _| {
///     timers.set_timeout(50, move || resolve.resolve(7));
///     Ok(())
/// })
/// .then(move |value| {
///     *sink.lock().unwrap() = Some(value);
///     Ok(Next::Value(value))
/// });
///
/// event_loop.run().unwrap();
/// assert_eq!(*seen.lock().unwrap(), Some(7));
/// assert_eq!(event_loop.now_ms(), 50);
/// ```
#[derive(Clone)]
pub struct EventLoop {
    state: Arc<LoopState>,
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new(EventLoopConfig::default())
    }
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let queues = self.state.lock();
        f.debug_struct("EventLoop")
            .field("config", &self.state.config)
            .field("now_ms", &queues.now_ms)
            .field("microtasks", &queues.microtasks.len())
            .field("timers", &queues.timers.len())
            .finish()
    }
}

impl EventLoop {
    pub fn new(config: EventLoopConfig) -> Self {
        Self {
            state: Arc::new(LoopState {
                config,
                queues: Mutex::new(Queues {
                    now_ms: 0,
                    next_seq: 0,
                    executed: 0,
                    microtasks: VecDeque::new(),
                    timers: BTreeMap::new(),
                }),
            }),
        }
    }

    pub fn config(&self) -> &EventLoopConfig {
        &self.state.config
    }

    /// The scheduler to hand to [`Deferred::new`](crate::Deferred::new).
    pub fn scheduler(&self) -> SharedScheduler {
        self.state.clone()
    }

    /// Runs `callback` once the virtual clock reaches `now + delay_ms`.
    pub fn set_timeout<F>(&self, delay_ms: u64, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.state.push_timer(
            delay_ms,
            Box::new(move || {
                callback();
                Ok(())
            }),
        );
    }

    pub fn now_ms(&self) -> u64 {
        self.state.lock().now_ms
    }

    pub fn has_pending_work(&self) -> bool {
        let queues = self.state.lock();
        !queues.microtasks.is_empty() || !queues.timers.is_empty()
    }

    /// Executes the next unit of work: a microtask if any is queued, else the
    /// earliest timer. Returns `Ok(false)` when the loop is idle.
    pub fn run_once(&self) -> Result<bool, Error> {
        let tick = {
            let mut queues = self.state.lock();
            if let Some(limit) = self.state.config.max_ticks {
                let idle = queues.microtasks.is_empty() && queues.timers.is_empty();
                if queues.executed >= limit && !idle {
                    return Err(Error::TickLimitExceeded { limit });
                }
            }
            let tick = match queues.microtasks.pop_front() {
                Some(tick) => Some(tick),
                None => match queues.timers.pop_first() {
                    Some(((due, _), tick)) => {
                        queues.now_ms = queues.now_ms.max(due);
                        Some(tick)
                    }
                    None => None,
                },
            };
            if tick.is_some() {
                queues.executed += 1;
            }
            tick
        };
        match tick {
            Some(tick) => tick().map(|()| true),
            None => Ok(false),
        }
    }

    /// Drives the loop until no work remains.
    ///
    /// Stops at the first failing tick and returns its error; work still
    /// queued at that point stays queued.
    pub fn run(&self) -> Result<(), Error> {
        self.state.lock().executed = 0;
        while self.run_once()? {}
        tracing::trace!(now_ms = self.now_ms(), "event loop idle");
        Ok(())
    }
}
