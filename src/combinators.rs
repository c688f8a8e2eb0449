//! Join and race over several deferreds.
//!
//! Each combinator chains a handler onto every input. Inputs are shared
//! instances, so those handlers run after anything the caller registered
//! earlier and they mark the input's rejection as handled.

use crate::{scheduler::SharedScheduler, Deferred, Next};
use std::{
    fmt,
    sync::{Arc, Mutex, PoisonError},
};

struct Slots<T> {
    values: Vec<Option<T>>,
    remaining: usize,
}

impl<T, E> Deferred<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + fmt::Display + Send + 'static,
{
    /// Fulfills with every input value in input order, or rejects with the
    /// first input rejection.
    pub fn all(scheduler: &SharedScheduler, futures: Vec<Deferred<T, E>>) -> Deferred<Vec<T>, E> {
        Deferred::new(scheduler, move |resolve, reject| {
            if futures.is_empty() {
                resolve.resolve(Vec::new());
                return Ok(());
            }
            let slots = Arc::new(Mutex::new(Slots {
                values: vec![None; futures.len()],
                remaining: futures.len(),
            }));
            for (index, future) in futures.into_iter().enumerate() {
                let slots = slots.clone();
                let resolve = resolve.clone();
                let reject = reject.clone();
                future.then_else(
                    move |value| {
                        let mut slots = slots.lock().unwrap_or_else(PoisonError::into_inner);
                        slots.values[index] = Some(value.clone());
                        slots.remaining -= 1;
                        if slots.remaining == 0 {
                            resolve.resolve(slots.values.drain(..).flatten().collect());
                        }
                        Ok(Next::Value(value))
                    },
                    move |reason| {
                        reject.reject(reason);
                        Ok(())
                    },
                );
            }
            Ok(())
        })
    }

    /// Fulfills once every input has fulfilled, with values in the order the
    /// inputs completed. Rejects with the first input rejection instead of
    /// collecting it.
    pub fn all_settled(
        scheduler: &SharedScheduler,
        futures: Vec<Deferred<T, E>>,
    ) -> Deferred<Vec<T>, E> {
        Deferred::new(scheduler, move |resolve, reject| {
            let expected = futures.len();
            if expected == 0 {
                resolve.resolve(Vec::new());
                return Ok(());
            }
            let completed = Arc::new(Mutex::new(Vec::with_capacity(expected)));
            for future in futures {
                let completed = completed.clone();
                let resolve = resolve.clone();
                let reject = reject.clone();
                future.then_else(
                    move |value| {
                        let mut completed = completed.lock().unwrap_or_else(PoisonError::into_inner);
                        completed.push(value.clone());
                        if completed.len() == expected {
                            resolve.resolve(completed.clone());
                        }
                        Ok(Next::Value(value))
                    },
                    move |reason| {
                        reject.reject(reason);
                        Ok(())
                    },
                );
            }
            Ok(())
        })
    }

    /// Settles like whichever input settles first. An empty input never
    /// settles.
    pub fn race(scheduler: &SharedScheduler, futures: Vec<Deferred<T, E>>) -> Deferred<T, E> {
        Deferred::new(scheduler, move |resolve, reject| {
            for future in futures {
                let resolve = resolve.clone();
                let reject = reject.clone();
                future.then_else(
                    move |value| {
                        resolve.resolve(value.clone());
                        Ok(Next::Value(value))
                    },
                    move |reason| {
                        reject.reject(reason);
                        Ok(())
                    },
                );
            }
            Ok(())
        })
    }
}
