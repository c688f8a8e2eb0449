#[cfg(test)]
mod tests {
    use deferred::{Deferred, Error, EventLoop, EventLoopConfig, Next, SharedScheduler, TickMode};
    use futures::executor::block_on;
    use std::sync::{Arc, Barrier, Mutex};
    use std::thread;

    type Log = Arc<Mutex<Vec<String>>>;

    fn push(log: &Log, entry: impl Into<String>) {
        log.lock().unwrap().push(entry.into());
    }

    /// f1 fulfills with 1 after 150ms, f2 with 2 after 100ms.
    fn test_futures(event_loop: &EventLoop) -> Vec<Deferred<i32, String>> {
        let scheduler = event_loop.scheduler();
        [(150, 1), (100, 2)]
            .into_iter()
            .map(|(delay, value)| {
                let timers = event_loop.clone();
                Deferred::new(&scheduler, move |resolve, _| {
                    timers.set_timeout(delay, move || resolve.resolve(value));
                    Ok(())
                })
            })
            .collect()
    }

    fn chain_scenario(event_loop: &EventLoop) -> Log {
        let scheduler: SharedScheduler = event_loop.scheduler();
        let logs: Log = Arc::new(Mutex::new(Vec::new()));
        let timers = event_loop.clone();
        let (first, handler, inner_log, hey, caught, outer_final) = (
            logs.clone(),
            logs.clone(),
            logs.clone(),
            logs.clone(),
            logs.clone(),
            logs.clone(),
        );

        Deferred::<String, String>::new(&scheduler, move |resolve, _| {
            timers.set_timeout(100, move || resolve.resolve("some data".into()));
            push(&first, "I am first");
            Ok(())
        })
        .then(move |value| {
            push(&handler, value.clone());
            let (hello, inner_final) = (inner_log.clone(), inner_log);
            let inner = Deferred::resolve(&scheduler)
                .then(move |value| {
                    push(&hello, "hello 1");
                    Ok(Next::Value(value))
                })
                .finally(move || {
                    push(&inner_final, "final 1");
                    Ok(())
                });
            Ok(Next::Defer(inner))
        })
        .then(move |_| {
            push(&hey, "hey");
            Err("error".to_string())
        })
        .catch(move |reason| {
            push(&caught, reason);
            Ok(())
        })
        .finally(move || {
            push(&outer_final, "final 2");
            Ok(())
        });
        logs
    }

    const EXPECTED_LOGS: [&str; 7] = [
        "I am first",
        "some data",
        "hello 1",
        "hey",
        "error",
        "final 1",
        "final 2",
    ];

    #[test]
    fn test_chain_log_order() {
        let event_loop = EventLoop::default();
        let logs = chain_scenario(&event_loop);
        assert_eq!(*logs.lock().unwrap(), vec!["I am first"]);

        event_loop.run().unwrap();
        assert_eq!(*logs.lock().unwrap(), EXPECTED_LOGS);
    }

    #[test]
    fn test_chain_log_order_with_timer_ticks() {
        let event_loop = EventLoop::new(EventLoopConfig::default().with_tick_mode(TickMode::Timer));
        let logs = chain_scenario(&event_loop);

        event_loop.run().unwrap();
        assert_eq!(*logs.lock().unwrap(), EXPECTED_LOGS);
    }

    #[test]
    fn test_all() {
        let event_loop = EventLoop::default();
        let values = Deferred::all(&event_loop.scheduler(), test_futures(&event_loop)).waiter();

        event_loop.run().unwrap();
        assert_eq!(block_on(values), Ok(Ok(vec![1, 2])));
        assert_eq!(event_loop.now_ms(), 150);
    }

    #[test]
    fn test_all_settled() {
        let event_loop = EventLoop::default();
        let values = Deferred::all_settled(&event_loop.scheduler(), test_futures(&event_loop)).waiter();

        event_loop.run().unwrap();
        assert_eq!(block_on(values), Ok(Ok(vec![2, 1])));
    }

    #[test]
    fn test_race() {
        let event_loop = EventLoop::default();
        let winner = Deferred::race(&event_loop.scheduler(), test_futures(&event_loop));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        winner.then(move |value| {
            sink.lock().unwrap().push(value);
            Ok(Next::Value(value))
        });

        event_loop.run().unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![2]);
        assert_eq!(winner.value(), Some(2));
    }

    #[test]
    fn test_combinators_with_timer_ticks() {
        let event_loop = EventLoop::new(EventLoopConfig::default().with_tick_mode(TickMode::Timer));
        let scheduler = event_loop.scheduler();
        let all = Deferred::all(&scheduler, test_futures(&event_loop)).waiter();
        let settled = Deferred::all_settled(&scheduler, test_futures(&event_loop)).waiter();
        let race = Deferred::race(&scheduler, test_futures(&event_loop)).waiter();

        event_loop.run().unwrap();
        assert_eq!(block_on(all), Ok(Ok(vec![1, 2])));
        assert_eq!(block_on(settled), Ok(Ok(vec![2, 1])));
        assert_eq!(block_on(race), Ok(Ok(2)));
    }

    #[test]
    fn test_chaining_returns_same_instance() {
        let event_loop = EventLoop::default();
        let deferred = Deferred::<i32, String>::resolved(&event_loop.scheduler(), 1);
        let after_then = deferred.then(|value| Ok(Next::Value(value)));
        let after_catch = after_then.catch(|_| Ok(()));
        let after_finally = after_catch.finally(|| Ok(()));
        let after_both = deferred.then_else(|value| Ok(Next::Value(value)), |_| Ok(()));

        for handle in [&after_then, &after_catch, &after_finally, &after_both] {
            assert!(handle.ptr_eq(&deferred));
        }
        event_loop.run().unwrap();
    }

    #[test]
    fn test_settled_value_is_frozen() {
        let event_loop = EventLoop::default();
        let timers = event_loop.clone();
        let deferred = Deferred::<i32, String>::new(&event_loop.scheduler(), move |resolve, reject| {
            let again = resolve.clone();
            timers.set_timeout(10, move || resolve.resolve(1));
            timers.set_timeout(20, move || again.resolve(2));
            timers.set_timeout(30, move || reject.reject("too late".into()));
            Ok(())
        });

        event_loop.run().unwrap();
        assert_eq!(deferred.value(), Some(1));
    }

    #[test]
    fn test_rejected_reason_is_frozen() {
        let event_loop = EventLoop::default();
        let logs: Log = Arc::new(Mutex::new(Vec::new()));
        let sink = logs.clone();
        let deferred = Deferred::<i32, String>::new(&event_loop.scheduler(), |resolve, reject| {
            reject.reject("first".into());
            reject.reject("second".into());
            resolve.resolve(3);
            Ok(())
        });
        deferred.catch(move |reason| {
            push(&sink, reason);
            Ok(())
        });

        event_loop.run().unwrap();
        assert_eq!(*logs.lock().unwrap(), vec!["first"]);
        assert_eq!(deferred.value(), None);
    }

    #[test]
    fn test_unhandled_rejection_is_fatal() {
        let event_loop = EventLoop::default();
        Deferred::<i32, String>::reject(&event_loop.scheduler(), "nobody listens".into());

        let err = event_loop.run().unwrap_err();
        assert_eq!(err.to_string(), "Unhandled rejection: nobody listens");
    }

    #[test]
    fn test_exhausted_handlers_are_fatal() {
        let event_loop = EventLoop::default();
        Deferred::<i32, String>::resolved(&event_loop.scheduler(), 1)
            .then(|_| Err("a".into()))
            .catch(|reason| Err(format!("{reason}b")));

        assert_eq!(
            event_loop.run(),
            Err(Error::UnhandledRejection { reason: "ab".into() })
        );
    }

    #[test]
    fn test_executor_error_rejects() {
        let event_loop = EventLoop::default();
        let logs: Log = Arc::new(Mutex::new(Vec::new()));
        let sink = logs.clone();
        Deferred::<i32, String>::new(&event_loop.scheduler(), |_, _| Err("executor failed".into()))
            .catch(move |reason| {
                push(&sink, reason);
                Ok(())
            });

        event_loop.run().unwrap();
        assert_eq!(*logs.lock().unwrap(), vec!["executor failed"]);
    }

    #[test]
    fn test_executor_error_after_resolve_is_ignored() {
        let event_loop = EventLoop::default();
        let deferred = Deferred::<i32, String>::new(&event_loop.scheduler(), |resolve, _| {
            resolve.resolve(5);
            Err("ignored".into())
        });

        event_loop.run().unwrap();
        assert_eq!(deferred.value(), Some(5));
    }

    #[test]
    fn test_retry_moves_through_handlers_in_order() {
        let event_loop = EventLoop::default();
        let logs: Log = Arc::new(Mutex::new(Vec::new()));
        let (a, b, c) = (logs.clone(), logs.clone(), logs.clone());
        Deferred::<i32, String>::reject(&event_loop.scheduler(), "e1".into())
            .catch(move |reason| {
                push(&a, format!("h1:{reason}"));
                Err("e2".into())
            })
            .catch(move |reason| {
                push(&b, format!("h2:{reason}"));
                Ok(())
            })
            .catch(move |reason| {
                push(&c, format!("h3:{reason}"));
                Ok(())
            });

        event_loop.run().unwrap();
        assert_eq!(*logs.lock().unwrap(), vec!["h1:e1", "h2:e2"]);
    }

    #[test]
    fn test_finally_failure_propagates() {
        let event_loop = EventLoop::default();
        let logs: Log = Arc::new(Mutex::new(Vec::new()));
        let sink = logs.clone();
        Deferred::<i32, String>::resolved(&event_loop.scheduler(), 1)
            .catch(|_| Ok(()))
            .finally(|| Err("cleanup failed".into()))
            .finally(move || {
                push(&sink, "unreachable");
                Ok(())
            });

        assert_eq!(
            event_loop.run(),
            Err(Error::FinallyFailed {
                reason: "cleanup failed".into()
            })
        );
        assert!(logs.lock().unwrap().is_empty());
    }

    #[test]
    fn test_delegation_preserves_order_after_inner_handlers() {
        let event_loop = EventLoop::default();
        let scheduler = event_loop.scheduler();
        let logs: Log = Arc::new(Mutex::new(Vec::new()));
        let (inner_log, outer_log) = (logs.clone(), logs.clone());
        let timers = event_loop.clone();

        let inner = Deferred::<i32, String>::new(&scheduler, move |resolve, _| {
            timers.set_timeout(50, move || resolve.resolve(10));
            Ok(())
        })
        .then(move |value| {
            push(&inner_log, format!("inner:{value}"));
            Ok(Next::Value(value + 1))
        });
        let nested = inner.clone();
        let outer = Deferred::resolved(&scheduler, 0)
            .then(move |_| Ok(Next::Defer(nested)))
            .then(move |value| {
                push(&outer_log, format!("outer:{value}"));
                Ok(Next::Value(value))
            });

        event_loop.run().unwrap();
        assert_eq!(*logs.lock().unwrap(), vec!["inner:10", "outer:11"]);
        assert_eq!(inner.value(), Some(11));
        assert_eq!(outer.value(), None);
    }

    #[test]
    fn test_inner_rejection_reaches_outer_catch() {
        let event_loop = EventLoop::default();
        let scheduler = event_loop.scheduler();
        let logs: Log = Arc::new(Mutex::new(Vec::new()));
        let sink = logs.clone();
        let inner_scheduler = scheduler.clone();

        let outer = Deferred::<i32, String>::resolved(&scheduler, 0);
        let same_scheduler = Arc::ptr_eq(outer.scheduler(), &inner_scheduler);
        outer
            .then(move |_| {
                Ok(Next::Defer(Deferred::reject(&inner_scheduler, "inner failed".into())))
            })
            .catch(move |reason| {
                push(&sink, reason);
                Ok(())
            });

        event_loop.run().unwrap();
        assert!(same_scheduler);
        assert_eq!(*logs.lock().unwrap(), vec!["inner failed"]);
    }

    #[test]
    fn test_settles_once_across_threads() {
        const THREADS: usize = 8;
        for _ in 0..50 {
            let event_loop = EventLoop::default();
            let logs: Log = Arc::new(Mutex::new(Vec::new()));
            let (fulfilled, rejected) = (logs.clone(), logs.clone());
            let mut handles = None;
            let deferred = Deferred::<usize, String>::new(&event_loop.scheduler(), |resolve, reject| {
                handles = Some((resolve, reject));
                Ok(())
            });
            let (resolve, reject) = handles.unwrap();
            deferred.then_else(
                move |value| {
                    push(&fulfilled, format!("resolved:{value}"));
                    Ok(Next::Value(value))
                },
                move |reason| {
                    push(&rejected, reason);
                    Ok(())
                },
            );

            let barrier = Arc::new(Barrier::new(THREADS));
            let workers: Vec<_> = (0..THREADS)
                .map(|i| {
                    let (resolve, reject, barrier) = (resolve.clone(), reject.clone(), barrier.clone());
                    thread::spawn(move || {
                        barrier.wait();
                        if i % 2 == 0 {
                            resolve.resolve(i);
                        } else {
                            reject.reject(format!("rejected:{i}"));
                        }
                    })
                })
                .collect();
            for worker in workers {
                worker.join().expect("The settling thread has panicked");
            }

            event_loop.run().unwrap();
            assert_eq!(logs.lock().unwrap().len(), 1);
            assert!(!event_loop.has_pending_work());
        }
    }
}
