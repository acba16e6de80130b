#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier, Mutex};
    use std::{thread, time::Duration};
    use thread_promise::{all, Error, Promise};

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_test_writer()
            .try_init();
    }

    #[test]
    fn test_new_resolve_and_reject() {
        init_tracing();
        let resolved = Promise::new(|resolve, _reject| resolve(1)).wait();
        assert_eq!(resolved.unwrap(), 1);

        let err = Error::msg("Hello, error!");
        let sent = err.clone();
        let rejected = Promise::<i32>::new(move |_resolve, reject| reject(sent)).wait();
        match (rejected, err) {
            (Err(Error::Rejected(got)), Error::Rejected(want)) => assert!(Arc::ptr_eq(&got, &want)),
            (other, _) => panic!("expected the producer's own error, got {other:?}"),
        }
    }

    #[test]
    fn test_wait_blocks_until_delayed_resolve() {
        init_tracing();
        let promise = Promise::new(|resolve, _reject| {
            thread::sleep(Duration::from_millis(100));
            resolve(42);
        });
        assert!(promise.try_outcome().is_none());
        assert_eq!(promise.wait().unwrap(), 42);
    }

    #[test]
    fn test_then_catch_finally_chain() {
        init_tracing();
        let log = Arc::new(Mutex::new(Vec::new()));
        let (then_log, finally_log) = (log.clone(), log.clone());
        let ok = Promise::resolve("Hello, World")
            .then(move |s| then_log.lock().unwrap().push(format!("then {s}")))
            .finally(move || finally_log.lock().unwrap().push("finally".to_string()))
            .wait();
        assert_eq!(ok.unwrap(), "Hello, World");
        assert_eq!(*log.lock().unwrap(), ["then Hello, World", "finally"]);

        let caught = Arc::new(AtomicUsize::new(0));
        let counter = caught.clone();
        let err = Promise::<()>::reject(Error::msg("Hello, Error!"))
            .catch(move |err| {
                assert_eq!(err.to_string(), "Hello, Error!");
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .wait();
        assert!(err.is_err());
        assert_eq!(caught.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_concurrent_waiters_share_one_sweep() {
        init_tracing();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let promise = Promise::new(|resolve, _reject| {
            thread::sleep(Duration::from_millis(50));
            resolve(String::from("🍓"));
        })
        .then(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let barrier = Arc::new(Barrier::new(8));
        let waiters: Vec<_> = (0..8)
            .map(|_| {
                let promise = promise.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    promise.wait()
                })
            })
            .collect();
        for waiter in waiters {
            let value = waiter.join().expect("The waiter thread has panicked");
            assert_eq!(value.unwrap(), "🍓");
        }
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_all() {
        init_tracing();
        let ok = all([
            Promise::resolve(1),
            Promise::resolve(2),
            Promise::resolve(3),
            Promise::resolve(4),
        ])
        .wait();
        assert_eq!(ok.unwrap().iter().sum::<i32>(), 10);

        let fail = all([
            Promise::resolve(1),
            Promise::resolve(2),
            Promise::reject(Error::msg("Hello, Error!")),
            Promise::resolve(4),
        ])
        .wait();
        assert_eq!(fail.unwrap_err().to_string(), "Hello, Error!");

        assert_eq!(all(Vec::<Promise<i32>>::new()).wait().unwrap(), Vec::<i32>::new());
    }

    #[test]
    fn test_all_with_panicking_producer() {
        init_tracing();
        let result = all([
            Promise::new(|resolve, _reject| resolve(1)),
            Promise::new(|_resolve, _reject| panic!("worker crashed")),
        ])
        .wait_timeout(Duration::from_secs(5));
        assert!(matches!(result, Err(Error::Panicked(message)) if message == "worker crashed"));
    }

    #[test]
    fn test_await_from_executor() {
        init_tracing();
        let promise = Promise::new(|resolve, _reject| {
            thread::sleep(Duration::from_millis(20));
            resolve(7_u64);
        });
        let doubled = futures::executor::block_on(async { promise.await.map(|v| v * 2) });
        assert_eq!(doubled.unwrap(), 14);
    }
}
