use std::iter;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use tracing::{debug, error, trace};

use crate::promise::Inner;
use crate::{Error, Promise};

const WATCHER_THREAD_NAME: &str = "promise-all-watcher";

/// Results that have arrived so far, addressed by input index.
struct Join<T> {
    slots: Vec<Option<T>>,
    arrived: usize,
}

/// Joins `promises` into one promise of all their values, in input order.
///
/// Each input is awaited on its own watcher thread, which also fires that
/// input's callbacks. The first rejection to be observed rejects the result
/// and every later outcome is discarded. An empty input is fulfilled with an
/// empty `Vec` straight away.
///
/// # Examples
///
/// ```
/// use thread_promise::{all, Error, Promise};
///
/// let sum: i32 = all([Promise::resolve(1), Promise::resolve(2), Promise::resolve(3)])
///     .wait()
///     .unwrap()
///     .iter()
///     .sum();
/// assert_eq!(sum, 6);
///
/// let failed = all([Promise::resolve(1), Promise::reject(Error::msg("💥"))]).wait();
/// assert_eq!(failed.unwrap_err().to_string(), "💥");
/// ```
pub fn all<T, I>(promises: I) -> Promise<Vec<T>>
where
    T: Send + Clone + 'static,
    I: IntoIterator<Item = Promise<T>>,
{
    let promises: Vec<_> = promises.into_iter().collect();
    if promises.is_empty() {
        return Promise::resolve(Vec::new());
    }

    let aggregate = Promise::pending();
    let join = Arc::new(Mutex::new(Join {
        slots: iter::repeat_with(|| None).take(promises.len()).collect(),
        arrived: 0,
    }));
    debug!(inputs = promises.len(), "joining promises");

    for (index, each) in promises.into_iter().enumerate() {
        let join = join.clone();
        let target = aggregate.inner().clone();
        let spawned = thread::Builder::new()
            .name(WATCHER_THREAD_NAME.to_string())
            .spawn(move || watch(index, &each, &join, &target));
        if let Err(err) = spawned {
            error!(index, error = %err, "failed to spawn promise watcher");
            aggregate.inner().settle(Err(Error::Spawn(Arc::new(err))));
            break;
        }
    }
    aggregate
}

fn watch<T: Clone>(index: usize, each: &Promise<T>, join: &Mutex<Join<T>>, target: &Inner<Vec<T>>) {
    match each.wait() {
        Ok(value) => {
            let mut join = join.lock().unwrap_or_else(PoisonError::into_inner);
            // Slots are emptied once the join is rejected.
            if target.is_settled() {
                trace!(index, "discarded a value after the join settled");
                return;
            }
            join.slots[index] = Some(value);
            join.arrived += 1;
            if join.arrived == join.slots.len() {
                let values: Vec<T> = join.slots.drain(..).flatten().collect();
                drop(join);
                target.settle(Ok(values));
            }
        }
        Err(err) => {
            if !target.settle(Err(err)) {
                trace!(index, "discarded a rejection after the join settled");
                return;
            }
            let mut join = join.lock().unwrap_or_else(PoisonError::into_inner);
            join.slots = Vec::new();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::all;
    use crate::{Error, Promise};
    use futures::executor::block_on;
    use std::thread;
    use std::time::Duration;

    fn delayed<T: Send + 'static>(millis: u64, value: T) -> Promise<T> {
        Promise::new(move |resolve, _reject| {
            thread::sleep(Duration::from_millis(millis));
            resolve(value);
        })
    }

    #[test]
    fn test_all_resolved() {
        let values = all(vec![
            Promise::resolve(1),
            Promise::resolve(2),
            Promise::resolve(3),
            Promise::resolve(4),
        ])
        .wait()
        .unwrap();
        assert_eq!(values.iter().sum::<i32>(), 10);
    }

    #[test]
    fn test_all_keeps_input_order() {
        let values = all([delayed(60, "a"), delayed(30, "b"), delayed(0, "c")])
            .wait()
            .unwrap();
        assert_eq!(values, ["a", "b", "c"]);
    }

    #[test]
    fn test_all_empty() {
        let values = all(Vec::<Promise<u8>>::new()).wait().unwrap();
        assert!(values.is_empty());
    }

    #[test]
    fn test_all_first_rejection_wins() {
        let result = all([
            delayed(10, 1),
            Promise::reject(Error::msg("first")),
            Promise::new(|_resolve, reject| {
                thread::sleep(Duration::from_millis(200));
                reject(Error::msg("second"));
            }),
        ])
        .wait();
        assert_eq!(result.unwrap_err().to_string(), "first");
    }

    #[test]
    fn test_all_many_rejections_do_not_hang() {
        let inputs = (0..16).map(|i| Promise::<i32>::reject(Error::msg(format!("failure {i}"))));
        let result = all(inputs).wait_timeout(Duration::from_secs(5));
        assert!(result.unwrap_err().to_string().starts_with("failure "));
    }

    #[test]
    fn test_all_rejection_releases_arrived_values() {
        use std::sync::Arc;
        use std::time::Instant;

        let marker = Arc::new(());
        let kept = Promise::resolve(marker.clone());
        let never = Promise::<Arc<()>>::pending();
        let result = all([
            kept.clone(),
            never.clone(),
            Promise::new(|_resolve, reject| {
                thread::sleep(Duration::from_millis(50));
                reject(Error::msg("failed"));
            }),
        ])
        .wait();
        assert_eq!(result.unwrap_err().to_string(), "failed");

        // `marker` itself plus the copy held by `kept`.
        let deadline = Instant::now() + Duration::from_secs(5);
        while Arc::strong_count(&marker) > 2 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(Arc::strong_count(&marker), 2);
        never.inner().settle(Ok(marker.clone()));
    }

    #[test]
    fn test_all_fires_child_callbacks() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let fired = Arc::new(AtomicUsize::new(0));
        let inputs: Vec<_> = (0..3)
            .map(|i| {
                let fired = fired.clone();
                Promise::resolve(i).then(move |_| {
                    fired.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();
        assert_eq!(Promise::all(inputs).wait().unwrap(), [0, 1, 2]);
        assert_eq!(fired.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_all_await() {
        let values = block_on(all([delayed(5, 2), Promise::resolve(3)])).unwrap();
        assert_eq!(values, [2, 3]);
    }
}
