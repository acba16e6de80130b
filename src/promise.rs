//! The shared settlement state behind every [`Promise`] handle.
//!
//! A promise is settled at most once. Its callbacks are swept at most once,
//! by whichever observer (`wait`, `wait_timeout` or a poll) first sees the
//! settled outcome; the fire gate makes every other observer wait for that
//! sweep to finish before it returns.

use std::fmt;
use std::future::Future;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use tracing::{error, trace};

use crate::error::panic_message;
use crate::producer::{Builder, Rejecter, Resolver};
use crate::Error;

type OnFulfilled<T> = Box<dyn FnOnce(&T) + Send>;
type OnRejected = Box<dyn FnOnce(&Error) + Send>;
type OnSettled = Box<dyn FnOnce() + Send>;

enum Reaction<T> {
    Then(OnFulfilled<T>),
    Catch(OnRejected),
    Finally(OnSettled),
}

impl<T> Reaction<T> {
    fn run(self, outcome: &Result<T, Error>) {
        match (self, outcome) {
            (Reaction::Then(f), Ok(value)) => guarded("then", || f(value)),
            (Reaction::Catch(f), Err(err)) => guarded("catch", || f(err)),
            (Reaction::Finally(f), _) => guarded("finally", f),
            _ => {}
        }
    }
}

struct Reactions<T> {
    then: Vec<OnFulfilled<T>>,
    catch: Vec<OnRejected>,
    finally: Vec<OnSettled>,
}

impl<T> Default for Reactions<T> {
    fn default() -> Self {
        Self {
            then: Vec::new(),
            catch: Vec::new(),
            finally: Vec::new(),
        }
    }
}

impl<T> Reactions<T> {
    fn push(&mut self, reaction: Reaction<T>) {
        match reaction {
            Reaction::Then(f) => self.then.push(f),
            Reaction::Catch(f) => self.catch.push(f),
            Reaction::Finally(f) => self.finally.push(f),
        }
    }

    fn is_empty(&self) -> bool {
        self.then.is_empty() && self.catch.is_empty() && self.finally.is_empty()
    }

    fn take_branch(&mut self) -> Self {
        Self {
            then: mem::take(&mut self.then),
            catch: mem::take(&mut self.catch),
            finally: Vec::new(),
        }
    }

    fn take_finally(&mut self) -> Self {
        Self {
            then: Vec::new(),
            catch: Vec::new(),
            finally: mem::take(&mut self.finally),
        }
    }

    /// Branch callbacks in registration order, then every `finally`.
    fn fire(self, outcome: &Result<T, Error>) {
        match outcome {
            Ok(value) => {
                for f in self.then {
                    guarded("then", || f(value));
                }
            }
            Err(err) => {
                for f in self.catch {
                    guarded("catch", || f(err));
                }
            }
        }
        for f in self.finally {
            guarded("finally", f);
        }
    }
}

/// A panicking callback must not leave the fire gate stuck in `Firing`.
fn guarded(kind: &'static str, callback: impl FnOnce()) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(callback)) {
        error!(
            callback = kind,
            message = %panic_message(payload.as_ref()),
            "promise callback panicked"
        );
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Gate {
    Armed,
    Firing(ThreadId),
    Done,
}

struct State<T> {
    outcome: Option<Result<T, Error>>,
    reactions: Reactions<T>,
    gate: Gate,
    wakers: Vec<Waker>,
}

impl<T> State<T> {
    fn register_waker(&mut self, waker: &Waker) {
        if !self.wakers.iter().any(|w| w.will_wake(waker)) {
            self.wakers.push(waker.clone());
        }
    }
}

pub(crate) struct Inner<T> {
    state: Mutex<State<T>>,
    changed: Condvar,
}

impl<T> Inner<T> {
    fn new(outcome: Option<Result<T, Error>>) -> Self {
        Self {
            state: Mutex::new(State {
                outcome,
                reactions: Reactions::default(),
                gate: Gate::Armed,
                wakers: Vec::new(),
            }),
            changed: Condvar::new(),
        }
    }

    // Callbacks never run under this lock, so poisoning can only come from a
    // bug in this module; the state itself is still consistent.
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, State<T>>) -> MutexGuard<'a, State<T>> {
        self.changed
            .wait(guard)
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn wait_timeout<'a>(
        &self,
        guard: MutexGuard<'a, State<T>>,
        timeout: Duration,
    ) -> MutexGuard<'a, State<T>> {
        match self.changed.wait_timeout(guard, timeout) {
            Ok((guard, _)) => guard,
            Err(poisoned) => poisoned.into_inner().0,
        }
    }

    /// First writer wins. Returns `false` if the promise was already settled.
    pub(crate) fn settle(&self, outcome: Result<T, Error>) -> bool {
        let mut state = self.lock();
        if state.outcome.is_some() {
            return false;
        }
        trace!(fulfilled = outcome.is_ok(), "promise settled");
        state.outcome = Some(outcome);
        let wakers = mem::take(&mut state.wakers);
        drop(state);
        self.changed.notify_all();
        wakers.into_iter().for_each(Waker::wake);
        true
    }

    pub(crate) fn is_settled(&self) -> bool {
        self.lock().outcome.is_some()
    }

    /// Runs every registered callback, including any appended while the
    /// sweep is in progress, then opens the gate for the other observers.
    ///
    /// `finally` callbacks run only once no `then` or `catch` is left, so a
    /// branch callback registered mid-sweep still runs before them.
    fn sweep<'a>(&'a self, mut state: MutexGuard<'a, State<T>>, outcome: &Result<T, Error>) {
        loop {
            let branch = state.reactions.take_branch();
            let reactions = if branch.is_empty() {
                state.reactions.take_finally()
            } else {
                branch
            };
            if reactions.is_empty() {
                break;
            }
            drop(state);
            reactions.fire(outcome);
            state = self.lock();
        }
        trace!("promise callbacks swept");
        state.gate = Gate::Done;
        let wakers = mem::take(&mut state.wakers);
        drop(state);
        self.changed.notify_all();
        wakers.into_iter().for_each(Waker::wake);
    }
}

/// A value of type `T` that becomes available at most once, or the [`Error`]
/// that replaced it.
///
/// `Promise` is a cheap handle: clones share the same settlement state, so a
/// promise can be awaited from many threads at once and callbacks can be
/// registered through any clone.
///
/// # Examples
///
/// ```
/// use thread_promise::Promise;
/// use std::{thread, time::Duration};
///
/// let promise = Promise::new(|resolve, _reject| {
///     thread::sleep(Duration::from_millis(10));
///     resolve(String::from("🍓"));
/// });
/// let fruit = promise
///     .then(|fruit| println!("Received {fruit:?}"))
///     .finally(|| println!("done"))
///     .wait();
/// assert_eq!(fruit.unwrap(), "🍓");
/// ```
pub struct Promise<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.inner.lock().outcome {
            None => "pending",
            Some(Ok(_)) => "fulfilled",
            Some(Err(_)) => "rejected",
        };
        f.debug_struct("Promise").field("state", &state).finish()
    }
}

impl<T: Send + 'static> Promise<T> {
    /// Runs `producer` on its own thread and returns the unsettled promise
    /// immediately.
    ///
    /// The producer should call exactly one of `resolve` or `reject`. If it
    /// panics the promise is rejected with [`Error::Panicked`]; if both are
    /// dropped uncalled it is rejected with [`Error::ProducerDropped`]. Use a
    /// [`Builder`] to name the thread or attach a cancellation token.
    pub fn new<F>(producer: F) -> Self
    where
        F: FnOnce(Resolver<T>, Rejecter) + Send + 'static,
    {
        Builder::new().spawn(producer)
    }
}

impl<T> Promise<T> {
    /// An already fulfilled promise. No thread is spawned.
    pub fn resolve(value: T) -> Self {
        Self::with_outcome(Some(Ok(value)))
    }

    /// An already rejected promise. No thread is spawned.
    pub fn reject(error: Error) -> Self {
        Self::with_outcome(Some(Err(error)))
    }

    pub(crate) fn pending() -> Self {
        Self::with_outcome(None)
    }

    fn with_outcome(outcome: Option<Result<T, Error>>) -> Self {
        Self {
            inner: Arc::new(Inner::new(outcome)),
        }
    }

    pub(crate) fn inner(&self) -> &Arc<Inner<T>> {
        &self.inner
    }

    /// Whether the promise has been settled. Never fires callbacks.
    pub fn is_settled(&self) -> bool {
        self.inner.is_settled()
    }
}

impl<T: Clone> Promise<T> {
    /// Registers a callback for fulfillment.
    ///
    /// Callbacks run once, in registration order, on the first observer of
    /// the settled promise. Registered after that sweep, the callback runs
    /// immediately on the calling thread.
    pub fn then<F>(self, on_fulfilled: F) -> Self
    where
        F: FnOnce(&T) + Send + 'static,
    {
        self.register(Reaction::Then(Box::new(on_fulfilled)));
        self
    }

    /// Registers a callback for rejection. Same ordering rules as [`then`](Self::then).
    pub fn catch<F>(self, on_rejected: F) -> Self
    where
        F: FnOnce(&Error) + Send + 'static,
    {
        self.register(Reaction::Catch(Box::new(on_rejected)));
        self
    }

    /// Registers a callback that runs after the `then` or `catch` callbacks,
    /// whichever way the promise settles.
    pub fn finally<F>(self, on_settled: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.register(Reaction::Finally(Box::new(on_settled)));
        self
    }

    fn register(&self, reaction: Reaction<T>) {
        let mut state = self.inner.lock();
        if state.gate != Gate::Done {
            state.reactions.push(reaction);
            return;
        }
        let outcome = state.outcome.clone();
        drop(state);
        if let Some(outcome) = outcome {
            reaction.run(&outcome);
        }
    }

    /// Blocks until the promise settles and returns its outcome.
    ///
    /// Every registered callback has run by the time any call returns, and
    /// runs only once however many threads wait. A `wait` from inside one of
    /// this promise's own callbacks returns straight away.
    pub fn wait(&self) -> Result<T, Error> {
        let mut state = self.inner.lock();
        let outcome = loop {
            if let Some(outcome) = &state.outcome {
                break outcome.clone();
            }
            state = self.inner.wait(state);
        };
        self.finish(state, outcome)
    }

    /// Like [`wait`](Self::wait), but gives up with [`Error::TimedOut`] if
    /// the promise is still pending after `timeout`.
    ///
    /// Advisory only: a timeout leaves the promise pending and its callbacks
    /// unfired. Once settled, this may still wait for another thread's
    /// callback sweep to finish.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<T, Error> {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            return self.wait();
        };
        let mut state = self.inner.lock();
        let outcome = loop {
            if let Some(outcome) = &state.outcome {
                break outcome.clone();
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                trace!(?timeout, "gave up waiting on a pending promise");
                return Err(Error::TimedOut);
            }
            state = self.inner.wait_timeout(state, remaining);
        };
        self.finish(state, outcome)
    }

    /// The outcome if already settled. Never blocks and never fires callbacks.
    pub fn try_outcome(&self) -> Option<Result<T, Error>> {
        self.inner.lock().outcome.clone()
    }

    fn finish(
        &self,
        mut state: MutexGuard<'_, State<T>>,
        outcome: Result<T, Error>,
    ) -> Result<T, Error> {
        let me = thread::current().id();
        loop {
            let gate = state.gate;
            match gate {
                Gate::Armed => {
                    state.gate = Gate::Firing(me);
                    self.inner.sweep(state, &outcome);
                    return outcome;
                }
                Gate::Firing(owner) if owner != me => state = self.inner.wait(state),
                _ => return outcome,
            }
        }
    }
}

impl<T: Send + Clone + 'static> Promise<T> {
    /// See [`all`](crate::all).
    pub fn all<I>(promises: I) -> Promise<Vec<T>>
    where
        I: IntoIterator<Item = Promise<T>>,
    {
        crate::all(promises)
    }
}

impl<T: Clone> Future for Promise<T> {
    type Output = Result<T, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.inner.lock();
        let Some(outcome) = state.outcome.clone() else {
            state.register_waker(cx.waker());
            return Poll::Pending;
        };
        let me = thread::current().id();
        let gate = state.gate;
        match gate {
            Gate::Armed => {
                state.gate = Gate::Firing(me);
                self.inner.sweep(state, &outcome);
                Poll::Ready(outcome)
            }
            Gate::Firing(owner) if owner != me => {
                state.register_waker(cx.waker());
                Poll::Pending
            }
            _ => Poll::Ready(outcome),
        }
    }
}
