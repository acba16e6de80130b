use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use tracing::{debug, error, trace, warn};

use crate::error::panic_message;
use crate::promise::Inner;
use crate::{CancelToken, Error, Promise};

/// Settles the promise with a value. Handed to the producer by [`Promise::new`].
pub type Resolver<T> = Box<dyn FnOnce(T) + Send>;
/// Settles the promise with an error. Handed to the producer by [`Promise::new`].
pub type Rejecter = Box<dyn FnOnce(Error) + Send>;

const PRODUCER_THREAD_NAME: &str = "promise-producer";

/// Shared by the resolver and rejecter of one producer. Dropping the last
/// reference to an unsettled promise rejects it.
struct Settler<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Settler<T> {
    fn settle(&self, outcome: Result<T, Error>) {
        let settled = self.inner.settle(outcome);
        if !settled {
            warn!("ignored a second settlement of the same promise");
        }
        debug_assert!(settled, "promise settled more than once");
    }
}

impl<T> Drop for Settler<T> {
    fn drop(&mut self) {
        if self.inner.settle(Err(Error::ProducerDropped)) {
            debug!("producer dropped its resolver and rejecter without settling");
        }
    }
}

/// Thread configuration for a promise's producer.
///
/// # Examples
///
/// ```
/// use thread_promise::{Builder, CancelToken, Error};
///
/// let token = CancelToken::new();
/// token.cancel();
/// let promise = Builder::new()
///     .name("fetch")
///     .cancel_token(token)
///     .spawn(|resolve, _reject| resolve(1));
/// assert!(matches!(promise.wait(), Err(Error::Cancelled)));
/// ```
#[derive(Debug, Clone)]
pub struct Builder {
    name: String,
    stack_size: Option<usize>,
    cancel: Option<CancelToken>,
}

impl Builder {
    pub fn new() -> Self {
        Self {
            name: PRODUCER_THREAD_NAME.to_string(),
            stack_size: None,
            cancel: None,
        }
    }

    /// Names the producer thread. Defaults to `promise-producer`.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn stack_size(mut self, size: usize) -> Self {
        assert!(size > 0, "stack_size must be > 0");

        self.stack_size = Some(size);
        self
    }

    /// If `token` is already cancelled when the producer thread starts, the
    /// producer is skipped and the promise is rejected with [`Error::Cancelled`].
    pub fn cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Runs `producer` on a new thread and returns its unsettled promise.
    ///
    /// If the thread cannot be started the promise is rejected with
    /// [`Error::Spawn`].
    pub fn spawn<T, F>(self, producer: F) -> Promise<T>
    where
        T: Send + 'static,
        F: FnOnce(Resolver<T>, Rejecter) + Send + 'static,
    {
        let promise = Promise::pending();
        // Held across the spawn so a failed spawn is reported as such rather
        // than as a dropped producer.
        let settler = Arc::new(Settler {
            inner: promise.inner().clone(),
        });
        let task_settler = settler.clone();
        let cancel = self.cancel.clone();

        let mut thread = thread::Builder::new().name(self.name.clone());
        if let Some(size) = self.stack_size {
            thread = thread.stack_size(size);
        }
        match thread.spawn(move || run_producer(task_settler, cancel, producer)) {
            Ok(_) => debug!(thread = %self.name, "spawned promise producer"),
            Err(err) => {
                error!(thread = %self.name, error = %err, "failed to spawn promise producer");
                settler.inner.settle(Err(Error::Spawn(Arc::new(err))));
            }
        }
        promise
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

fn run_producer<T, F>(settler: Arc<Settler<T>>, cancel: Option<CancelToken>, producer: F)
where
    T: Send + 'static,
    F: FnOnce(Resolver<T>, Rejecter),
{
    if cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
        trace!("producer cancelled before start");
        settler.inner.settle(Err(Error::Cancelled));
        return;
    }

    let resolve_with = settler.clone();
    let reject_with = settler.clone();
    let resolve: Resolver<T> = Box::new(move |value| resolve_with.settle(Ok(value)));
    let reject: Rejecter = Box::new(move |err| reject_with.settle(Err(err)));

    // `settler` outlives the unwind, so a panic is reported as a panic and not
    // as the resolver being dropped.
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| producer(resolve, reject))) {
        let message = panic_message(payload.as_ref());
        if settler.inner.settle(Err(Error::Panicked(message.clone()))) {
            error!(%message, "promise producer panicked");
        }
    }
}
