use std::any::Any;
use std::error::Error as StdError;
use std::io;
use std::sync::Arc;

/// The reason a promise was rejected.
///
/// Producer errors travel through [`Error::Rejected`] untouched; every other
/// variant is synthesized by the crate at a thread boundary.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// An error handed to the rejecter by the producer.
    #[error("{0}")]
    Rejected(Arc<dyn StdError + Send + Sync + 'static>),
    /// The producer panicked before settling the promise.
    #[error("producer panicked: {0}")]
    Panicked(String),
    /// The resolver and rejecter were both dropped without either being called.
    #[error("producer dropped without settling the promise")]
    ProducerDropped,
    #[error("producer cancelled before it started")]
    Cancelled,
    /// Only returned by `wait_timeout`; a promise is never settled with it.
    #[error("timed out waiting for the promise to settle")]
    TimedOut,
    #[error("failed to spawn thread: {0}")]
    Spawn(Arc<io::Error>),
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct Message(String);

impl Error {
    /// Wraps any error as a producer rejection.
    pub fn new<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Error::Rejected(Arc::new(error))
    }

    /// A producer rejection carrying only a message.
    pub fn msg(message: impl Into<String>) -> Self {
        Error::new(Message(message.into()))
    }

    /// Borrows the producer's error as `E`, if this is a rejection of that type.
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: StdError + 'static,
    {
        match self {
            Error::Rejected(inner) => (**inner).downcast_ref::<E>(),
            _ => None,
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
