//! One-shot promises settled by a producer thread.
//!
//! A [`Promise`] is created around a producer closure that receives a
//! resolver and a rejecter, or pre-settled with [`Promise::resolve`] and
//! [`Promise::reject`]. Consumers register `then`, `catch` and `finally`
//! callbacks, then block on [`Promise::wait`] or `.await` the promise on any
//! executor. [`all`] joins many promises into one.
//!
//! # Examples
//!
//! ```
//! use thread_promise::{all, Error, Promise};
//! use std::thread;
//!
//! let slow = Promise::new(|resolve, _reject| {
//!     thread::sleep(std::time::Duration::from_millis(20));
//!     resolve(2);
//! });
//! let values = all([Promise::resolve(1), slow])
//!     .then(|values| println!("joined {values:?}"))
//!     .catch(|err| eprintln!("failed: {err}"))
//!     .wait()
//!     .unwrap();
//! assert_eq!(values, [1, 2]);
//!
//! let failed = Promise::<u32>::new(|_resolve, reject| reject(Error::msg("💥")));
//! assert_eq!(failed.wait().unwrap_err().to_string(), "💥");
//! ```

mod all;
mod cancel;
mod error;
mod producer;
mod promise;

pub use crate::all::all;
pub use crate::cancel::CancelToken;
pub use crate::error::Error;
pub use crate::producer::{Builder, Rejecter, Resolver};
pub use crate::promise::Promise;
