//! jQuery-style deferred promises.
//!
//! A [`Deferred`] is the settlement authority for one unit of asynchronous
//! work. It starts pending, settles exactly once (fulfilled by
//! [`resolve`](Deferred::resolve) or rejected by [`reject`](Deferred::reject)),
//! and may emit any number of [`notify`](Deferred::notify) progress signals
//! along the way. Its [`Promise`] is the restricted view to hand out:
//! consumers subscribe with [`done`](Promise::done) / [`fail`](Promise::fail)
//! / [`always`](Promise::always) / [`progress`](Promise::progress), derive
//! new promises with [`then`](Promise::then), inspect
//! [`state`](Promise::state) or `.await` the outcome, but can never settle.
//!
//! Settle calls run the resolution rules. Plain [`Value`] data settles
//! directly; another [`Promise`] is adopted, meaning even `reject(promise)`
//! follows that promise's actual outcome; a foreign [`Thenable`] is
//! assimilated by trusting its `then` exactly once. [`when`] merges many
//! inputs into one promise over their collected outcomes, and [`wrap`] lifts
//! a single value.
//!
//! Observers never run on the settling call's stack: each deferred delivers
//! through the [`Schedule`] it was created on, either the hand-pumped
//! [`TurnQueue`] for deterministic turns or the shared [`NextTick`] dispatcher
//! thread by default.
//!
//! # Examples
//!
//! ```
//! use std::sync::{Arc, Mutex};
//! use deferred_out::{filter, Deferred, TurnQueue, Value};
//!
//! let queue = Arc::new(TurnQueue::new());
//! let dfd = Deferred::new_on(queue.clone());
//!
//! let doubled = dfd.promise().then(
//!     Some(filter(|v| Ok(Value::Int(v.as_i64().unwrap_or(0) * 2)))),
//!     None,
//!     None,
//! );
//! let seen = Arc::new(Mutex::new(None));
//! let log = seen.clone();
//! doubled.done(move |_, v| *log.lock().unwrap() = Some(v.clone()));
//!
//! dfd.resolve(21);
//! assert!(seen.lock().unwrap().is_none()); // nothing is delivered synchronously
//! queue.run_until_idle();
//! assert_eq!(*seen.lock().unwrap(), Some(Value::Int(42)));
//! ```
//!
//! A [`Promise`] is also a [`Future`](std::future::Future), so a settled
//! outcome can be awaited from another thread:
//!
//! ```
//! use std::thread;
//! use futures::executor::block_on;
//! use deferred_out::{Deferred, Value};
//!
//! let dfd = Deferred::new();
//! let promise = dfd.promise();
//! let task = thread::spawn(move || {
//!     dfd.resolve("🍓");
//! });
//! assert_eq!(block_on(promise), Ok(Value::from("🍓")));
//! task.join().expect("The task thread has panicked");
//! ```

mod deferred;
mod error;
mod promise;
mod resolve;
mod schedule;
mod thenable;
mod value;
mod when;

pub use deferred::{callback, Callback, Deferred, Event, Scope, State};
pub use error::Error;
pub use promise::{filter, Filter, Promise};
pub use schedule::{Job, NextTick, Schedule, TurnQueue};
pub use thenable::{ThenFn, Thenable};
pub use value::Value;
pub use when::{when, when_on, wrap, wrap_on};

/// Observer capabilities for any value that embeds a [`Promise`].
///
/// Implement [`view`](Promised::view) and the host gains the whole
/// subscription surface, delegating to the embedded view; callers register
/// callbacks on the host itself. [`Deferred`] and [`Promise`] implement it
/// too, so generic code can take `impl Promised`.
///
/// # Examples
///
/// ```
/// use std::sync::{Arc, Mutex};
/// use deferred_out::{Deferred, Promise, Promised, State, TurnQueue, Value};
///
/// struct Download {
///     url: String,
///     promise: Promise,
/// }
///
/// impl Promised for Download {
///     fn view(&self) -> &Promise {
///         &self.promise
///     }
/// }
///
/// let queue = Arc::new(TurnQueue::new());
/// let dfd = Deferred::new_on(queue.clone());
/// let download = Download {
///     url: "https://example.com/a.tar".into(),
///     promise: dfd.promise(),
/// };
///
/// let seen = Arc::new(Mutex::new(None));
/// let log = seen.clone();
/// download.done(move |_, v| *log.lock().unwrap() = Some(v.clone()));
///
/// dfd.resolve(download.url.as_str());
/// queue.run_until_idle();
/// assert_eq!(download.state(), State::Fulfilled);
/// assert_eq!(
///     *seen.lock().unwrap(),
///     Some(Value::from("https://example.com/a.tar"))
/// );
/// ```
pub trait Promised {
    /// The embedded view every provided method delegates to.
    fn view(&self) -> &Promise;

    /// See [`Promise::state`].
    fn state(&self) -> State {
        self.view().state()
    }

    /// See [`Promise::done`].
    fn done<F>(&self, callback: F) -> &Self
    where
        F: Fn(&Scope, &Value) + Send + Sync + 'static,
    {
        self.view().done(callback);
        self
    }

    /// See [`Promise::fail`].
    fn fail<F>(&self, callback: F) -> &Self
    where
        F: Fn(&Scope, &Value) + Send + Sync + 'static,
    {
        self.view().fail(callback);
        self
    }

    /// See [`Promise::always`].
    fn always<F>(&self, callback: F) -> &Self
    where
        F: Fn(&Scope, &Value) + Send + Sync + 'static,
    {
        self.view().always(callback);
        self
    }

    /// See [`Promise::progress`].
    fn progress<F>(&self, callback: F) -> &Self
    where
        F: Fn(&Scope, &Value) + Send + Sync + 'static,
    {
        self.view().progress(callback);
        self
    }

    /// See [`Promise::subscribe`].
    fn subscribe(&self, event: Event, callbacks: Vec<Callback>) -> &Self {
        self.view().subscribe(event, callbacks);
        self
    }

    /// See [`Promise::then`].
    fn then(
        &self,
        done_filter: Option<Filter>,
        fail_filter: Option<Filter>,
        progress_filter: Option<Filter>,
    ) -> Promise {
        self.view().then(done_filter, fail_filter, progress_filter)
    }
}
