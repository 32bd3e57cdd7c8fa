use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use crate::deferred::{self, Callback, Deferred, Event, Inner, Scope, State};
use crate::value::Value;

/// A chaining filter for [`Promise::then`]. Takes the incoming payload and
/// either transforms it (`Ok`) or throws (`Err`), which rejects the derived
/// promise with the error value.
pub type Filter = Box<dyn Fn(Value) -> Result<Value, Value> + Send + Sync>;

/// Wrap a closure as a [`Filter`].
pub fn filter<F>(f: F) -> Filter
where
    F: Fn(Value) -> Result<Value, Value> + Send + Sync + 'static,
{
    Box::new(f)
}

/// The read side of a [`Deferred`]: it can subscribe, chain, inspect and
/// `await`, but never settle. Safe to hand to any consumer; the settle
/// operations simply do not exist on this type.
///
/// Clones observe the same deferred, and equality is that same identity:
/// `dfd.promise() == dfd.promise()`.
///
/// A `Promise` is also a [`Future`] yielding `Result<Value, Value>`
/// (fulfillment value or rejection reason), which resolves independently of
/// observer callbacks:
///
/// ```
/// use std::thread;
/// use futures::executor::block_on;
/// use deferred_out::{Deferred, Value};
///
/// let dfd = Deferred::new();
/// let promise = dfd.promise();
/// let worker = thread::spawn(move || {
///     dfd.resolve("finished");
/// });
/// assert_eq!(block_on(promise), Ok(Value::from("finished")));
/// worker.join().expect("The worker thread has panicked");
/// ```
pub struct Promise {
    pub(crate) inner: Arc<Mutex<Inner>>,
}

impl Promise {
    pub(crate) fn from_inner(inner: Arc<Mutex<Inner>>) -> Promise {
        Promise { inner }
    }

    pub fn state(&self) -> State {
        deferred::state_of(&self.inner)
    }

    /// Run `callback` when the deferred fulfills (scheduled immediately if it
    /// already has).
    pub fn done<F>(&self, callback: F) -> &Self
    where
        F: Fn(&Scope, &Value) + Send + Sync + 'static,
    {
        self.subscribe(Event::Done, vec![Arc::new(callback)])
    }

    /// Run `callback` when the deferred rejects.
    pub fn fail<F>(&self, callback: F) -> &Self
    where
        F: Fn(&Scope, &Value) + Send + Sync + 'static,
    {
        self.subscribe(Event::Fail, vec![Arc::new(callback)])
    }

    /// Run `callback` on either terminal state, after the state-specific
    /// observers registered so far.
    pub fn always<F>(&self, callback: F) -> &Self
    where
        F: Fn(&Scope, &Value) + Send + Sync + 'static,
    {
        self.subscribe(Event::Always, vec![Arc::new(callback)])
    }

    /// Run `callback` on every notify while the deferred is pending.
    pub fn progress<F>(&self, callback: F) -> &Self
    where
        F: Fn(&Scope, &Value) + Send + Sync + 'static,
    {
        self.subscribe(Event::Progress, vec![Arc::new(callback)])
    }

    /// List form of the observer methods: append `callbacks` in order; a
    /// batch delivered together runs inside one scheduler turn, in order.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::sync::{Arc, Mutex};
    /// use deferred_out::{callback, Deferred, Event, TurnQueue};
    ///
    /// let queue = Arc::new(TurnQueue::new());
    /// let dfd = Deferred::new_on(queue.clone());
    /// let log = Arc::new(Mutex::new(Vec::new()));
    ///
    /// let (a, b) = (log.clone(), log.clone());
    /// dfd.promise().subscribe(Event::Done, vec![
    ///     callback(move |_, _| a.lock().unwrap().push("first")),
    ///     callback(move |_, _| b.lock().unwrap().push("second")),
    /// ]);
    /// dfd.resolve(());
    /// queue.run_until_idle();
    /// assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
    /// ```
    pub fn subscribe(&self, event: Event, callbacks: Vec<Callback>) -> &Self {
        deferred::subscribe(&self.inner, event, callbacks);
        self
    }

    /// Derive a new promise by filtering this one's events.
    ///
    /// Each filter is optional. On fulfillment, `done_filter`'s `Ok` feeds
    /// the derived deferred's resolve (running the full resolution rules, so
    /// returning a promise chains into it); `Err` rejects it. On rejection,
    /// `fail_filter`'s `Ok` also feeds *resolve*: a handled rejection is a
    /// fulfillment downstream. Progress is filtered onto the derived notify
    /// channel. An absent filter passes the event through unchanged, on its
    /// original channel.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::sync::Arc;
    /// use deferred_out::{filter, Deferred, State, TurnQueue, Value};
    ///
    /// let queue = Arc::new(TurnQueue::new());
    /// let dfd = Deferred::new_on(queue.clone());
    ///
    /// let recovered = dfd.promise().then(
    ///     None,
    ///     Some(filter(|_reason| Ok(Value::Int(42)))),
    ///     None,
    /// );
    /// dfd.reject("boom");
    /// queue.run_until_idle();
    /// assert_eq!(recovered.state(), State::Fulfilled);
    /// ```
    pub fn then(
        &self,
        done_filter: Option<Filter>,
        fail_filter: Option<Filter>,
        progress_filter: Option<Filter>,
    ) -> Promise {
        let next = Deferred::new_on(deferred::scheduler_of(&self.inner));
        self.subscribe(
            Event::Done,
            vec![filter_arm(done_filter, next.clone(), Arm::Resolve)],
        );
        self.subscribe(
            Event::Fail,
            vec![filter_arm(fail_filter, next.clone(), Arm::Reject)],
        );
        self.subscribe(
            Event::Progress,
            vec![filter_arm(progress_filter, next.clone(), Arm::Notify)],
        );
        next.promise()
    }
}

impl Clone for Promise {
    fn clone(&self) -> Self {
        Promise {
            inner: self.inner.clone(),
        }
    }
}

/// View identity: equal iff both observe the same deferred.
impl PartialEq for Promise {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Promise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl crate::Promised for Promise {
    fn view(&self) -> &Promise {
        self
    }
}

/// `await` support. Wakers park until settlement; note that a deferred
/// dropped while still pending never settles, so its waiters never wake.
impl Future for Promise {
    type Output = Result<Value, Value>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match deferred::poll_inner(&self.inner, cx.waker()) {
            Some(outcome) => Poll::Ready(outcome),
            None => Poll::Pending,
        }
    }
}

#[derive(Clone, Copy)]
enum Arm {
    Resolve,
    Reject,
    Notify,
}

/// One subscription arm of `then`: run the filter (if any) and feed the
/// outcome into the derived deferred. A filter error rejects the derived
/// deferred and goes no further.
fn filter_arm(filter: Option<Filter>, next: Deferred, arm: Arm) -> Callback {
    Arc::new(move |_, value: &Value| match &filter {
        Some(f) => match f(value.clone()) {
            Ok(out) => match arm {
                // Both settle arms resolve on filter success: a handled
                // rejection becomes a fulfillment.
                Arm::Resolve | Arm::Reject => {
                    next.resolve(out);
                }
                Arm::Notify => {
                    next.notify(out);
                }
            },
            Err(thrown) => {
                next.reject(thrown);
            }
        },
        None => match arm {
            Arm::Resolve => {
                next.resolve(value.clone());
            }
            Arm::Reject => {
                next.reject(value.clone());
            }
            Arm::Notify => {
                next.notify(value.clone());
            }
        },
    })
}
