use std::fmt;
use std::sync::{Arc, Mutex};
use std::task::Waker;

use tracing::trace;

use crate::promise::{Filter, Promise};
use crate::resolve::{self, Intent};
use crate::schedule::{NextTick, Schedule};
use crate::value::Value;

/// Where a deferred is in its lifecycle. Monotonic: once a terminal state is
/// reached it never changes again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Pending,
    Fulfilled,
    Rejected,
}

/// The observer list a [`subscribe`](Deferred::subscribe) call appends to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Runs on fulfillment.
    Done,
    /// Runs on rejection.
    Fail,
    /// Runs on either terminal state, after the state-specific list.
    Always,
    /// Runs on every notify while pending.
    Progress,
}

/// The binding context callbacks receive as their first argument. `None`
/// unless a `*_with` settle variant supplied one; once set it sticks for
/// every later delivery.
pub type Scope = Option<Value>;

/// An observer callback: `(scope, payload)`.
pub type Callback = Arc<dyn Fn(&Scope, &Value) + Send + Sync>;

/// Wrap a closure as a [`Callback`] for the list form of
/// [`subscribe`](Deferred::subscribe).
pub fn callback<F>(f: F) -> Callback
where
    F: Fn(&Scope, &Value) + Send + Sync + 'static,
{
    Arc::new(f)
}

pub(crate) struct Inner {
    state: State,
    value: Option<Value>,
    scope: Scope,
    done: Vec<Callback>,
    fail: Vec<Callback>,
    always: Vec<Callback>,
    progress: Vec<Callback>,
    wakers: Vec<Waker>, // one per parked poller; waking only the latest
                        // strands the rest
    scheduler: Arc<dyn Schedule>,
}

/// The settlement authority for one unit of asynchronous work.
///
/// A `Deferred` starts pending and moves exactly once to fulfilled (via
/// [`resolve`](Deferred::resolve)) or rejected (via
/// [`reject`](Deferred::reject)); while pending it may emit any number of
/// [`notify`](Deferred::notify) progress signals. Observers never run on the
/// settling call's stack: delivery always goes through the scheduler the
/// deferred was created on.
///
/// Hand out [`promise()`](Deferred::promise) views to consumers; a view can
/// observe and chain but never settle.
///
/// # Examples
///
/// ```
/// use std::sync::{Arc, Mutex};
/// use deferred_out::{Deferred, TurnQueue};
///
/// let queue = Arc::new(TurnQueue::new());
/// let dfd = Deferred::new_on(queue.clone());
/// let log = Arc::new(Mutex::new(Vec::new()));
///
/// let seen = log.clone();
/// dfd.done(move |_, v| seen.lock().unwrap().push(format!("done {:?}", v)))
///     .always(|_, _| ());
/// dfd.resolve("ready");
///
/// assert!(log.lock().unwrap().is_empty()); // nothing runs synchronously
/// queue.run_until_idle();
/// assert_eq!(*log.lock().unwrap(), vec!["done Str(\"ready\")"]);
/// ```
#[derive(Clone)]
pub struct Deferred {
    inner: Arc<Mutex<Inner>>,
    view: Promise,
}

impl Deferred {
    /// A pending deferred on the shared [`NextTick`] scheduler.
    pub fn new() -> Deferred {
        Self::new_on(NextTick::global())
    }

    /// A pending deferred delivering through `scheduler`.
    pub fn new_on(scheduler: Arc<dyn Schedule>) -> Deferred {
        let inner = Arc::new(Mutex::new(Inner {
            state: State::Pending,
            value: None,
            scope: None,
            done: Vec::new(),
            fail: Vec::new(),
            always: Vec::new(),
            progress: Vec::new(),
            wakers: Vec::new(),
            scheduler,
        }));
        let view = Promise::from_inner(inner.clone());
        Deferred { inner, view }
    }

    /// Run `before_start` with the fresh deferred before returning it, so
    /// setup (subscriptions, even settlement) can happen at construction.
    ///
    /// # Examples
    ///
    /// ```
    /// use deferred_out::{Deferred, State};
    ///
    /// let dfd = Deferred::new_with(|d| {
    ///     d.resolve(1);
    /// });
    /// assert_eq!(dfd.state(), State::Fulfilled);
    /// ```
    pub fn new_with<F>(before_start: F) -> Deferred
    where
        F: FnOnce(&Deferred),
    {
        let dfd = Self::new();
        before_start(&dfd);
        dfd
    }

    /// The observer view of this deferred. Every call returns the same view
    /// identity: `dfd.promise() == dfd.promise()`.
    pub fn promise(&self) -> Promise {
        self.view.clone()
    }

    pub fn state(&self) -> State {
        state_of(&self.inner)
    }

    /// Fulfill with `value`, routed through the resolution rules: resolving
    /// with a [`Value::Promise`] adopts that promise's eventual outcome, a
    /// [`Value::Thenable`] is assimilated, plain data fulfills directly.
    /// No-op once settled.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::sync::{Arc, Mutex};
    /// use deferred_out::{Deferred, TurnQueue, Value};
    ///
    /// let queue = Arc::new(TurnQueue::new());
    /// let dfd = Deferred::new_on(queue.clone());
    /// let seen = Arc::new(Mutex::new(None));
    ///
    /// let log = seen.clone();
    /// dfd.done(move |_, v| *log.lock().unwrap() = Some(v.clone()));
    /// dfd.resolve("ready").reject("too late");
    /// queue.run_until_idle();
    ///
    /// assert_eq!(*seen.lock().unwrap(), Some(Value::from("ready")));
    /// ```
    pub fn resolve(&self, value: impl Into<Value>) -> &Self {
        self.settle(None, value.into(), Intent::Fulfill)
    }

    /// [`resolve`](Deferred::resolve) with a binding scope: observers for
    /// this and every later delivery receive `scope` as their first argument.
    pub fn resolve_with(&self, scope: impl Into<Value>, value: impl Into<Value>) -> &Self {
        self.settle(Some(scope.into()), value.into(), Intent::Fulfill)
    }

    /// Reject with `value`. Follows the same resolution rules as
    /// [`resolve`](Deferred::resolve): rejecting with a promise still adopts
    /// its actual outcome, so the result may yet be fulfillment. No-op once
    /// settled.
    pub fn reject(&self, value: impl Into<Value>) -> &Self {
        self.settle(None, value.into(), Intent::Reject)
    }

    /// [`reject`](Deferred::reject) with a binding scope.
    pub fn reject_with(&self, scope: impl Into<Value>, value: impl Into<Value>) -> &Self {
        self.settle(Some(scope.into()), value.into(), Intent::Reject)
    }

    /// Deliver a progress signal to the currently registered progress
    /// observers. Repeatable while pending; a no-op once settled. Observers
    /// registered after this call do not join its batch.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::sync::{Arc, Mutex};
    /// use deferred_out::{Deferred, TurnQueue, Value};
    ///
    /// let queue = Arc::new(TurnQueue::new());
    /// let dfd = Deferred::new_on(queue.clone());
    /// let seen = Arc::new(Mutex::new(Vec::new()));
    ///
    /// let log = seen.clone();
    /// dfd.progress(move |_, v| log.lock().unwrap().push(v.clone()));
    /// dfd.notify(1).notify(2).resolve("done").notify(3);
    /// queue.run_until_idle();
    ///
    /// assert_eq!(*seen.lock().unwrap(), vec![Value::Int(1), Value::Int(2)]);
    /// ```
    pub fn notify(&self, value: impl Into<Value>) -> &Self {
        self.do_notify(value.into());
        self
    }

    /// [`notify`](Deferred::notify) with a binding scope. The scope sticks
    /// for later deliveries too, including the eventual settlement batch.
    pub fn notify_with(&self, scope: impl Into<Value>, value: impl Into<Value>) -> &Self {
        {
            let mut guard = self.inner.lock().unwrap();
            if guard.state == State::Pending {
                guard.scope = Some(scope.into());
            }
        }
        self.do_notify(value.into());
        self
    }

    /// Append `callback` to the fulfillment list, or schedule it immediately
    /// if already fulfilled.
    pub fn done<F>(&self, callback: F) -> &Self
    where
        F: Fn(&Scope, &Value) + Send + Sync + 'static,
    {
        self.view.done(callback);
        self
    }

    /// Append `callback` to the rejection list, or schedule it immediately
    /// if already rejected.
    pub fn fail<F>(&self, callback: F) -> &Self
    where
        F: Fn(&Scope, &Value) + Send + Sync + 'static,
    {
        self.view.fail(callback);
        self
    }

    /// Append `callback` to the settled list: it runs after the done or fail
    /// list whichever way this deferred settles.
    pub fn always<F>(&self, callback: F) -> &Self
    where
        F: Fn(&Scope, &Value) + Send + Sync + 'static,
    {
        self.view.always(callback);
        self
    }

    /// Append `callback` to the progress list. Dropped if already settled.
    pub fn progress<F>(&self, callback: F) -> &Self
    where
        F: Fn(&Scope, &Value) + Send + Sync + 'static,
    {
        self.view.progress(callback);
        self
    }

    /// List form of the observer methods: append `callbacks` in order to the
    /// list `event` names.
    pub fn subscribe(&self, event: Event, callbacks: Vec<Callback>) -> &Self {
        subscribe(&self.inner, event, callbacks);
        self
    }

    /// Chain through filters; see [`Promise::then`].
    pub fn then(
        &self,
        done_filter: Option<Filter>,
        fail_filter: Option<Filter>,
        progress_filter: Option<Filter>,
    ) -> Promise {
        self.view.then(done_filter, fail_filter, progress_filter)
    }

    fn settle(&self, scope: Scope, value: Value, intent: Intent) -> &Self {
        {
            let mut guard = self.inner.lock().unwrap();
            if guard.state != State::Pending {
                return self;
            }
            if let Some(scope) = scope {
                guard.scope = Some(scope);
            }
        }
        resolve::dispatch(self, value, intent);
        self
    }

    /// Terminal fulfillment: flips state, stores the value, schedules the
    /// done-then-always batch. No-op once settled, whichever path got there
    /// first.
    pub(crate) fn do_resolve(&self, value: Value) {
        let (scheduler, scope, value, batch, wakers) = {
            let mut guard = self.inner.lock().unwrap();
            if guard.state != State::Pending {
                return;
            }
            let inner = &mut *guard;
            inner.state = State::Fulfilled;
            inner.value = Some(value.clone());
            let batch: Vec<Callback> = inner.done.drain(..).chain(inner.always.drain(..)).collect();
            inner.fail.clear();
            inner.progress.clear();
            (
                inner.scheduler.clone(),
                inner.scope.clone(),
                value,
                batch,
                std::mem::take(&mut inner.wakers),
            )
        };
        trace!(observers = batch.len(), "deferred fulfilled");
        for waker in wakers {
            waker.wake();
        }
        deliver(&scheduler, scope, value, batch);
    }

    /// Terminal rejection: flips state, stores the reason, schedules the
    /// fail-then-always batch.
    pub(crate) fn do_reject(&self, value: Value) {
        let (scheduler, scope, value, batch, wakers) = {
            let mut guard = self.inner.lock().unwrap();
            if guard.state != State::Pending {
                return;
            }
            let inner = &mut *guard;
            inner.state = State::Rejected;
            inner.value = Some(value.clone());
            let batch: Vec<Callback> = inner.fail.drain(..).chain(inner.always.drain(..)).collect();
            inner.done.clear();
            inner.progress.clear();
            (
                inner.scheduler.clone(),
                inner.scope.clone(),
                value,
                batch,
                std::mem::take(&mut inner.wakers),
            )
        };
        trace!(observers = batch.len(), "deferred rejected");
        for waker in wakers {
            waker.wake();
        }
        deliver(&scheduler, scope, value, batch);
    }

    /// Progress delivery to a snapshot of the current progress list. The
    /// payload is not retained; only settlement writes `value`.
    pub(crate) fn do_notify(&self, value: Value) {
        let (scheduler, scope, listeners) = {
            let guard = self.inner.lock().unwrap();
            if guard.state != State::Pending {
                return;
            }
            (
                guard.scheduler.clone(),
                guard.scope.clone(),
                guard.progress.clone(),
            )
        };
        trace!(observers = listeners.len(), "progress delivered");
        deliver(&scheduler, scope, value, listeners);
    }

    pub(crate) fn scheduler(&self) -> Arc<dyn Schedule> {
        scheduler_of(&self.inner)
    }

    /// True when `view` observes this very deferred; resolving with it would
    /// never complete.
    pub(crate) fn is_own_view(&self, view: &Promise) -> bool {
        Arc::ptr_eq(&self.inner, &view.inner)
    }
}

impl Default for Deferred {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl crate::Promised for Deferred {
    fn view(&self) -> &Promise {
        &self.view
    }
}

/// Schedule one job that runs `callbacks` in order with `(scope, value)`.
/// One event's worth of observers always shares a single turn.
pub(crate) fn deliver(
    scheduler: &Arc<dyn Schedule>,
    scope: Scope,
    value: Value,
    callbacks: Vec<Callback>,
) {
    if callbacks.is_empty() {
        return;
    }
    scheduler.defer(Box::new(move || {
        for cb in &callbacks {
            cb(&scope, &value);
        }
    }));
}

pub(crate) fn subscribe(inner: &Arc<Mutex<Inner>>, event: Event, callbacks: Vec<Callback>) {
    if callbacks.is_empty() {
        return;
    }
    let immediate = {
        let mut guard = inner.lock().unwrap();
        match (guard.state, event) {
            (State::Pending, Event::Done) => {
                guard.done.extend(callbacks);
                None
            }
            (State::Pending, Event::Fail) => {
                guard.fail.extend(callbacks);
                None
            }
            (State::Pending, Event::Always) => {
                guard.always.extend(callbacks);
                None
            }
            (State::Pending, Event::Progress) => {
                guard.progress.extend(callbacks);
                None
            }
            (State::Fulfilled, Event::Done | Event::Always)
            | (State::Rejected, Event::Fail | Event::Always) => Some((
                guard.scheduler.clone(),
                guard.scope.clone(),
                guard.value.clone().unwrap_or(Value::Null),
                callbacks,
            )),
            // The event can never happen now; drop the callbacks.
            _ => None,
        }
    };
    if let Some((scheduler, scope, value, callbacks)) = immediate {
        deliver(&scheduler, scope, value, callbacks);
    }
}

pub(crate) fn state_of(inner: &Arc<Mutex<Inner>>) -> State {
    inner.lock().unwrap().state
}

pub(crate) fn scheduler_of(inner: &Arc<Mutex<Inner>>) -> Arc<dyn Schedule> {
    inner.lock().unwrap().scheduler.clone()
}

/// Poll support for the `Future` impl on [`Promise`]: `None` parks the
/// waker, `Some` carries the settled outcome.
pub(crate) fn poll_inner(inner: &Arc<Mutex<Inner>>, waker: &Waker) -> Option<Result<Value, Value>> {
    let mut guard = inner.lock().unwrap();
    match guard.state {
        State::Pending => {
            guard.wakers.push(waker.clone());
            None
        }
        State::Fulfilled => Some(Ok(guard.value.clone().unwrap_or(Value::Null))),
        State::Rejected => Some(Err(guard.value.clone().unwrap_or(Value::Null))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TurnQueue;

    #[test]
    fn test_raw_ops_respect_prior_settlement() {
        let queue = Arc::new(TurnQueue::new());
        let dfd = Deferred::new_on(queue.clone());
        dfd.do_resolve(Value::Int(1));
        dfd.do_reject(Value::Int(2));
        dfd.do_resolve(Value::Int(3));
        assert_eq!(dfd.state(), State::Fulfilled);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        dfd.done(move |_, v| log.lock().unwrap().push(v.clone()));
        queue.run_until_idle();
        assert_eq!(*seen.lock().unwrap(), vec![Value::Int(1)]);
    }

    #[test]
    fn test_notify_after_settlement_is_inert() {
        let queue = Arc::new(TurnQueue::new());
        let dfd = Deferred::new_on(queue.clone());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        dfd.progress(move |_, v| log.lock().unwrap().push(v.clone()));
        dfd.do_resolve(Value::Null);
        dfd.do_notify(Value::Int(9));
        queue.run_until_idle();
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_scope_persists_once_set() {
        let queue = Arc::new(TurnQueue::new());
        let dfd = Deferred::new_on(queue.clone());
        let seen = Arc::new(Mutex::new(None));
        let log = seen.clone();
        dfd.done(move |scope, _| *log.lock().unwrap() = scope.clone());
        dfd.notify_with("ctx", 1).resolve(2);
        queue.run_until_idle();
        assert_eq!(*seen.lock().unwrap(), Some(Value::from("ctx")));
    }
}
