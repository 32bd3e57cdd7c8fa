use crate::Value;

/// Resolver callback handed to [`Thenable::call_then`].
///
/// A thenable may call it inline or stash it and call it on a later turn.
/// Calling it repeatedly is allowed; the machinery ignores everything after
/// the first effective fulfill/reject.
pub type ThenFn = Box<dyn Fn(Value) + Send + Sync>;

/// A foreign promise-like object: any structured value carrying a `then`.
///
/// When a [`Value::Thenable`] reaches a settle call it is *assimilated*: the
/// member is read once, and if it is invocable it is trusted exactly once with
/// a `(fulfill, reject, notify)` triple. The eventual outcome of the consuming
/// deferred is whatever the thenable does with that triple.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use deferred_out::{Deferred, State, Thenable, ThenFn, TurnQueue, Value};
///
/// struct Immediate(i64);
///
/// impl Thenable for Immediate {
///     fn call_then(&self, fulfill: ThenFn, _reject: ThenFn, _notify: ThenFn)
///         -> Result<(), Value>
///     {
///         fulfill(Value::Int(self.0));
///         Ok(())
///     }
/// }
///
/// let queue = Arc::new(TurnQueue::new());
/// let dfd = Deferred::new_on(queue.clone());
/// dfd.resolve(Value::Thenable(Arc::new(Immediate(7))));
/// queue.run_until_idle();
/// assert_eq!(dfd.state(), State::Fulfilled);
/// ```
pub trait Thenable: Send + Sync {
    /// Mirrors reading the `then` member off a foreign object.
    ///
    /// * `Ok(true)`: the member is invocable; [`call_then`](Self::call_then)
    ///   follows.
    /// * `Ok(false)`: no invocable member; the value settles as plain data
    ///   under the caller's original intent.
    /// * `Err(reason)`: the read itself threw; the consuming deferred
    ///   rejects with `reason`.
    fn read_then(&self) -> Result<bool, Value> {
        Ok(true)
    }

    /// Invoke the `then` member with the resolver triple.
    ///
    /// Only the first `fulfill`/`reject` call takes effect; `notify` may be
    /// called any number of times before that. Returning `Err(reason)` models
    /// a synchronous throw: if neither resolver has fired the consuming
    /// deferred rejects with `reason`, otherwise the error is dropped.
    fn call_then(&self, fulfill: ThenFn, reject: ThenFn, notify: ThenFn) -> Result<(), Value>;
}
