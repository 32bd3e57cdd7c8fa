use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::deferred::Deferred;
use crate::error::Error;
use crate::promise::Promise;
use crate::thenable::{ThenFn, Thenable};
use crate::value::Value;

/// What the settle caller asked for, before classification has its say.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Intent {
    Fulfill,
    Reject,
}

/// Classification of a settle candidate. [`classify`] is the only place in
/// the crate that inspects payload structure; everything downstream matches
/// on this instead.
enum Resolution {
    /// The candidate is the target's own view; settling with it could never
    /// complete.
    SelfReference,
    /// A promise minted by this crate: follow its actual outcome.
    Adopt(Promise),
    /// A foreign thenable: trust its `then` exactly once.
    Assimilate(Arc<dyn Thenable>),
    /// Plain data: settle with it per the caller's intent.
    Direct(Value),
}

/// Entry point for `resolve`/`reject` once the pending check has passed.
pub(crate) fn dispatch(target: &Deferred, candidate: Value, intent: Intent) {
    match classify(target, candidate) {
        Resolution::SelfReference => {
            warn!("deferred settled with its own promise; rejecting");
            target.do_reject(Value::Error(Error::SelfResolution));
        }
        Resolution::Adopt(source) => adopt(target, source),
        Resolution::Assimilate(handle) => assimilate(target, handle, intent),
        Resolution::Direct(value) => settle_direct(target, value, intent),
    }
}

fn classify(target: &Deferred, candidate: Value) -> Resolution {
    match candidate {
        Value::Promise(view) if target.is_own_view(&view) => Resolution::SelfReference,
        Value::Promise(view) => Resolution::Adopt(view),
        Value::Thenable(handle) => Resolution::Assimilate(handle),
        other => Resolution::Direct(other),
    }
}

fn settle_direct(target: &Deferred, value: Value, intent: Intent) {
    match intent {
        Intent::Fulfill => target.do_resolve(value),
        Intent::Reject => target.do_reject(value),
    }
}

/// Forward the source's actual outcome into the target. Intent plays no part
/// here: rejecting with a promise that later fulfills still fulfills the
/// target.
fn adopt(target: &Deferred, source: Promise) {
    debug!("adopting another promise's outcome");
    let t = target.clone();
    source.done(move |_, value| t.do_resolve(value.clone()));
    let t = target.clone();
    source.fail(move |_, value| t.do_reject(value.clone()));
    let t = target.clone();
    source.progress(move |_, value| t.do_notify(value.clone()));
}

/// Read the candidate's `then`; if it is invocable, wire a relay deferred
/// into the target and hand the thenable a fulfill-once/reject-once/
/// notify-many triple. The relay runs incoming values back through the full
/// resolution rules, so a thenable may legitimately fulfill with yet another
/// promise or thenable.
fn assimilate(target: &Deferred, handle: Arc<dyn Thenable>, intent: Intent) {
    match handle.read_then() {
        Err(thrown) => target.do_reject(thrown),
        Ok(false) => settle_direct(target, Value::Thenable(handle), intent),
        Ok(true) => {
            debug!("assimilating a foreign thenable");
            let relay = Deferred::new_on(target.scheduler());
            let t = target.clone();
            relay.done(move |_, value| t.do_resolve(value.clone()));
            let t = target.clone();
            relay.fail(move |_, value| t.do_reject(value.clone()));
            let t = target.clone();
            relay.progress(move |_, value| t.do_notify(value.clone()));

            // One flag across both resolvers: whichever fires first wins,
            // every later call is ignored.
            let fired = Arc::new(AtomicBool::new(false));
            let fulfill: ThenFn = {
                let relay = relay.clone();
                let fired = fired.clone();
                Box::new(move |value| {
                    if !fired.swap(true, Ordering::SeqCst) {
                        relay.resolve(value);
                    }
                })
            };
            let reject: ThenFn = {
                let relay = relay.clone();
                let fired = fired.clone();
                Box::new(move |value| {
                    if !fired.swap(true, Ordering::SeqCst) {
                        relay.reject(value);
                    }
                })
            };
            let notify: ThenFn = {
                let relay = relay.clone();
                Box::new(move |value| {
                    relay.notify(value);
                })
            };
            if let Err(thrown) = handle.call_then(fulfill, reject, notify) {
                if !fired.load(Ordering::SeqCst) {
                    target.do_reject(thrown);
                }
            }
        }
    }
}
