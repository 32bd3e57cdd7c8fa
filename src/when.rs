use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::deferred::Deferred;
use crate::promise::Promise;
use crate::schedule::{NextTick, Schedule};
use crate::value::Value;

/// Ordered bookkeeping for one aggregate: results by input position plus the
/// two counters the settle rule runs on.
struct Board {
    results: Vec<Value>,
    resolved: usize,
    settled: usize,
}

/// [`when_on`] with the shared [`NextTick`] scheduler.
pub fn when<I>(items: I) -> Promise
where
    I: IntoIterator<Item = Value>,
{
    when_on(NextTick::global(), items)
}

/// Combine many inputs into one promise over their collected outcomes.
///
/// Any [`Value::List`] item is flattened one level into the input sequence
/// first. Each resulting item is then either promise-like (a
/// [`Value::Promise`]) or plain data:
///
/// * plain truthy: counts as settled and resolved right away;
/// * plain falsy: counts as settled only;
/// * promise-like: counted when it settles; fulfillment counts as both,
///   rejection as settled only. Each settlement also notifies the
///   aggregate's progress channel with a report map
///   (`index`, `action` of `"resolved"`/`"rejected"`, `value`, `resolved`,
///   `settled`), and the item's own progress is forwarded verbatim.
///
/// The first rule to hold wins: all `n` resolved fulfills the aggregate with
/// the ordered results; otherwise all `n` settled rejects it with the
/// ordered results collected so far (never-settled slots stay
/// [`Value::Null`]). The rule is checked synchronously after classification
/// too, so an all-plain input settles without waiting for a turn; zero items
/// fulfill with an empty list, while a non-empty all-falsy input rejects.
///
/// # Examples
///
/// ```
/// use std::sync::{Arc, Mutex};
/// use deferred_out::{when_on, Deferred, TurnQueue, Value};
///
/// let queue = Arc::new(TurnQueue::new());
/// let a = Deferred::new_on(queue.clone());
/// let b = Deferred::new_on(queue.clone());
///
/// let all = when_on(queue.clone(), [Value::from(&a), Value::from(&b)]);
/// a.resolve(1);
/// b.resolve(2);
/// queue.run_until_idle();
///
/// let seen = Arc::new(Mutex::new(None));
/// let log = seen.clone();
/// all.done(move |_, v| *log.lock().unwrap() = Some(v.clone()));
/// queue.run_until_idle();
/// assert_eq!(
///     *seen.lock().unwrap(),
///     Some(Value::List(vec![Value::Int(1), Value::Int(2)]))
/// );
/// ```
pub fn when_on<I>(scheduler: Arc<dyn Schedule>, items: I) -> Promise
where
    I: IntoIterator<Item = Value>,
{
    let mut flat = Vec::new();
    for item in items {
        match item {
            Value::List(xs) => flat.extend(xs),
            other => flat.push(other),
        }
    }

    let aggregate = Deferred::new_on(scheduler);
    let n = flat.len();
    if n == 0 {
        aggregate.resolve(Value::List(Vec::new()));
        return aggregate.promise();
    }

    let board = Arc::new(Mutex::new(Board {
        results: vec![Value::Null; n],
        resolved: 0,
        settled: 0,
    }));

    for (i, item) in flat.into_iter().enumerate() {
        match item {
            Value::Promise(source) => {
                let (b, agg) = (board.clone(), aggregate.clone());
                source.done(move |_, value| {
                    let (resolved, settled) = {
                        let mut board = b.lock().unwrap();
                        board.results[i] = value.clone();
                        board.resolved += 1;
                        board.settled += 1;
                        (board.resolved, board.settled)
                    };
                    agg.notify(progress_report(i, "resolved", value.clone(), resolved, settled));
                    settle_if_done(&b, &agg, n);
                });
                let (b, agg) = (board.clone(), aggregate.clone());
                source.fail(move |_, value| {
                    let (resolved, settled) = {
                        let mut board = b.lock().unwrap();
                        board.results[i] = value.clone();
                        board.settled += 1;
                        (board.resolved, board.settled)
                    };
                    agg.notify(progress_report(i, "rejected", value.clone(), resolved, settled));
                    settle_if_done(&b, &agg, n);
                });
                let agg = aggregate.clone();
                source.progress(move |_, value| {
                    agg.notify(value.clone());
                });
            }
            plain => {
                // Foreign thenables land here too: only promises from this
                // crate are watched, everything else is data, and data
                // counts by truthiness.
                let mut board = board.lock().unwrap();
                if plain.is_truthy() {
                    board.resolved += 1;
                }
                board.settled += 1;
                board.results[i] = plain;
            }
        }
    }

    settle_if_done(&board, &aggregate, n);
    aggregate.promise()
}

fn settle_if_done(board: &Arc<Mutex<Board>>, aggregate: &Deferred, n: usize) {
    let outcome = {
        let board = board.lock().unwrap();
        if board.resolved == n {
            Some((true, board.results.clone()))
        } else if board.settled == n {
            Some((false, board.results.clone()))
        } else {
            None
        }
    };
    match outcome {
        Some((true, results)) => {
            debug!(n, "aggregate fulfilled");
            aggregate.resolve(Value::List(results));
        }
        Some((false, results)) => {
            debug!(n, "aggregate rejected");
            aggregate.reject(Value::List(results));
        }
        None => {}
    }
}

fn progress_report(
    index: usize,
    action: &str,
    value: Value,
    resolved: usize,
    settled: usize,
) -> Value {
    let mut report = BTreeMap::new();
    report.insert("index".to_string(), Value::Int(index as i64));
    report.insert("action".to_string(), Value::from(action));
    report.insert("value".to_string(), value);
    report.insert("resolved".to_string(), Value::Int(resolved as i64));
    report.insert("settled".to_string(), Value::Int(settled as i64));
    Value::Map(report)
}

/// [`wrap_on`] with the shared [`NextTick`] scheduler.
pub fn wrap(candidate: impl Into<Value>) -> Promise {
    wrap_on(NextTick::global(), candidate)
}

/// Route any value through a fresh deferred's resolution rules and return
/// the promise: plain data is already fulfilled, a promise is adopted, a
/// thenable is assimilated.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use deferred_out::{wrap_on, State, TurnQueue};
///
/// let queue = Arc::new(TurnQueue::new());
/// let ready = wrap_on(queue, "plain data");
/// assert_eq!(ready.state(), State::Fulfilled);
/// ```
pub fn wrap_on(scheduler: Arc<dyn Schedule>, candidate: impl Into<Value>) -> Promise {
    let dfd = Deferred::new_on(scheduler);
    dfd.resolve(candidate);
    dfd.promise()
}
