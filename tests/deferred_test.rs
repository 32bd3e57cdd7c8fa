mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use std::thread;

    use deferred_out::{
        callback, filter, Deferred, Error, Event, Scope, State, Thenable, ThenFn, TurnQueue,
        Value,
    };
    use futures::executor::block_on;

    fn record(log: &Arc<Mutex<Vec<Value>>>) -> impl Fn(&Scope, &Value) + Send + Sync + 'static {
        let log = log.clone();
        move |_, value| log.lock().unwrap().push(value.clone())
    }

    fn mark(
        log: &Arc<Mutex<Vec<&'static str>>>,
        tag: &'static str,
    ) -> impl Fn(&Scope, &Value) + Send + Sync + 'static {
        let log = log.clone();
        move |_, _| log.lock().unwrap().push(tag)
    }

    #[test]
    fn test_before_start_runs_with_the_fresh_deferred() {
        let hit = Arc::new(AtomicBool::new(false));
        let flag = hit.clone();
        let dfd = Deferred::new_with(move |d| {
            flag.store(true, Ordering::SeqCst);
            d.resolve("early");
        });
        assert!(hit.load(Ordering::SeqCst));
        assert_eq!(dfd.state(), State::Fulfilled);
    }

    #[test]
    fn test_state_tracks_settlement() {
        let queue = Arc::new(TurnQueue::new());

        let dfd = Deferred::new_on(queue.clone());
        assert_eq!(dfd.state(), State::Pending);
        assert_eq!(dfd.promise().state(), State::Pending);
        dfd.reject(());
        assert_eq!(dfd.state(), State::Rejected);

        let dfd = Deferred::new_on(queue);
        dfd.resolve(());
        assert_eq!(dfd.promise().state(), State::Fulfilled);
    }

    #[test]
    fn test_promise_returns_the_same_view_identity() {
        let queue = Arc::new(TurnQueue::new());
        let dfd = Deferred::new_on(queue.clone());
        let other = Deferred::new_on(queue);
        assert_eq!(dfd.promise(), dfd.promise());
        assert_ne!(dfd.promise(), other.promise());
    }

    #[test]
    fn test_resolve_runs_done_then_always_in_one_turn() {
        let queue = Arc::new(TurnQueue::new());
        let dfd = Deferred::new_on(queue.clone());
        let promise = dfd.promise();

        let order = Arc::new(Mutex::new(Vec::new()));
        promise
            .done(mark(&order, "done"))
            .always(mark(&order, "always"));
        promise.fail(mark(&order, "fail"));

        dfd.resolve("v");
        assert_eq!(queue.run_until_idle(), 1);
        assert_eq!(*order.lock().unwrap(), vec!["done", "always"]);
    }

    #[test]
    fn test_reject_runs_fail_then_always_in_one_turn() {
        let queue = Arc::new(TurnQueue::new());
        let dfd = Deferred::new_on(queue.clone());
        let promise = dfd.promise();

        let order = Arc::new(Mutex::new(Vec::new()));
        promise
            .fail(mark(&order, "fail"))
            .always(mark(&order, "always"));
        promise.done(mark(&order, "done"));

        dfd.reject("e");
        assert_eq!(queue.run_until_idle(), 1);
        assert_eq!(*order.lock().unwrap(), vec!["fail", "always"]);
    }

    #[test]
    fn test_callback_lists_accept_batches_in_order() {
        let queue = Arc::new(TurnQueue::new());
        let dfd = Deferred::new_on(queue.clone());

        let order = Arc::new(Mutex::new(Vec::new()));
        let (a, b, c) = (order.clone(), order.clone(), order.clone());
        dfd.subscribe(
            Event::Done,
            vec![
                callback(move |_, _| a.lock().unwrap().push(1)),
                callback(move |_, _| b.lock().unwrap().push(2)),
            ],
        );
        dfd.subscribe(
            Event::Always,
            vec![callback(move |_, _| c.lock().unwrap().push(3))],
        );

        dfd.resolve(());
        assert_eq!(queue.run_until_idle(), 1);
        assert_eq!(*order.lock().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_scope_defaults_to_none() {
        let queue = Arc::new(TurnQueue::new());
        let dfd = Deferred::new_on(queue.clone());

        let scopes = Arc::new(Mutex::new(Vec::new()));
        let log = scopes.clone();
        dfd.done(move |scope, _| log.lock().unwrap().push(scope.clone()));

        dfd.resolve(1);
        queue.run_until_idle();
        assert_eq!(*scopes.lock().unwrap(), vec![None]);
    }

    #[test]
    fn test_resolve_with_binds_the_callback_scope() {
        let queue = Arc::new(TurnQueue::new());
        let dfd = Deferred::new_on(queue.clone());

        let scopes = Arc::new(Mutex::new(Vec::new()));
        let (d, a) = (scopes.clone(), scopes.clone());
        dfd.done(move |scope, _| d.lock().unwrap().push(scope.clone()))
            .always(move |scope, _| a.lock().unwrap().push(scope.clone()));

        dfd.resolve_with("ctx", 1);
        queue.run_until_idle();
        assert_eq!(
            *scopes.lock().unwrap(),
            vec![Some(Value::from("ctx")), Some(Value::from("ctx"))]
        );
    }

    #[test]
    fn test_reject_with_binds_the_callback_scope() {
        let queue = Arc::new(TurnQueue::new());
        let dfd = Deferred::new_on(queue.clone());

        let scopes = Arc::new(Mutex::new(Vec::new()));
        let (f, a) = (scopes.clone(), scopes.clone());
        dfd.fail(move |scope, _| f.lock().unwrap().push(scope.clone()))
            .always(move |scope, _| a.lock().unwrap().push(scope.clone()));

        dfd.reject_with("ctx", "e");
        queue.run_until_idle();
        assert_eq!(
            *scopes.lock().unwrap(),
            vec![Some(Value::from("ctx")), Some(Value::from("ctx"))]
        );
    }

    #[test]
    fn test_settlement_is_first_write_wins() {
        let queue = Arc::new(TurnQueue::new());

        let dfd = Deferred::new_on(queue.clone());
        let order = Arc::new(Mutex::new(Vec::new()));
        dfd.done(mark(&order, "done")).fail(mark(&order, "fail"));
        dfd.resolve(1).reject(2).resolve(3);
        assert_eq!(dfd.state(), State::Fulfilled);
        queue.run_until_idle();
        assert_eq!(*order.lock().unwrap(), vec!["done"]);

        let dfd = Deferred::new_on(queue.clone());
        let order = Arc::new(Mutex::new(Vec::new()));
        dfd.done(mark(&order, "done")).fail(mark(&order, "fail"));
        dfd.reject(1).resolve(2).reject(3);
        assert_eq!(dfd.state(), State::Rejected);
        queue.run_until_idle();
        assert_eq!(*order.lock().unwrap(), vec!["fail"]);
    }

    #[test]
    fn test_delivery_is_never_synchronous() {
        let queue = Arc::new(TurnQueue::new());
        let dfd = Deferred::new_on(queue.clone());

        let seen = Arc::new(Mutex::new(Vec::new()));
        dfd.done(record(&seen));

        dfd.resolve(1);
        assert_eq!(dfd.state(), State::Fulfilled);
        assert!(seen.lock().unwrap().is_empty());
        queue.run_until_idle();
        assert_eq!(*seen.lock().unwrap(), vec![Value::Int(1)]);
    }

    #[test]
    fn test_late_subscription_is_scheduled_not_inline() {
        let queue = Arc::new(TurnQueue::new());
        let dfd = Deferred::new_on(queue.clone());
        dfd.resolve("done");
        queue.run_until_idle();

        let seen = Arc::new(Mutex::new(Vec::new()));
        dfd.done(record(&seen))
            .fail(record(&seen))
            .progress(record(&seen));
        assert!(seen.lock().unwrap().is_empty());
        queue.run_until_idle();
        assert_eq!(*seen.lock().unwrap(), vec![Value::from("done")]);
    }

    #[test]
    fn test_notify_repeats_and_stops_at_settlement() {
        let queue = Arc::new(TurnQueue::new());
        let dfd = Deferred::new_on(queue.clone());

        let seen = Arc::new(Mutex::new(Vec::new()));
        dfd.progress(record(&seen));
        dfd.notify(1).notify(2).notify(3);
        queue.run_until_idle();
        assert_eq!(
            *seen.lock().unwrap(),
            vec![Value::Int(1), Value::Int(2), Value::Int(3)]
        );

        dfd.resolve("settled");
        dfd.notify(4);
        queue.run_until_idle();
        assert_eq!(seen.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_notify_delivers_to_the_list_as_of_the_call() {
        let queue = Arc::new(TurnQueue::new());
        let dfd = Deferred::new_on(queue.clone());

        let first = Arc::new(Mutex::new(Vec::new()));
        let second = Arc::new(Mutex::new(Vec::new()));
        dfd.progress(record(&first));
        dfd.notify(1);
        dfd.progress(record(&second));
        dfd.notify(2);
        queue.run_until_idle();

        assert_eq!(*first.lock().unwrap(), vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(*second.lock().unwrap(), vec![Value::Int(2)]);
    }

    #[test]
    fn test_notify_with_binds_the_callback_scope() {
        let queue = Arc::new(TurnQueue::new());
        let dfd = Deferred::new_on(queue.clone());

        let scopes = Arc::new(Mutex::new(Vec::new()));
        let log = scopes.clone();
        dfd.progress(move |scope, _| log.lock().unwrap().push(scope.clone()));

        dfd.notify_with("ctx", 1);
        queue.run_until_idle();
        assert_eq!(*scopes.lock().unwrap(), vec![Some(Value::from("ctx"))]);
    }

    #[test]
    fn test_self_resolution_rejects() {
        let queue = Arc::new(TurnQueue::new());
        let dfd = Deferred::new_on(queue.clone());

        let seen = Arc::new(Mutex::new(Vec::new()));
        dfd.fail(record(&seen));

        dfd.resolve(dfd.promise());
        assert_eq!(dfd.state(), State::Rejected);
        queue.run_until_idle();
        assert_eq!(
            *seen.lock().unwrap(),
            vec![Value::Error(Error::SelfResolution)]
        );
    }

    #[test]
    fn test_self_rejection_rejects_with_the_marker_error_too() {
        let queue = Arc::new(TurnQueue::new());
        let dfd = Deferred::new_on(queue.clone());

        let seen = Arc::new(Mutex::new(Vec::new()));
        dfd.fail(record(&seen));

        dfd.reject(dfd.promise());
        assert_eq!(dfd.state(), State::Rejected);
        queue.run_until_idle();
        assert_eq!(
            *seen.lock().unwrap(),
            vec![Value::Error(Error::SelfResolution)]
        );
    }

    #[test]
    fn test_resolving_with_a_promise_adopts_its_outcome() {
        let queue = Arc::new(TurnQueue::new());
        let a = Deferred::new_on(queue.clone());
        let b = Deferred::new_on(queue.clone());

        let seen = Arc::new(Mutex::new(Vec::new()));
        a.done(record(&seen));

        a.resolve(b.promise());
        assert_eq!(a.state(), State::Pending);

        b.resolve(7);
        queue.run_until_idle();
        assert_eq!(a.state(), State::Fulfilled);
        assert_eq!(*seen.lock().unwrap(), vec![Value::Int(7)]);
    }

    #[test]
    fn test_rejecting_with_a_promise_still_follows_its_outcome() {
        let queue = Arc::new(TurnQueue::new());
        let a = Deferred::new_on(queue.clone());
        let b = Deferred::new_on(queue.clone());

        let order = Arc::new(Mutex::new(Vec::new()));
        a.done(mark(&order, "done")).fail(mark(&order, "fail"));

        a.reject(b.promise());
        assert_eq!(a.state(), State::Pending);

        b.resolve(7);
        queue.run_until_idle();
        assert_eq!(a.state(), State::Fulfilled);
        assert_eq!(*order.lock().unwrap(), vec!["done"]);
    }

    #[test]
    fn test_adoption_rejects_when_the_source_rejects() {
        let queue = Arc::new(TurnQueue::new());
        let a = Deferred::new_on(queue.clone());
        let b = Deferred::new_on(queue.clone());

        let seen = Arc::new(Mutex::new(Vec::new()));
        a.fail(record(&seen));

        a.resolve(b.promise());
        b.reject("broken");
        queue.run_until_idle();
        assert_eq!(a.state(), State::Rejected);
        assert_eq!(*seen.lock().unwrap(), vec![Value::from("broken")]);
    }

    #[test]
    fn test_adoption_forwards_progress() {
        let queue = Arc::new(TurnQueue::new());
        let a = Deferred::new_on(queue.clone());
        let b = Deferred::new_on(queue.clone());

        let seen = Arc::new(Mutex::new(Vec::new()));
        a.progress(record(&seen));

        a.resolve(b.promise());
        b.notify(1).notify(2);
        queue.run_until_idle();
        assert_eq!(*seen.lock().unwrap(), vec![Value::Int(1), Value::Int(2)]);
    }

    struct Overeager;

    impl Thenable for Overeager {
        fn call_then(&self, fulfill: ThenFn, reject: ThenFn, _notify: ThenFn) -> Result<(), Value> {
            fulfill(Value::Int(1));
            reject(Value::from("late reject"));
            fulfill(Value::Int(3));
            Ok(())
        }
    }

    struct ReadThrows;

    impl Thenable for ReadThrows {
        fn read_then(&self) -> Result<bool, Value> {
            Err(Value::from("read boom"))
        }

        fn call_then(&self, _f: ThenFn, _r: ThenFn, _n: ThenFn) -> Result<(), Value> {
            unreachable!("read_then already failed")
        }
    }

    struct NotCallable;

    impl Thenable for NotCallable {
        fn read_then(&self) -> Result<bool, Value> {
            Ok(false)
        }

        fn call_then(&self, _f: ThenFn, _r: ThenFn, _n: ThenFn) -> Result<(), Value> {
            unreachable!("not invocable")
        }
    }

    struct InvokeThrows;

    impl Thenable for InvokeThrows {
        fn call_then(&self, _f: ThenFn, _r: ThenFn, _n: ThenFn) -> Result<(), Value> {
            Err(Value::from("invoke boom"))
        }
    }

    struct ThrowsAfterFulfill;

    impl Thenable for ThrowsAfterFulfill {
        fn call_then(&self, fulfill: ThenFn, _r: ThenFn, _n: ThenFn) -> Result<(), Value> {
            fulfill(Value::Int(5));
            Err(Value::from("too late to matter"))
        }
    }

    struct Chatty;

    impl Thenable for Chatty {
        fn call_then(&self, fulfill: ThenFn, _r: ThenFn, notify: ThenFn) -> Result<(), Value> {
            notify(Value::Int(1));
            notify(Value::Int(2));
            fulfill(Value::from("done"));
            Ok(())
        }
    }

    #[test]
    fn test_thenable_first_resolver_call_wins() {
        let queue = Arc::new(TurnQueue::new());
        let dfd = Deferred::new_on(queue.clone());

        let fulfilled = Arc::new(Mutex::new(Vec::new()));
        let rejected = Arc::new(Mutex::new(Vec::new()));
        dfd.done(record(&fulfilled)).fail(record(&rejected));

        dfd.resolve(Value::Thenable(Arc::new(Overeager)));
        queue.run_until_idle();
        assert_eq!(dfd.state(), State::Fulfilled);
        assert_eq!(*fulfilled.lock().unwrap(), vec![Value::Int(1)]);
        assert!(rejected.lock().unwrap().is_empty());
    }

    #[test]
    fn test_thenable_read_error_rejects() {
        let queue = Arc::new(TurnQueue::new());
        let dfd = Deferred::new_on(queue.clone());

        let seen = Arc::new(Mutex::new(Vec::new()));
        dfd.fail(record(&seen));

        dfd.resolve(Value::Thenable(Arc::new(ReadThrows)));
        assert_eq!(dfd.state(), State::Rejected);
        queue.run_until_idle();
        assert_eq!(*seen.lock().unwrap(), vec![Value::from("read boom")]);
    }

    #[test]
    fn test_thenable_invoke_error_rejects_if_nothing_fired() {
        let queue = Arc::new(TurnQueue::new());
        let dfd = Deferred::new_on(queue.clone());

        let seen = Arc::new(Mutex::new(Vec::new()));
        dfd.fail(record(&seen));

        dfd.resolve(Value::Thenable(Arc::new(InvokeThrows)));
        assert_eq!(dfd.state(), State::Rejected);
        queue.run_until_idle();
        assert_eq!(*seen.lock().unwrap(), vec![Value::from("invoke boom")]);
    }

    #[test]
    fn test_thenable_invoke_error_is_ignored_after_a_resolver_fired() {
        let queue = Arc::new(TurnQueue::new());
        let dfd = Deferred::new_on(queue.clone());

        let seen = Arc::new(Mutex::new(Vec::new()));
        dfd.done(record(&seen));

        dfd.resolve(Value::Thenable(Arc::new(ThrowsAfterFulfill)));
        queue.run_until_idle();
        assert_eq!(dfd.state(), State::Fulfilled);
        assert_eq!(*seen.lock().unwrap(), vec![Value::Int(5)]);
    }

    #[test]
    fn test_thenable_without_invocable_then_is_plain_data() {
        let queue = Arc::new(TurnQueue::new());
        let handle: Arc<dyn Thenable> = Arc::new(NotCallable);

        let dfd = Deferred::new_on(queue.clone());
        let seen = Arc::new(Mutex::new(Vec::new()));
        dfd.done(record(&seen));
        dfd.resolve(Value::Thenable(handle.clone()));
        assert_eq!(dfd.state(), State::Fulfilled);
        queue.run_until_idle();
        assert_eq!(*seen.lock().unwrap(), vec![Value::Thenable(handle)]);

        let dfd = Deferred::new_on(queue.clone());
        dfd.reject(Value::Thenable(Arc::new(NotCallable)));
        assert_eq!(dfd.state(), State::Rejected);
    }

    #[test]
    fn test_thenable_progress_flows_through() {
        let queue = Arc::new(TurnQueue::new());
        let dfd = Deferred::new_on(queue.clone());

        let progress = Arc::new(Mutex::new(Vec::new()));
        let fulfilled = Arc::new(Mutex::new(Vec::new()));
        dfd.progress(record(&progress)).done(record(&fulfilled));

        dfd.resolve(Value::Thenable(Arc::new(Chatty)));
        queue.run_until_idle();
        assert_eq!(*progress.lock().unwrap(), vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(*fulfilled.lock().unwrap(), vec![Value::from("done")]);
    }

    #[test]
    fn test_then_handled_rejection_becomes_fulfillment() {
        let queue = Arc::new(TurnQueue::new());
        let dfd = Deferred::new_on(queue.clone());

        let recovered = dfd
            .promise()
            .then(None, Some(filter(|_| Ok(Value::Int(42)))), None);
        let seen = Arc::new(Mutex::new(Vec::new()));
        recovered.done(record(&seen));

        dfd.reject("err");
        queue.run_until_idle();
        assert_eq!(recovered.state(), State::Fulfilled);
        assert_eq!(*seen.lock().unwrap(), vec![Value::Int(42)]);
    }

    #[test]
    fn test_then_absent_filters_pass_events_through() {
        let queue = Arc::new(TurnQueue::new());

        let dfd = Deferred::new_on(queue.clone());
        let fwd = dfd.promise().then(None, None, None);
        let progress = Arc::new(Mutex::new(Vec::new()));
        let fulfilled = Arc::new(Mutex::new(Vec::new()));
        fwd.progress(record(&progress)).done(record(&fulfilled));
        dfd.notify(1);
        dfd.resolve("v");
        queue.run_until_idle();
        assert_eq!(*progress.lock().unwrap(), vec![Value::Int(1)]);
        assert_eq!(*fulfilled.lock().unwrap(), vec![Value::from("v")]);

        let dfd = Deferred::new_on(queue.clone());
        let fwd = dfd.promise().then(None, None, None);
        let rejected = Arc::new(Mutex::new(Vec::new()));
        fwd.fail(record(&rejected));
        dfd.reject("reason");
        queue.run_until_idle();
        assert_eq!(fwd.state(), State::Rejected);
        assert_eq!(*rejected.lock().unwrap(), vec![Value::from("reason")]);
    }

    #[test]
    fn test_then_filter_error_rejects_only_the_derived_promise() {
        let queue = Arc::new(TurnQueue::new());
        let dfd = Deferred::new_on(queue.clone());

        let derived = dfd
            .promise()
            .then(Some(filter(|_| Err(Value::from("filter boom")))), None, None);
        let seen = Arc::new(Mutex::new(Vec::new()));
        derived.fail(record(&seen));

        dfd.resolve(1);
        queue.run_until_idle();
        assert_eq!(dfd.state(), State::Fulfilled);
        assert_eq!(derived.state(), State::Rejected);
        assert_eq!(*seen.lock().unwrap(), vec![Value::from("filter boom")]);
    }

    #[test]
    fn test_then_progress_filter_feeds_the_derived_notify_channel() {
        let queue = Arc::new(TurnQueue::new());
        let dfd = Deferred::new_on(queue.clone());

        let derived = dfd.promise().then(
            None,
            None,
            Some(filter(|v| Ok(Value::Int(v.as_i64().unwrap_or(0) * 10)))),
        );
        let seen = Arc::new(Mutex::new(Vec::new()));
        derived.progress(record(&seen));

        dfd.notify(3);
        queue.run_until_idle();
        assert_eq!(*seen.lock().unwrap(), vec![Value::Int(30)]);
    }

    #[test]
    fn test_then_filter_returning_a_promise_chains_into_it() {
        let queue = Arc::new(TurnQueue::new());
        let dfd = Deferred::new_on(queue.clone());
        let inner = Deferred::new_on(queue.clone());

        let inner_view = inner.promise();
        let derived = dfd.promise().then(
            Some(filter(move |_| Ok(Value::Promise(inner_view.clone())))),
            None,
            None,
        );
        let seen = Arc::new(Mutex::new(Vec::new()));
        derived.done(record(&seen));

        dfd.resolve(1);
        queue.run_until_idle();
        assert_eq!(derived.state(), State::Pending);

        inner.resolve(9);
        queue.run_until_idle();
        assert_eq!(derived.state(), State::Fulfilled);
        assert_eq!(*seen.lock().unwrap(), vec![Value::Int(9)]);
    }

    #[test]
    fn test_await_resolution_from_another_thread() {
        let dfd = Deferred::new();
        let promise = dfd.promise();
        let task = thread::spawn(move || {
            dfd.resolve("shipped");
        });
        assert_eq!(block_on(promise), Ok(Value::from("shipped")));
        task.join().expect("The task thread has panicked");
    }

    #[test]
    fn test_await_rejection_from_another_thread() {
        let dfd = Deferred::new();
        let promise = dfd.promise();
        let task = thread::spawn(move || {
            dfd.reject("sank");
        });
        assert_eq!(block_on(promise), Err(Value::from("sank")));
        task.join().expect("The task thread has panicked");
    }

    #[test]
    fn test_every_waiting_clone_wakes() {
        let dfd = Deferred::new();
        let (p1, p2) = (dfd.promise(), dfd.promise());
        let task1 = thread::spawn(move || block_on(p1));
        let task2 = thread::spawn(move || block_on(p2));
        dfd.resolve(11);
        assert_eq!(
            task1.join().expect("The task1 thread has panicked"),
            Ok(Value::Int(11))
        );
        assert_eq!(
            task2.join().expect("The task2 thread has panicked"),
            Ok(Value::Int(11))
        );
    }
}
