use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{mpsc, Arc, Mutex, OnceLock};
use std::thread;

use tracing::warn;

/// A unit of deferred work. Observer batches are boxed up into one of these
/// per delivery.
pub type Job = Box<dyn FnOnce() + Send>;

/// The turn scheduler a deferred delivers its callbacks through.
///
/// The contract is small but strict: jobs run on a later turn, never on the
/// caller's stack, and jobs deferred in sequence run in FIFO order. Every
/// asynchronous guarantee in this crate reduces to those two rules.
pub trait Schedule: Send + Sync {
    /// Queue `job` to run on a later turn.
    fn defer(&self, job: Job);
}

/// A hand-pumped FIFO turn queue.
///
/// Nothing runs until [`run_until_idle`](TurnQueue::run_until_idle) is
/// called, which makes delivery order fully deterministic. Tests and
/// examples pump it explicitly; embedders with their own event loop can
/// drain it once per tick.
///
/// # Examples
///
/// ```
/// use std::sync::{Arc, Mutex};
/// use deferred_out::{Schedule, TurnQueue};
///
/// let queue = TurnQueue::new();
/// let hits = Arc::new(Mutex::new(Vec::new()));
/// for i in 0..3 {
///     let hits = hits.clone();
///     queue.defer(Box::new(move || hits.lock().unwrap().push(i)));
/// }
/// assert_eq!(queue.run_until_idle(), 3);
/// assert_eq!(*hits.lock().unwrap(), vec![0, 1, 2]);
/// ```
#[derive(Clone)]
pub struct TurnQueue {
    jobs: Arc<Mutex<VecDeque<Job>>>,
}

impl TurnQueue {
    pub fn new() -> Self {
        TurnQueue {
            jobs: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// Number of jobs currently queued.
    pub fn len(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run queued jobs until none remain, including jobs queued by the jobs
    /// themselves. Returns how many ran. The queue lock is not held while a
    /// job runs, so jobs may freely defer more work.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        loop {
            let job = self.jobs.lock().unwrap().pop_front();
            match job {
                Some(job) => {
                    job();
                    ran += 1;
                }
                None => return ran,
            }
        }
    }
}

impl Default for TurnQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Schedule for TurnQueue {
    fn defer(&self, job: Job) {
        self.jobs.lock().unwrap().push_back(job);
    }
}

/// The default scheduler: a process-wide dispatcher thread fed over a
/// channel, so deferred jobs run "next tick" without anyone pumping.
///
/// [`Deferred::new`](crate::Deferred::new), [`when`](crate::when) and
/// [`wrap`](crate::wrap) all use [`NextTick::global`]. The thread is spawned
/// lazily on first use and runs for the life of the process; a panicking job
/// is caught and logged so one bad observer cannot stop delivery for
/// everyone else.
pub struct NextTick {
    tx: Mutex<mpsc::Sender<Job>>,
}

impl NextTick {
    /// The shared dispatcher handle.
    pub fn global() -> Arc<NextTick> {
        static GLOBAL: OnceLock<Arc<NextTick>> = OnceLock::new();
        GLOBAL.get_or_init(NextTick::spawn).clone()
    }

    fn spawn() -> Arc<NextTick> {
        let (tx, rx) = mpsc::channel::<Job>();
        thread::Builder::new()
            .name("deferred-out-tick".into())
            .spawn(move || {
                for job in rx {
                    if catch_unwind(AssertUnwindSafe(job)).is_err() {
                        warn!("a scheduled job panicked; the dispatcher keeps running");
                    }
                }
            })
            .expect("failed to spawn the tick dispatcher thread");
        Arc::new(NextTick { tx: Mutex::new(tx) })
    }
}

impl Schedule for NextTick {
    fn defer(&self, job: Job) {
        // The receiver lives in a thread that never exits, so this only
        // fails during process teardown.
        if self.tx.lock().unwrap().send(job).is_err() {
            warn!("tick dispatcher is gone; dropping a scheduled job");
        }
    }
}
