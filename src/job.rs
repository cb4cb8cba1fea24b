//! Jobs and the dependency-counter protocol.
//!
//! A `Job` pairs a nullary procedure with an atomic *unfinished* counter and
//! a list of dependants. The counter starts at 1 (the job itself); every
//! job constructed with this one listed as a dependant bumps it by one more.
//! A job is executable exactly when the counter is back down to 1, and
//! finished once it reaches 0. Because the decrement in `finish` and the
//! follow-up notification of dependants are not a single atomic step, racing
//! readers may observe the counter transiently below zero; `is_finished`
//! therefore tests `<= 0` and nothing in the crate treats a negative value
//! as fatal.

use std::fmt;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::thread;

use smallvec::SmallVec;

use crate::unwind;

/// A named, nullary unit of work with back-references to the jobs that wait
/// on its completion.
///
/// Jobs are built dependants-first: a dependant must be constructed before
/// any of its prerequisites names it, which structurally rules out cycles.
/// The submitter owns every handle and must keep them alive until the pool
/// reports all-idle.
pub struct Job {
    func: Box<dyn Fn() + Send + Sync>,
    name: String,
    dependants: SmallVec<[Arc<Job>; 4]>,
    unfinished: AtomicI32,
}

impl Job {
    /// Creates a job with no dependants.
    pub fn new<F>(name: &str, func: F) -> Arc<Job>
    where
        F: Fn() + Send + Sync + 'static,
    {
        Job::with_dependants(name, func, &[])
    }

    /// Creates a job and registers it as a prerequisite of every job in
    /// `dependants`, bumping their unfinished counters. This is the only
    /// place information flows up the graph; completion flows back down
    /// through `finish`.
    pub fn with_dependants<F>(name: &str, func: F, dependants: &[Arc<Job>]) -> Arc<Job>
    where
        F: Fn() + Send + Sync + 'static,
    {
        for v in dependants {
            let now = v.unfinished.fetch_add(1, Ordering::SeqCst) + 1;
            trace!("[job] increment on {} by {}, now {}", v.name, name, now);
        }

        Arc::new(Job {
            func: Box::new(func),
            name: name.to_owned(),
            dependants: dependants.iter().cloned().collect(),
            unfinished: AtomicI32::new(1),
        })
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// True iff every prerequisite has finished, i.e. only the job's own
    /// count of 1 remains.
    #[inline]
    pub fn can_execute(&self) -> bool {
        self.unfinished.load(Ordering::SeqCst) == 1
    }

    /// True once the job has run and been accounted for. Tolerates the
    /// transiently negative values a racing reader may observe.
    #[inline]
    pub fn is_finished(&self) -> bool {
        self.unfinished.load(Ordering::SeqCst) <= 0
    }

    /// Current counter value, for diagnostics only.
    #[inline]
    pub fn unfinished(&self) -> i32 {
        self.unfinished.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn dependants(&self) -> &[Arc<Job>] {
        &self.dependants
    }

    #[inline]
    pub fn has_dependants(&self) -> bool {
        !self.dependants.is_empty()
    }

    /// Runs the procedure and then settles the counter protocol. The
    /// procedure's panic, if any, is captured and returned so dependants are
    /// notified either way and the worker thread survives.
    pub fn execute(&self) -> thread::Result<()> {
        let result = unwind::halt_unwinding(|| (self.func)());
        self.finish();
        result
    }

    /// One decrement for this job; if that was the last outstanding count,
    /// one decrement for each direct dependant. Dependants are not notified
    /// recursively: the chain advances only as they finish themselves.
    fn finish(&self) {
        let previous = self.unfinished.fetch_sub(1, Ordering::SeqCst);
        trace!("[job] decrement on {}, now {}", self.name, previous - 1);

        if previous == 1 && !self.dependants.is_empty() {
            for v in &self.dependants {
                v.unfinished.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Job")
            .field("name", &self.name)
            .field("unfinished", &self.unfinished())
            .field("dependants", &self.dependants.len())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn counter_starts_at_one_plus_prerequisites() {
        let rendering = Job::new("rendering", || {});
        assert_eq!(rendering.unfinished(), 1);
        assert!(rendering.can_execute());

        let _animation = Job::with_dependants("animation", || {}, &[rendering.clone()]);
        let _particles = Job::with_dependants("particles", || {}, &[rendering.clone()]);
        assert_eq!(rendering.unfinished(), 3);
        assert!(!rendering.can_execute());
        assert!(!rendering.is_finished());
    }

    #[test]
    fn finish_notifies_direct_dependants_only() {
        let c = Job::new("c", || {});
        let b = Job::with_dependants("b", || {}, &[c.clone()]);
        let a = Job::with_dependants("a", || {}, &[b.clone()]);

        assert_eq!(b.unfinished(), 2);
        assert_eq!(c.unfinished(), 2);

        a.execute().unwrap();
        assert!(a.is_finished());
        // b became executable, c must still be waiting on b itself.
        assert!(b.can_execute());
        assert_eq!(c.unfinished(), 2);

        b.execute().unwrap();
        assert!(b.is_finished());
        assert!(c.can_execute());
    }

    #[test]
    fn procedure_runs_and_finish_is_exactly_once_per_execute() {
        use std::sync::atomic::AtomicUsize;

        let runs = Arc::new(AtomicUsize::new(0));
        let job = {
            let runs = runs.clone();
            Job::new("counted", move || {
                runs.fetch_add(1, Ordering::SeqCst);
            })
        };

        job.execute().unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(job.unfinished(), 0);
    }

    #[test]
    fn transient_negative_counter_is_not_fatal() {
        let job = Job::new("noop", || {});
        job.execute().unwrap();
        // A second settle would be an invariant violation upstream, but the
        // accessors themselves must shrug it off.
        job.unfinished.fetch_sub(1, Ordering::SeqCst);
        assert!(job.is_finished());
        assert!(!job.can_execute());
    }

    #[test]
    fn panicking_procedure_still_finishes() {
        let sink = Job::new("sink", || {});
        let boom = Job::with_dependants("boom", || panic!("broken frame"), &[sink.clone()]);

        let result = boom.execute();
        assert!(result.is_err());
        assert!(boom.is_finished());
        assert!(sink.can_execute());
    }
}
