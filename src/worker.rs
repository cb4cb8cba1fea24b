//! Worker threads and the take-own / steal / sleep run loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use rand::rngs::SmallRng;
use rand::{FromEntropy, RngCore};

use crate::deque::JobDeque;
use crate::job::Job;
use crate::latch::LockLatch;
use crate::pool::{Inner, VictimRng};

/// One worker: a stable id, its deque, the run/executing flags and the
/// condition it sleeps on while no executable work is visible.
pub(crate) struct Worker {
    id: u32,
    pub(crate) deque: Box<dyn JobDeque>,
    running: AtomicBool,
    job_running: AtomicBool,
    sleep: Signal,
    pub(crate) primed: LockLatch,
}

impl Worker {
    pub fn new(id: u32, deque: Box<dyn JobDeque>) -> Self {
        Worker {
            id,
            deque,
            running: AtomicBool::new(true),
            job_running: AtomicBool::new(false),
            sleep: Signal::new(),
            primed: LockLatch::new(),
        }
    }

    /// Queues a job at the private end and nudges the worker awake. Called
    /// by the pool's submitter thread.
    pub fn add_job(&self, job: Arc<Job>) {
        debug!("[worker {}] queued job {}", self.id, job.name());
        self.deque.push_private(job);

        let _guard = self.sleep.lock.lock().unwrap();
        self.sleep.cvar.notify_one();
    }

    /// Deque drained and nothing mid-execution.
    pub fn all_jobs_finished(&self) -> bool {
        self.deque.is_empty() && !self.job_running.load(Ordering::SeqCst)
    }

    /// Notifies the worker iff its deque holds an executable job. Returns
    /// whether a notification was sent, so the pool's fan-out can stop at
    /// the first success.
    pub fn wake_up(&self) -> bool {
        if self.deque.has_executable() {
            let _guard = self.sleep.lock.lock().unwrap();
            self.sleep.cvar.notify_one();
            return true;
        }
        false
    }

    pub fn begin_shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn notify_all(&self) {
        let _guard = self.sleep.lock.lock().unwrap();
        self.sleep.cvar.notify_all();
    }

    /// Blocks until the deque holds an executable job or shutdown is
    /// requested. The predicate is re-checked under the sleep mutex, so a
    /// notification between the check and the wait cannot be lost.
    fn wait_for_job(&self) {
        trace!("[worker {}] waiting for jobs", self.id);
        let mut guard = self.sleep.lock.lock().unwrap();
        while !self.deque.has_executable() && self.running.load(Ordering::SeqCst) {
            guard = self.sleep.cvar.wait(guard).unwrap();
        }
    }
}

struct Signal {
    lock: Mutex<()>,
    cvar: Condvar,
}

impl Signal {
    fn new() -> Self {
        Signal {
            lock: Mutex::new(()),
            cvar: Condvar::new(),
        }
    }
}

/// The body of every worker thread.
pub(crate) fn main_loop(inner: Arc<Inner>, index: usize, core: Option<core_affinity::CoreId>) {
    if let Some(core) = core {
        let _ = core_affinity::set_for_current(core);
    }

    // Victim selection is a collaborator, not something the scheduler owns:
    // take the generator from the injected source, or fall back to a weak
    // entropy-seeded one.
    let mut rand: Box<VictimRng> = match inner.rng_source {
        Some(ref source) => source(index as u32),
        None => Box::new(SmallRng::from_entropy()),
    };
    let me = &inner.workers[index];

    me.primed.set();
    debug!("[worker {}] starting", index);

    loop {
        if !me.deque.has_executable() {
            // Someone else may be sitting on runnable work; hand the baton
            // over before going to sleep.
            inner.wake_threads();
            me.wait_for_job();
        }

        // Raised before the deque is consulted, so an all-idle probe can
        // never observe "empty deque, nothing running" between our pop and
        // the start of execution.
        me.job_running.store(true, Ordering::SeqCst);

        if let Some(job) = get_job(&inner, index, &mut *rand) {
            trace!("[worker {}] starting work on job {}", index, job.name());
            let result = job.execute();
            if !job.is_finished() {
                error!(
                    "[worker {}] job {} not finished after execution, unfinished: {}",
                    index,
                    job.name(),
                    job.unfinished()
                );
            }
            me.job_running.store(false, Ordering::SeqCst);

            if let Err(payload) = result {
                inner.capture_panic(payload);
            }
            if job.has_dependants() {
                // Our own deque may hold a job the finished one unblocked.
                me.wake_up();
            }
        } else {
            me.job_running.store(false, Ordering::SeqCst);
            trace!("[worker {}] yield", index);
            thread::yield_now();
        }

        if !me.running.load(Ordering::SeqCst) {
            break;
        }
    }

    me.deque.clear();
    debug!("[worker {}] shutdown", index);
}

/// Own-queue first, then a single steal attempt.
fn get_job(inner: &Inner, index: usize, rand: &mut VictimRng) -> Option<Arc<Job>> {
    let me = &inner.workers[index];

    // The private end may yield a job with unresolved prerequisites when
    // there is more to choose from, so the front can be reordered.
    let allow_blocked = me.deque.len() > 1;
    if let Some(job) = me.deque.pop_private(allow_blocked) {
        if job.can_execute() {
            return Some(job);
        }

        // Park the blocked job at the public end, where a thief can claim
        // it once its prerequisites resolve, and try the next private job.
        // At most one re-park per call, or two blocked jobs would bounce
        // forever.
        trace!("[worker {}] re-parking blocked job {}", index, job.name());
        me.deque.push_public(job);
        if me.deque.len() > 1 {
            if let Some(next) = me.deque.pop_private(false) {
                return Some(next);
            }
        }
    }

    steal(inner, index, rand)
}

fn steal(inner: &Inner, index: usize, rand: &mut VictimRng) -> Option<Arc<Job>> {
    let num_workers = inner.workers.len();
    if num_workers < 2 {
        return None;
    }

    let victim = random_victim(num_workers, index, rand);
    let job = inner.workers[victim].deque.pop_public();
    if let Some(ref job) = job {
        trace!("[worker {}] stole job {} from worker {}", index, job.name(), victim);
    }
    job
}

/// Uniformly random peer id, never the caller's own. A self-hit moves to
/// the next worker instead of re-rolling.
fn random_victim(num_workers: usize, index: usize, rand: &mut VictimRng) -> usize {
    let mut victim = rand.next_u32() as usize % num_workers;
    if victim == index {
        victim = (victim + 1) % num_workers;
    }
    victim
}
