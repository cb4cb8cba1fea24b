//! Mutex-guarded deque variant.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::JobDeque;
use crate::job::Job;

/// A double-ended job queue behind a single mutex. The private end is the
/// front (the owner pushes and pops there, LIFO), the public end is the
/// back. The size is mirrored in an atomic counter so `len` and the
/// empty short-circuit of `has_executable` need not take the lock.
pub struct LockingDeque {
    jobs: Mutex<VecDeque<Arc<Job>>>,
    size: AtomicUsize,
}

impl LockingDeque {
    pub fn new() -> Self {
        LockingDeque {
            jobs: Mutex::new(VecDeque::new()),
            size: AtomicUsize::new(0),
        }
    }
}

impl Default for LockingDeque {
    fn default() -> Self {
        LockingDeque::new()
    }
}

impl JobDeque for LockingDeque {
    fn push_private(&self, job: Arc<Job>) {
        let mut jobs = self.jobs.lock().unwrap();
        jobs.push_front(job);
        self.size.fetch_add(1, Ordering::SeqCst);
    }

    fn push_public(&self, job: Arc<Job>) {
        let mut jobs = self.jobs.lock().unwrap();
        jobs.push_back(job);
        self.size.fetch_add(1, Ordering::SeqCst);
    }

    fn pop_private(&self, allow_blocked: bool) -> Option<Arc<Job>> {
        let mut jobs = self.jobs.lock().unwrap();
        if jobs.is_empty() {
            return None;
        }

        if allow_blocked || jobs.front().map_or(false, |v| v.can_execute()) {
            let job = jobs.pop_front();
            self.size.fetch_sub(1, Ordering::SeqCst);
            return job;
        }

        None
    }

    fn pop_public(&self) -> Option<Arc<Job>> {
        let mut jobs = self.jobs.lock().unwrap();
        if jobs.back().map_or(false, |v| v.can_execute()) {
            let job = jobs.pop_back();
            self.size.fetch_sub(1, Ordering::SeqCst);
            return job;
        }

        None
    }

    fn has_executable(&self) -> bool {
        if self.size.load(Ordering::SeqCst) == 0 {
            return false;
        }

        let jobs = self.jobs.lock().unwrap();
        jobs.iter().any(|v| v.can_execute())
    }

    fn len(&self) -> usize {
        self.size.load(Ordering::SeqCst)
    }

    fn clear(&self) {
        let mut jobs = self.jobs.lock().unwrap();
        jobs.clear();
        self.size.store(0, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn owner_end_is_lifo() {
        let deque = LockingDeque::new();
        deque.push_private(Job::new("a", || {}));
        deque.push_private(Job::new("b", || {}));
        assert_eq!(deque.len(), 2);

        assert_eq!(deque.pop_private(false).unwrap().name(), "b");
        assert_eq!(deque.pop_private(false).unwrap().name(), "a");
        assert!(deque.pop_private(false).is_none());
    }

    #[test]
    fn public_end_is_the_oldest_push() {
        let deque = LockingDeque::new();
        deque.push_private(Job::new("a", || {}));
        deque.push_private(Job::new("b", || {}));

        assert_eq!(deque.pop_public().unwrap().name(), "a");
    }

    #[test]
    fn blocked_front_is_held_back_unless_allowed() {
        let deque = LockingDeque::new();
        let gate = Job::new("gate", || {});
        let prereq = Job::with_dependants("prereq", || {}, &[gate.clone()]);
        // `gate` now waits on `prereq`; queue it so the front of the deque
        // is non-executable.
        deque.push_private(gate.clone());

        assert!(deque.pop_private(false).is_none());
        assert!(!deque.has_executable());

        let reordered = deque.pop_private(true).unwrap();
        assert_eq!(reordered.name(), "gate");

        drop(prereq);
    }

    #[test]
    fn thieves_only_see_executable_jobs() {
        let deque = LockingDeque::new();
        let gate = Job::new("gate", || {});
        let unblocker = Job::with_dependants("unblocker", || {}, &[gate.clone()]);
        deque.push_public(gate.clone());

        assert!(deque.pop_public().is_none());

        unblocker.execute().unwrap();
        assert!(deque.has_executable());
        assert_eq!(deque.pop_public().unwrap().name(), "gate");
    }

    #[test]
    fn clear_drains_everything() {
        let deque = LockingDeque::new();
        for i in 0..4 {
            deque.push_private(Job::new(&format!("job-{}", i), || {}));
        }

        deque.clear();
        assert_eq!(deque.len(), 0);
        assert!(deque.pop_private(true).is_none());
    }
}
