//! Lock-free deque variant for a single owner and multiple thieves.
//!
//! A fixed ring of raw job pointers indexed by two cursors. The owner
//! pushes at `back`, pops at `front`; thieves claim `back - 1`. Both
//! cursors live in one atomic word together with a generation tag, so
//! every removal is a single compare-and-swap on the whole cursor state:
//! an owner pop and a thief pop racing for the last remaining slot can
//! never both win, and a pop that observed stale cursors simply retries.
//! The generation tag also makes the owner's reset of both cursors to
//! zero immune to a thief that went to sleep mid-claim.

use std::sync::atomic::{AtomicPtr, AtomicU64, Ordering};
use std::sync::Arc;

use super::JobDeque;
use crate::job::Job;

/// Slots per worker. Pushing beyond this is a programmer error and fails
/// hard at the push site.
pub const CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Cursors {
    gen: u32,
    front: u16,
    back: u16,
}

impl Cursors {
    #[inline]
    fn unpack(word: u64) -> Self {
        Cursors {
            gen: (word >> 32) as u32,
            front: (word >> 16) as u16,
            back: word as u16,
        }
    }

    #[inline]
    fn pack(self) -> u64 {
        (u64::from(self.gen) << 32) | (u64::from(self.front) << 16) | u64::from(self.back)
    }

    /// Cursor arithmetic wraps; the distance stays well under the wrap
    /// because pushes assert the capacity bound.
    #[inline]
    fn len(self) -> usize {
        self.back.wrapping_sub(self.front) as usize
    }

    #[inline]
    fn is_empty(self) -> bool {
        self.front == self.back
    }
}

pub struct LocklessDeque {
    state: AtomicU64,
    slots: [AtomicPtr<Job>; CAPACITY],
}

impl LocklessDeque {
    pub fn new() -> Self {
        LocklessDeque {
            state: AtomicU64::new(0),
            slots: Default::default(),
        }
    }

    #[inline]
    fn cursors(&self) -> Cursors {
        Cursors::unpack(self.state.load(Ordering::SeqCst))
    }

    #[inline]
    fn try_swap(&self, observed: Cursors, next: Cursors) -> bool {
        self.state
            .compare_exchange(
                observed.pack(),
                next.pack(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    // Owner-side insertion; the private and the public push land on the
    // same end of the ring. The ends stay distinct where it matters: the
    // owner pops `front`, thieves claim `back - 1`.
    fn push(&self, job: Arc<Job>) {
        // Only thieves run concurrently with the single pusher, and they
        // shrink the deque, so checking once up front is enough.
        assert!(
            self.len() < CAPACITY,
            "lockless deque capacity ({}) exceeded",
            CAPACITY
        );

        let ptr = Arc::into_raw(job) as *mut Job;
        loop {
            let cursors = self.cursors();

            // The slot at `back` is outside the live range, so nobody reads
            // it until the cursor swap below publishes it.
            self.slots[cursors.back as usize % CAPACITY].store(ptr, Ordering::SeqCst);

            let next = Cursors {
                gen: cursors.gen.wrapping_add(1),
                front: cursors.front,
                back: cursors.back.wrapping_add(1),
            };
            if self.try_swap(cursors, next) {
                return;
            }
        }
    }

    /// Reads the job a live slot points at. Callers hold handles to every
    /// submitted job until the pool reports all-idle, so the pointee is
    /// valid even if another thread claims the slot between our cursor
    /// snapshot and the swap (the swap then fails and we retry).
    #[inline]
    unsafe fn peek(&self, position: u16) -> *const Job {
        self.slots[position as usize % CAPACITY].load(Ordering::SeqCst)
    }
}

impl Default for LocklessDeque {
    fn default() -> Self {
        LocklessDeque::new()
    }
}

impl JobDeque for LocklessDeque {
    fn push_private(&self, job: Arc<Job>) {
        self.push(job);
    }

    fn push_public(&self, job: Arc<Job>) {
        self.push(job);
    }

    fn pop_private(&self, allow_blocked: bool) -> Option<Arc<Job>> {
        loop {
            let cursors = self.cursors();
            if cursors.is_empty() {
                return None;
            }

            let ptr = unsafe { self.peek(cursors.front) };
            let job = unsafe { &*ptr };
            if !allow_blocked && !job.can_execute() {
                return None;
            }

            let mut next = Cursors {
                gen: cursors.gen.wrapping_add(1),
                front: cursors.front.wrapping_add(1),
                back: cursors.back,
            };
            // Reset the ring when this pop empties it, unless the emptied
            // position is zero (a fresh ring needs no reset).
            if next.is_empty() && cursors.front != 0 {
                next.front = 0;
                next.back = 0;
            }

            if self.try_swap(cursors, next) {
                return Some(unsafe { Arc::from_raw(ptr) });
            }
        }
    }

    fn pop_public(&self) -> Option<Arc<Job>> {
        loop {
            let cursors = self.cursors();
            if cursors.is_empty() {
                return None;
            }

            let position = cursors.back.wrapping_sub(1);
            let ptr = unsafe { self.peek(position) };
            let job = unsafe { &*ptr };
            if !job.can_execute() {
                return None;
            }

            let next = Cursors {
                gen: cursors.gen.wrapping_add(1),
                front: cursors.front,
                back: position,
            };
            if self.try_swap(cursors, next) {
                return Some(unsafe { Arc::from_raw(ptr) });
            }
        }
    }

    fn has_executable(&self) -> bool {
        let cursors = self.cursors();
        let mut position = cursors.front;
        while position != cursors.back {
            let ptr = unsafe { self.peek(position) };
            let job = unsafe { &*ptr };
            if job.can_execute() {
                return true;
            }
            position = position.wrapping_add(1);
        }
        false
    }

    fn len(&self) -> usize {
        self.cursors().len()
    }

    fn clear(&self) {
        while self.pop_private(true).is_some() {}
    }
}

impl Drop for LocklessDeque {
    fn drop(&mut self) {
        self.clear();
    }
}
