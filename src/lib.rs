//! #### Charcoal
//!
//! Charcoal is a small job scheduler for frame-based workloads. Callers wrap
//! plain procedures into `Job`s, declare which other jobs depend on their
//! completion, and hand them to a fixed `Pool` of worker threads. The pool
//! honors the resulting partial order and balances load by letting starved
//! workers steal from the public end of their peers' deques.
//!
//! The scheduler never owns jobs. Handles are reference counted; the
//! submitter keeps its handles alive until [`Pool::all_idle`] reports that
//! every submitted job has finished.
//!
//! ```no_run
//! use charcoal::prelude::*;
//!
//! let rendering = Job::new("rendering", || { /* ... */ });
//! let physics = Job::with_dependants("physics", || { /* ... */ }, &[rendering.clone()]);
//!
//! let mut pool = Pool::new(PoolParams::default()).unwrap();
//! pool.submit(&physics);
//! pool.submit(&rendering);
//!
//! while !pool.all_idle() {
//!     std::thread::yield_now();
//! }
//!
//! pool.shutdown();
//! ```

#[macro_use]
extern crate log;

#[macro_use]
pub mod errors;

pub mod deque;
pub mod job;
pub mod pool;
pub mod prelude;

mod latch;
mod unwind;
mod worker;

pub use self::deque::DequeVariant;
pub use self::job::Job;
pub use self::pool::{PanicHandler, Pool, PoolParams, RngSource, VictimRng};
