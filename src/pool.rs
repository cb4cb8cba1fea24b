//! The worker pool: construction, round-robin dispatch and shutdown.

use std::any::Any;
use std::cmp;
use std::sync::{Arc, Mutex};
use std::thread;

use crate::deque::DequeVariant;
use crate::errors::Result;
use crate::job::Job;
use crate::unwind;
use crate::worker::{self, Worker};

/// The type for a panic handling closure. Note that this same closure may
/// be invoked multiple times in parallel.
pub type PanicHandler = dyn Fn(Box<dyn Any + Send>) + Send + Sync;

/// A victim-selection random number generator, owned by one worker.
pub type VictimRng = dyn rand::RngCore + Send;

/// Produces the victim-selection generator for the worker with the given
/// id. Invoked once per worker, on the worker's own thread, at startup.
pub type RngSource = dyn Fn(u32) -> Box<VictimRng> + Send + Sync;

/// Construction parameters for a [`Pool`].
#[derive(Debug, Clone)]
pub struct PoolParams {
    /// Number of worker threads. `None` picks `max(hardware, 2) - 1`;
    /// explicit values are clamped to that ceiling, and zero is rejected.
    pub num_workers: Option<u32>,
    /// Which deque implementation the workers are equipped with.
    pub deque: DequeVariant,
    /// Stack size for the worker threads, in bytes.
    pub stack_size: Option<usize>,
    /// Pin each worker to the core matching its id, where the platform
    /// supports it.
    pub pin_workers: bool,
}

impl Default for PoolParams {
    fn default() -> Self {
        PoolParams {
            num_workers: None,
            deque: DequeVariant::default(),
            stack_size: None,
            pin_workers: true,
        }
    }
}

/// The ceiling for the worker count: one hardware thread is kept free for
/// the submitter, but a pool always gets at least one worker.
pub fn max_workers() -> u32 {
    let hardware = num_cpus::get() as u32;
    cmp::max(hardware, 2) - 1
}

/// A fixed pool of workers with per-worker deques and random work-stealing.
///
/// Submission is single-threaded by construction (`submit` takes `&mut
/// self`); the submitter polls [`Pool::all_idle`] to learn that every
/// submitted job has finished, and must keep its job handles alive until
/// then.
pub struct Pool {
    inner: Arc<Inner>,
    handles: Vec<thread::JoinHandle<()>>,
    cursor: u32,
}

pub(crate) struct Inner {
    pub(crate) workers: Vec<Worker>,
    pub(crate) rng_source: Option<Box<RngSource>>,
    panic_handler: Option<Box<PanicHandler>>,
    panic: Mutex<Option<Box<dyn Any + Send>>>,
}

impl Inner {
    /// Wakes the first sleeping worker that has something executable. One
    /// notification is enough: whoever wakes will hand the baton onward
    /// before going back to sleep.
    pub(crate) fn wake_threads(&self) {
        for v in &self.workers {
            if v.wake_up() {
                return;
            }
        }
    }

    /// Routes a captured job panic: straight to the injected handler when
    /// one exists, otherwise parked until shutdown re-raises it. Only the
    /// first payload is kept.
    pub(crate) fn capture_panic(&self, payload: Box<dyn Any + Send>) {
        match self.panic_handler {
            Some(ref handler) => handler(payload),
            None => {
                let mut slot = self.panic.lock().unwrap();
                if slot.is_none() {
                    *slot = Some(payload);
                } else {
                    error!("[pool] additional job panic dropped");
                }
            }
        }
    }
}

impl Pool {
    /// Builds a pool and blocks until every worker thread is up.
    pub fn new(params: PoolParams) -> Result<Pool> {
        Pool::with_hooks(params, None, None)
    }

    /// Like [`Pool::new`], with the external collaborators injected: a
    /// handler that receives the payload of any panicking job procedure
    /// (instead of the panic being re-raised at shutdown), and a source
    /// for the per-worker victim-selection generators (instead of the
    /// default entropy-seeded ones).
    pub fn with_hooks(
        params: PoolParams,
        panic_handler: Option<Box<PanicHandler>>,
        rng_source: Option<Box<RngSource>>,
    ) -> Result<Pool> {
        let num_workers = resolve_workers(params.num_workers)?;

        let workers = (0..num_workers)
            .map(|id| Worker::new(id, params.deque.create()))
            .collect();

        let inner = Arc::new(Inner {
            workers,
            rng_source,
            panic_handler,
            panic: Mutex::new(None),
        });

        let cores = if params.pin_workers {
            core_affinity::get_core_ids().unwrap_or_default()
        } else {
            Vec::new()
        };

        let mut handles = Vec::with_capacity(num_workers as usize);
        for id in 0..num_workers {
            let inner = inner.clone();
            let core = cores.get(id as usize).cloned();

            let mut builder = thread::Builder::new().name(format!("charcoal-worker-{}", id));
            if let Some(stack_size) = params.stack_size {
                builder = builder.stack_size(stack_size);
            }

            handles.push(builder.spawn(move || worker::main_loop(inner, id as usize, core))?);
        }

        for v in &inner.workers {
            v.primed.wait();
        }

        info!("[pool] {} workers ready ({:?} deques)", num_workers, params.deque);
        Ok(Pool {
            inner,
            handles,
            cursor: 0,
        })
    }

    /// Number of workers in the pool.
    #[inline]
    pub fn len(&self) -> usize {
        self.inner.workers.len()
    }

    /// Enqueues a job on the next worker's private end, round robin.
    ///
    /// The handle stays externally owned: keep it alive until [`Pool::all_idle`]
    /// reports true, and destroy it only after that.
    pub fn submit(&mut self, job: &Arc<Job>) {
        self.inner.workers[self.cursor as usize].add_job(job.clone());
        self.cursor = (self.cursor + 1) % self.inner.workers.len() as u32;
    }

    /// True iff every worker's deque is drained and none is mid-execution.
    /// Best-effort, meant to be polled by the submitter.
    pub fn all_idle(&self) -> bool {
        self.inner.workers.iter().all(|v| v.all_jobs_finished())
    }

    /// Notifies the first sleeping worker that has executable jobs queued.
    pub fn wake_threads(&self) {
        self.inner.wake_threads();
    }

    /// Stops every worker, discards queued-but-unexecuted jobs, joins the
    /// threads, and re-raises the first job panic that no handler consumed.
    /// Idempotent.
    pub fn shutdown(&mut self) {
        self.shutdown_and_join();

        let payload = self.inner.panic.lock().unwrap().take();
        if let Some(payload) = payload {
            unwind::resume_unwinding(payload);
        }
    }

    fn shutdown_and_join(&mut self) {
        if self.handles.is_empty() {
            return;
        }

        info!("[pool] shutting down");
        for v in &self.inner.workers {
            v.begin_shutdown();
        }
        for v in &self.inner.workers {
            v.deque.clear();
        }
        for v in &self.inner.workers {
            v.notify_all();
        }
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
        debug!("[pool] all workers joined");
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        self.shutdown_and_join();

        if self.inner.panic.lock().unwrap().is_some() {
            error!("[pool] job panic discarded during pool teardown");
        }
    }
}

fn resolve_workers(requested: Option<u32>) -> Result<u32> {
    let ceiling = max_workers();
    match requested {
        None => Ok(ceiling),
        Some(0) => Err(err_format!("worker count must be at least 1")),
        Some(v) if v > ceiling => {
            warn!("[pool] {} workers requested, clamping to {}", v, ceiling);
            Ok(ceiling)
        }
        Some(v) => Ok(v),
    }
}
