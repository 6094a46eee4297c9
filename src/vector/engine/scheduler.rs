//! Worker threads for flushes and ANN builds.
//!
//! Jobs are boxed closures sent over an unbounded channel and executed by a
//! fixed set of named threads. A scheduler created with [`BuildScheduler::inline`]
//! has no threads and runs each job on the submitting thread instead.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error};

use crate::error::Result;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Counters of a scheduler since creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub workers: usize,
    pub submitted: u64,
    pub completed: u64,
    pub panicked: u64,
    pub pending: usize,
}

#[derive(Debug, Default)]
struct Progress {
    pending: Mutex<usize>,
    idle: Condvar,
    submitted: AtomicU64,
    completed: AtomicU64,
    panicked: AtomicU64,
}

impl Progress {
    fn run(&self, job: Job) {
        if catch_unwind(AssertUnwindSafe(job)).is_err() {
            self.panicked.fetch_add(1, Ordering::Relaxed);
            error!("Background job panicked");
        }
        self.completed.fetch_add(1, Ordering::Relaxed);

        let mut pending = self.pending.lock();
        *pending = pending.saturating_sub(1);
        if *pending == 0 {
            self.idle.notify_all();
        }
    }
}

#[derive(Debug)]
pub struct BuildScheduler {
    sender: Option<Sender<Job>>,
    workers: Vec<thread::JoinHandle<()>>,
    progress: Arc<Progress>,
}

impl BuildScheduler {
    /// Start `workers` threads named `quiver-build-{i}`.
    pub fn new(workers: usize) -> Result<Self> {
        let (sender, receiver) = unbounded::<Job>();
        let progress = Arc::new(Progress::default());
        let workers = (0..workers.max(1))
            .map(|worker_id| Self::spawn_worker(worker_id, receiver.clone(), progress.clone()))
            .collect::<Result<Vec<_>>>()?;
        debug!("Started {} build workers", workers.len());

        Ok(Self {
            sender: Some(sender),
            workers,
            progress,
        })
    }

    /// A scheduler that runs every job synchronously inside [`submit`](Self::submit).
    pub fn inline() -> Self {
        Self {
            sender: None,
            workers: Vec::new(),
            progress: Arc::new(Progress::default()),
        }
    }

    fn spawn_worker(
        worker_id: usize,
        receiver: Receiver<Job>,
        progress: Arc<Progress>,
    ) -> Result<thread::JoinHandle<()>> {
        let handle = thread::Builder::new()
            .name(format!("quiver-build-{worker_id}"))
            .spawn(move || {
                for job in receiver.iter() {
                    progress.run(job);
                }
            })?;
        Ok(handle)
    }

    pub fn is_inline(&self) -> bool {
        self.sender.is_none()
    }

    pub fn submit<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.progress.submitted.fetch_add(1, Ordering::Relaxed);
        *self.progress.pending.lock() += 1;

        let job: Job = Box::new(job);
        let job = match &self.sender {
            Some(sender) => match sender.send(job) {
                Ok(()) => return,
                // All workers are gone; run it here rather than lose it.
                Err(unsent) => unsent.into_inner(),
            },
            None => job,
        };
        self.progress.run(job);
    }

    /// Block until no job is queued or running. Returns `false` if `timeout`
    /// elapsed first.
    pub fn wait_idle(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut pending = self.progress.pending.lock();
        while *pending > 0 {
            match deadline {
                Some(deadline) => {
                    if self.progress.idle.wait_until(&mut pending, deadline).timed_out() {
                        return *pending == 0;
                    }
                }
                None => self.progress.idle.wait(&mut pending),
            }
        }
        true
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            workers: self.workers.len(),
            submitted: self.progress.submitted.load(Ordering::Relaxed),
            completed: self.progress.completed.load(Ordering::Relaxed),
            panicked: self.progress.panicked.load(Ordering::Relaxed),
            pending: *self.progress.pending.lock(),
        }
    }
}

impl Drop for BuildScheduler {
    fn drop(&mut self) {
        self.sender.take();
        let current = thread::current().id();
        for handle in self.workers.drain(..) {
            // The last owner may be a job running on one of our own workers.
            if handle.thread().id() == current {
                continue;
            }
            let _ = handle.join();
        }
    }
}
