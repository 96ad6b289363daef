//! Worker thread pool
//!
//! Fixed set of named threads draining an unbounded job queue. Jobs run
//! under `catch_unwind` so a panicking operation cannot take a worker down;
//! any completion token the job owned is dropped during unwinding and
//! settles itself as abandoned.

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Pool of worker threads executing blocking operations
pub struct WorkerPool {
    sender: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    size: usize,
    queued: Arc<AtomicUsize>,
}

impl WorkerPool {
    /// Spawn `size` workers named `{name}-{n}`
    pub fn new(size: usize, name: &str) -> io::Result<Self> {
        let size = size.max(1);
        let (sender, receiver) = unbounded::<Job>();
        let queued = Arc::new(AtomicUsize::new(0));

        let mut workers = Vec::with_capacity(size);
        for n in 0..size {
            let receiver = receiver.clone();
            let queued = Arc::clone(&queued);
            let worker = thread::Builder::new()
                .name(format!("{}-{}", name, n))
                .spawn(move || worker_loop(receiver, queued))?;
            workers.push(worker);
        }
        debug!(workers = size, name, "worker pool started");

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            size,
            queued,
        })
    }

    /// Queue a job. Returns false once the pool has shut down.
    pub fn execute<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let guard = self.sender.lock();
        let Some(sender) = guard.as_ref() else {
            return false;
        };
        self.queued.fetch_add(1, Ordering::AcqRel);
        if sender.send(Box::new(job)).is_err() {
            self.queued.fetch_sub(1, Ordering::AcqRel);
            return false;
        }
        true
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Jobs queued or running
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::Acquire)
    }

    /// Stop accepting jobs and join every worker after the queue drains
    pub fn shutdown(&self) {
        self.sender.lock().take();
        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            if worker.join().is_err() {
                warn!("worker thread exited by panic");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(receiver: Receiver<Job>, queued: Arc<AtomicUsize>) {
    while let Ok(job) = receiver.recv() {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            warn!(%message, "worker job panicked");
        }
        queued.fetch_sub(1, Ordering::AcqRel);
    }
}
