//! Bounded worker pool for backend I/O.
//!
//! The engine is single-threaded; the pool exists purely to run backend
//! syscalls in parallel. Enqueue blocks when the bounded queue is full,
//! which is the only backpressure the engine sees. Dropping the pool
//! closes the queue and joins every worker, so all scheduled I/O has
//! completed once the pool is gone.

use crossbeam_channel::{Receiver, Sender};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::debug;

type Job = Box<dyn FnOnce() + Send + 'static>;

const QUEUE_DEPTH: usize = 1024;

/// Counters for dispatched and completed jobs.
#[derive(Debug, Default)]
pub struct PoolStats {
    enqueued: AtomicU64,
    completed: AtomicU64,
}

impl PoolStats {
    #[must_use]
    pub fn enqueued(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }
}

/// Fixed-width pool of I/O workers fed from a bounded queue.
#[derive(Debug)]
pub struct IoPool {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    stats: Arc<PoolStats>,
}

impl IoPool {
    /// Spawn `width` workers (at least one).
    #[must_use]
    pub fn new(width: usize) -> Self {
        let width = width.max(1);
        let (sender, receiver) = crossbeam_channel::bounded::<Job>(QUEUE_DEPTH);
        let stats = Arc::new(PoolStats::default());
        let workers = (0..width)
            .map(|id| {
                let receiver: Receiver<Job> = receiver.clone();
                let stats = Arc::clone(&stats);
                std::thread::Builder::new()
                    .name(format!("agefs-io-{id}"))
                    .spawn(move || worker_loop(&receiver, &stats))
                    .expect("spawn I/O worker")
            })
            .collect();
        Self {
            sender: Some(sender),
            workers,
            stats,
        }
    }

    /// Queue one unit of I/O work. Blocks while the queue is full.
    pub fn enqueue(&self, job: impl FnOnce() + Send + 'static) {
        self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
        self.sender
            .as_ref()
            .expect("pool is alive until dropped")
            .send(Box::new(job))
            .expect("workers outlive the sender");
    }

    #[must_use]
    pub fn stats(&self) -> &PoolStats {
        &self.stats
    }
}

fn worker_loop(receiver: &Receiver<Job>, stats: &PoolStats) {
    while let Ok(job) = receiver.recv() {
        // Backend I/O failures are fatal to the whole run: a panicking
        // job must not be absorbed by this worker thread.
        if std::panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
            std::process::abort();
        }
        stats.completed.fetch_add(1, Ordering::Relaxed);
    }
    debug!("I/O worker draining complete");
}

impl Drop for IoPool {
    fn drop(&mut self) {
        // Closing the channel lets workers drain the queue and exit.
        drop(self.sender.take());
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}
