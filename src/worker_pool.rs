//! Fixed-size thread pools the dispatcher hands blocking work to.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use log::{debug, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A named pool of `size` threads sharing one FIFO job queue.
///
/// `pending` counts jobs that are queued but not yet picked up by a worker.
pub struct WorkerPool {
    name: String,
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    pending: Arc<AtomicUsize>,
}

impl WorkerPool {
    pub fn new(name: &str, size: usize) -> Result<Self, String> {
        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));
        let pending = Arc::new(AtomicUsize::new(0));

        let mut workers = Vec::with_capacity(size.max(1));
        for index in 0..size.max(1) {
            let receiver = Arc::clone(&receiver);
            let handle = thread::Builder::new()
                .name(format!("{name}-{index}"))
                .spawn(move || worker_loop(receiver))
                .map_err(|err| format!("failed to spawn {name} worker: {err}"))?;
            workers.push(handle);
        }

        Ok(Self {
            name: name.to_string(),
            sender: Some(sender),
            workers,
            pending,
        })
    }

    pub fn execute<F>(&self, job: F) -> Result<(), String>
    where
        F: FnOnce() + Send + 'static,
    {
        let Some(sender) = self.sender.as_ref() else {
            return Err(format!("{} pool is shut down", self.name));
        };
        let pending = Arc::clone(&self.pending);
        pending.fetch_add(1, Ordering::SeqCst);
        let wrapped: Job = Box::new(move || {
            pending.fetch_sub(1, Ordering::SeqCst);
            job();
        });
        sender.send(wrapped).map_err(|_| {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            format!("{} pool workers are gone", self.name)
        })
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Stops accepting jobs, lets workers finish everything already queued,
    /// and joins them.
    pub fn shutdown(&mut self) {
        if self.sender.take().is_none() {
            return;
        }
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                warn!("A {} worker panicked", self.name);
            }
        }
        debug!("{} pool stopped", self.name);
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(receiver: Arc<Mutex<Receiver<Job>>>) {
    loop {
        let next = {
            let receiver = receiver.lock().unwrap_or_else(PoisonError::into_inner);
            receiver.recv()
        };
        match next {
            Ok(job) => job(),
            Err(_) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{mpsc, Arc};
    use std::time::Duration;

    use super::WorkerPool;

    #[test]
    fn test_shutdown_drains_queued_jobs() {
        let mut pool = WorkerPool::new("test", 2).expect("pool should start");
        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..16 {
            let done = Arc::clone(&done);
            pool.execute(move || {
                done.fetch_add(1, Ordering::SeqCst);
            })
            .expect("queue job");
        }
        pool.shutdown();
        assert_eq!(done.load(Ordering::SeqCst), 16);
        assert!(pool.execute(|| {}).is_err());
    }

    #[test]
    fn test_pending_counts_only_jobs_not_yet_started() {
        let pool = WorkerPool::new("single", 1).expect("pool should start");
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let (started_tx, started_rx) = mpsc::channel::<()>();
        pool.execute(move || {
            let _ = started_tx.send(());
            let _ = release_rx.recv();
        })
        .expect("queue blocking job");
        started_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("first job should start");

        pool.execute(|| {}).expect("queue second job");
        pool.execute(|| {}).expect("queue third job");
        assert_eq!(pool.pending(), 2);

        release_tx.send(()).expect("release first job");
    }
}
