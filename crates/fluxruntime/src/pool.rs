//! Fixed-width worker pool backing graph execution.
//!
//! Tasks are plain closures pushed onto a channel and drained by a fixed set
//! of OS threads. `wait` blocks until every submitted task, including tasks
//! submitted by running tasks, has finished.

use crossbeam_channel::{unbounded, Receiver, Sender};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct WorkerPool {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    state: Arc<PoolState>,
    width: usize,
}

struct PoolState {
    pending: Mutex<usize>,
    idle: Condvar,
}

impl WorkerPool {
    pub fn new(width: usize) -> Self {
        let width = width.max(1);
        let (sender, receiver) = unbounded::<Job>();
        let state = Arc::new(PoolState {
            pending: Mutex::new(0),
            idle: Condvar::new(),
        });

        let workers = (0..width)
            .map(|index| {
                let receiver = receiver.clone();
                let state = state.clone();
                std::thread::Builder::new()
                    .name(format!("flux-worker-{index}"))
                    .spawn(move || worker_loop(receiver, state))
                    .expect("failed to spawn worker thread")
            })
            .collect();

        Self {
            sender: Some(sender),
            workers,
            state,
            width,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Queues a task for execution on the pool.
    pub fn submit(&self, task: impl FnOnce() + Send + 'static) {
        *self.state.pending.lock().unwrap() += 1;

        let sent = self
            .sender
            .as_ref()
            .map(|sender| sender.send(Box::new(task)).is_ok())
            .unwrap_or(false);
        if !sent {
            let mut pending = self.state.pending.lock().unwrap();
            *pending -= 1;
            if *pending == 0 {
                self.state.idle.notify_all();
            }
        }
    }

    /// Blocks until the pool has executed everything submitted so far,
    /// including tasks queued by other tasks while draining.
    pub fn wait(&self) {
        let mut pending = self.state.pending.lock().unwrap();
        while *pending > 0 {
            pending = self.state.idle.wait(pending).unwrap();
        }
    }
}

fn worker_loop(receiver: Receiver<Job>, state: Arc<PoolState>) {
    while let Ok(job) = receiver.recv() {
        if catch_unwind(AssertUnwindSafe(job)).is_err() {
            tracing::error!("worker task panicked");
        }

        let mut pending = state.pending.lock().unwrap();
        *pending -= 1;
        if *pending == 0 {
            state.idle.notify_all();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Closing the channel lets the workers drain and exit.
        self.sender.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}
