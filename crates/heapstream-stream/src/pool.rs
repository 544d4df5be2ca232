//! Fixed-size worker pool shared by send and receive streams.
//!
//! Each stream worker or reader occupies one pool thread for as long as it
//! runs; jobs beyond the thread count wait in the queue. Streams hold the pool
//! through an `Arc`, and the threads are joined when the last owner drops it.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Sender};
use tracing::{debug, error};

use crate::error::{Result, StreamError};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A fixed set of named worker threads consuming a job queue.
#[derive(Debug)]
pub struct ThreadPool {
    jobs: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    /// Start `threads` workers.
    pub fn new(threads: usize) -> Result<Arc<Self>> {
        if threads == 0 {
            return Err(StreamError::InvalidConfig(
                "thread pool needs at least one thread".to_string(),
            ));
        }

        let (tx, rx) = unbounded::<Job>();
        let mut workers = Vec::with_capacity(threads);
        for index in 0..threads {
            let rx = rx.clone();
            let handle = thread::Builder::new()
                .name(format!("heapstream-{index}"))
                .spawn(move || {
                    while let Ok(job) = rx.recv() {
                        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                            error!(worker = index, "pool job panicked");
                        }
                    }
                })
                .map_err(|err| {
                    StreamError::Pool(format!("failed to spawn worker {index}: {err}"))
                })?;
            workers.push(handle);
        }
        debug!(threads, "thread pool started");

        Ok(Arc::new(Self {
            jobs: Some(tx),
            workers,
        }))
    }

    /// Number of worker threads.
    pub fn threads(&self) -> usize {
        self.workers.len()
    }

    pub(crate) fn execute<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let Some(jobs) = &self.jobs else {
            return Err(StreamError::Pool("pool is shutting down".to_string()));
        };
        jobs.send(Box::new(job))
            .map_err(|_| StreamError::Pool("pool workers have exited".to_string()))
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.jobs.take();
        let current = thread::current().id();
        for worker in self.workers.drain(..) {
            // A job holding the last reference cannot join its own thread.
            if worker.thread().id() == current {
                continue;
            }
            if worker.join().is_err() {
                error!("pool worker exited by panic");
            }
        }
        debug!("thread pool stopped");
    }
}
