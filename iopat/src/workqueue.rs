// Copyright (c) Facebook, Inc. and its affiliates.

//! A fixed size worker pool.
//!
//! Work items are closures which own everything they touch. Results travel
//! back over channels supplied by the caller. A panicking work item doesn't
//! take its worker down. Use `catch_panic()` inside the closure to turn the
//! panic into an error for the caller.
//!
//! # Examples
//! ```
//! use crossbeam::channel::unbounded;
//! use iopat::workqueue::{catch_panic, WorkerPool};
//!
//! let pool = WorkerPool::new("example", 2).unwrap();
//! let (tx, rx) = unbounded();
//! for i in 0..4usize {
//!     let tx = tx.clone();
//!     pool.queue(move || {
//!         let _ = tx.send((i, catch_panic(|| i * 2)));
//!     })
//!     .unwrap();
//! }
//! let mut results: Vec<_> = rx.iter().take(4).collect();
//! results.sort_by_key(|r| r.0);
//! assert_eq!(results[3].1, Ok(6));
//! ```
use anyhow::{anyhow, Result};
use crossbeam::channel::{unbounded, Receiver, Sender};
use log::{debug, error, trace};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::{Builder, JoinHandle};

type Work = Box<dyn FnOnce() + Send>;

/// A worker thread's self representation.
struct Worker {
    name: String,
    work_rx: Receiver<Work>,
}

impl Worker {
    fn run(self) {
        debug!("{}: starting", &self.name);
        for work in self.work_rx.iter() {
            trace!("{}: executing {:p}", &self.name, work);
            if let Err(e) = catch_unwind(AssertUnwindSafe(work)) {
                error!("{}: work item panicked ({})", &self.name, panic_msg(&e));
            }
            trace!("{}: complete", &self.name);
        }
        debug!("{}: exiting", &self.name);
    }
}

fn panic_msg(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Run `f` and turn a panic into an `Err` carrying the panic message.
pub fn catch_panic<T, F: FnOnce() -> T>(f: F) -> std::result::Result<T, String> {
    catch_unwind(AssertUnwindSafe(f)).map_err(|e| panic_msg(&e))
}

pub struct WorkerPool {
    work_tx: Option<Sender<Work>>,
    jhs: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(name: &str, nr_workers: usize) -> Result<Self> {
        let (work_tx, work_rx) = unbounded::<Work>();
        let mut jhs = vec![];

        for id in 0..nr_workers.max(1) {
            let worker = Worker {
                name: format!("{}-{}", name, id),
                work_rx: work_rx.clone(),
            };
            let jh = Builder::new()
                .name(worker.name.clone())
                .spawn(move || worker.run())
                .map_err(|e| anyhow!("failed to spawn {} worker {} ({})", name, id, &e))?;
            jhs.push(jh);
        }

        Ok(Self {
            work_tx: Some(work_tx),
            jhs,
        })
    }

    pub fn nr_workers(&self) -> usize {
        self.jhs.len()
    }

    /// Queue a closure for execution on the next free worker.
    pub fn queue<F>(&self, work: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        match self.work_tx.as_ref() {
            Some(tx) => tx
                .send(Box::new(work))
                .map_err(|_| anyhow!("worker pool is shut down")),
            None => Err(anyhow!("worker pool is shut down")),
        }
    }
}

/// Waits for queued work to drain.
impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.work_tx.take();
        for jh in self.jhs.drain(..) {
            if jh.join().is_err() {
                error!("workqueue: Worker thread terminated abnormally");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_all_items_run() {
        let _ = env_logger::try_init();
        let pool = WorkerPool::new("test", 3).unwrap();
        assert_eq!(pool.nr_workers(), 3);

        let (tx, rx) = unbounded();
        for i in 0..32usize {
            let tx = tx.clone();
            pool.queue(move || {
                let _ = tx.send(i);
            })
            .unwrap();
        }
        drop(tx);
        drop(pool);

        let seen: HashSet<usize> = rx.iter().collect();
        assert_eq!(seen.len(), 32);
    }

    #[test]
    fn test_panic_is_isolated() {
        let _ = env_logger::try_init();
        let pool = WorkerPool::new("test", 1).unwrap();
        let (tx, rx) = unbounded();

        let tx0 = tx.clone();
        pool.queue(move || {
            let _ = tx0.send(catch_panic(|| -> usize { panic!("bad chunk") }));
        })
        .unwrap();
        pool.queue(|| panic!("uncaught")).unwrap();
        pool.queue(move || {
            let _ = tx.send(catch_panic(|| 7usize));
        })
        .unwrap();

        assert_eq!(rx.recv().unwrap(), Err("bad chunk".to_string()));
        assert_eq!(rx.recv().unwrap(), Ok(7));
    }
}
