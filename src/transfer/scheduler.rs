//! Bounded producer/consumer runner.
//!
//! Tasks flow through a bounded crossbeam channel to `N` OS worker threads.
//! Each task reports `Ok(true)` (success), `Ok(false)` (counted failure) or
//! `Err` (counted failure that also stops further production). Workers keep
//! per-thread tallies that are summed after join, so no counter is shared.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use crossbeam_channel::{Receiver, Sender, bounded, select};

use crate::TransferError;

/// One unit of work. The argument is the id of the worker running it.
pub type TransferTask = Box<dyn FnOnce(usize) -> Result<bool> + Send>;

#[derive(Debug, Default)]
pub struct TransferOutcome {
    pub success_count: usize,
    pub failure_count: usize,
    pub first_error: Option<anyhow::Error>,
}

struct Shared {
    first_error: Mutex<Option<anyhow::Error>>,
    // Dropping the sender wakes every producer blocked in `select!`.
    cancel_tx: Mutex<Option<Sender<()>>>,
}

impl Shared {
    fn cancel(&self, err: Option<anyhow::Error>) {
        let mut first = match self.first_error.lock() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        };
        if first.is_none() {
            *first = err;
        }
        let mut tx = match self.cancel_tx.lock() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        };
        if tx.take().is_some() {
            tracing::debug!("[runner] cancelled");
        }
    }

    fn is_cancelled(&self) -> bool {
        match self.cancel_tx.lock() {
            Ok(g) => g.is_none(),
            Err(p) => p.into_inner().is_none(),
        }
    }

    fn take_error(&self) -> Option<anyhow::Error> {
        match self.first_error.lock() {
            Ok(mut g) => g.take(),
            Err(p) => p.into_inner().take(),
        }
    }
}

/// Handle used to feed tasks. Cloneable; the runner stops waiting for work
/// once every producer has been dropped.
#[derive(Clone)]
pub struct Producer {
    tx: Sender<TransferTask>,
    cancel_rx: Receiver<()>,
    shared: Arc<Shared>,
}

impl Producer {
    /// Enqueue a task, blocking while the queue is full. Fails with
    /// `RunnerStopped` once the runner has been cancelled.
    pub fn add_task<F>(&self, task: F) -> Result<()>
    where
        F: FnOnce(usize) -> Result<bool> + Send + 'static,
    {
        if self.shared.is_cancelled() {
            return Err(TransferError::RunnerStopped.into());
        }
        let task: TransferTask = Box::new(task);
        select! {
            send(self.tx, task) -> res => res.map_err(|_| TransferError::RunnerStopped.into()),
            recv(self.cancel_rx) -> _ => Err(TransferError::RunnerStopped.into()),
        }
    }

    /// Stop accepting tasks, recording `err` as the run's error if none was
    /// recorded yet. Idempotent.
    pub fn cancel(&self, err: Option<anyhow::Error>) {
        self.shared.cancel(err);
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.is_cancelled()
    }
}

pub struct BoundedRunner {
    threads: usize,
    tx: Sender<TransferTask>,
    rx: Receiver<TransferTask>,
    cancel_rx: Receiver<()>,
    shared: Arc<Shared>,
}

impl BoundedRunner {
    pub fn new(threads: usize) -> Self {
        let threads = threads.max(1);
        let (tx, rx) = bounded::<TransferTask>(threads);
        let (cancel_tx, cancel_rx) = bounded::<()>(0);
        let shared = Arc::new(Shared {
            first_error: Mutex::new(None),
            cancel_tx: Mutex::new(Some(cancel_tx)),
        });
        Self { threads, tx, rx, cancel_rx, shared }
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    pub fn producer(&self) -> Producer {
        Producer { tx: self.tx.clone(), cancel_rx: self.cancel_rx.clone(), shared: self.shared.clone() }
    }

    /// Spawn the workers, wait for every producer to finish and every queued
    /// task to run, then sum the tallies.
    pub fn run(self) -> TransferOutcome {
        let BoundedRunner { threads, tx, rx, cancel_rx, shared } = self;
        drop(tx);
        drop(cancel_rx);

        let mut handles = Vec::with_capacity(threads);
        for worker_id in 0..threads {
            let rx = rx.clone();
            let shared = shared.clone();
            let handle = std::thread::spawn(move || {
                let mut ok = 0usize;
                let mut failed = 0usize;
                while let Ok(task) = rx.recv() {
                    match task(worker_id) {
                        Ok(true) => ok += 1,
                        Ok(false) => failed += 1,
                        Err(e) => {
                            failed += 1;
                            tracing::warn!("[runner] worker_id={} task error: {:#}", worker_id, e);
                            shared.cancel(Some(e));
                        }
                    }
                }
                tracing::debug!("[runner] worker_id={} done ok={} failed={}", worker_id, ok, failed);
                (ok, failed)
            });
            handles.push(handle);
        }
        drop(rx);

        let mut outcome = TransferOutcome::default();
        for h in handles {
            match h.join() {
                Ok((ok, failed)) => {
                    outcome.success_count += ok;
                    outcome.failure_count += failed;
                }
                Err(_) => {
                    tracing::error!("[runner] worker thread panicked");
                    outcome.failure_count += 1;
                }
            }
        }
        outcome.first_error = shared.take_error();
        outcome
    }

    /// Run `produce` on its own thread alongside the workers. An error it
    /// returns (other than `RunnerStopped`) cancels the run and becomes the
    /// outcome's error.
    pub fn run_with<P>(self, produce: P) -> TransferOutcome
    where
        P: FnOnce(&Producer) -> Result<()> + Send,
    {
        let producer = self.producer();
        std::thread::scope(|s| {
            s.spawn(move || {
                if let Err(e) = produce(&producer) {
                    let stopped = matches!(
                        e.downcast_ref::<TransferError>(),
                        Some(TransferError::RunnerStopped)
                    );
                    if !stopped {
                        producer.cancel(Some(e));
                    }
                }
            });
            self.run()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn counts_successes_and_failures() {
        let runner = BoundedRunner::new(4);
        let outcome = runner.run_with(|p| {
            for i in 0..20 {
                p.add_task(move |_| Ok(i % 5 != 0))?;
            }
            Ok(())
        });
        assert_eq!(outcome.success_count, 16);
        assert_eq!(outcome.failure_count, 4);
        assert!(outcome.first_error.is_none());
    }

    #[test]
    fn zero_threads_means_one_worker() {
        let runner = BoundedRunner::new(0);
        assert_eq!(runner.threads(), 1);
        let outcome = runner.run_with(|p| p.add_task(|id| Ok(id == 0)));
        assert_eq!(outcome.success_count, 1);
    }

    #[test]
    fn error_cancels_and_every_accepted_task_runs_once() {
        let executed = Arc::new(AtomicUsize::new(0));
        let accepted = Arc::new(AtomicUsize::new(0));
        let runner = BoundedRunner::new(10);
        let exec = executed.clone();
        let acc = accepted.clone();
        let outcome = runner.run_with(move |p| {
            for i in 0..100usize {
                let exec = exec.clone();
                p.add_task(move |_| {
                    exec.fetch_add(1, Ordering::SeqCst);
                    if i >= 50 { Err(anyhow::anyhow!("task {} failed", i)) } else { Ok(true) }
                })?;
                acc.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        });
        let executed = executed.load(Ordering::SeqCst);
        assert!(outcome.first_error.is_some());
        assert!(outcome.first_error.unwrap().to_string().contains("failed"));
        assert_eq!(outcome.success_count, 50);
        assert_eq!(outcome.success_count + outcome.failure_count, executed);
        assert_eq!(executed, accepted.load(Ordering::SeqCst));
        assert!(executed < 100);
    }

    #[test]
    fn add_after_cancel_is_runner_stopped() {
        let runner = BoundedRunner::new(2);
        let producer = runner.producer();
        producer.cancel(None);
        producer.cancel(Some(anyhow::anyhow!("late")));
        let err = producer.add_task(|_| Ok(true)).unwrap_err();
        assert!(matches!(err.downcast_ref::<TransferError>(), Some(TransferError::RunnerStopped)));
        drop(producer);
        let outcome = runner.run();
        assert_eq!(outcome.success_count, 0);
        assert!(outcome.first_error.is_some());
    }

    #[test]
    fn producer_error_becomes_outcome_error() {
        let runner = BoundedRunner::new(2);
        let outcome = runner.run_with(|p| {
            p.add_task(|_| Ok(true))?;
            Err(TransferError::PathNotFound("nowhere".into()).into())
        });
        assert_eq!(outcome.success_count, 1);
        let err = outcome.first_error.unwrap();
        assert!(matches!(err.downcast_ref::<TransferError>(), Some(TransferError::PathNotFound(_))));
    }
}
