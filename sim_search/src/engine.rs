//! Completion-driven parallel execution of independent comparison units.
//!
//! A fixed pool of worker threads pulls unit-of-work tokens from a bounded
//! job queue and pushes one result per unit into a completion queue. The
//! driving thread blocks on completions and decides, per completion,
//! whether to submit more work. In-flight units are therefore bounded by
//! the initial batch size (workers for the streaming form, twice that for
//! the matrix form).
//!
//! The first failing unit is fatal: submission stops, the remaining
//! in-flight units are drained, and the failure is surfaced to the caller.
//! No unit is ever retried.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use log::warn;

use crate::error::Error;
use crate::progress::{LogProgress, ProgressObserver};

const COMPLETION_POLL: Duration = Duration::from_millis(25);

/// Cooperative stop signal. Cancelling stops further submissions; the
/// in-flight units still drain so nothing leaks.
#[derive(Clone)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        return Self(Arc::new(AtomicBool::new(false)));
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        return self.0.load(Ordering::SeqCst);
    }
}

/// A streaming algorithm pulls one record from its input per unit.
///
/// `Ok(true)` means a record was processed and another unit may find more
/// input; `Ok(false)` means the input was exhausted.
pub trait StreamAlgorithm: Send + Sync {
    fn run_unit(&self) -> Result<bool, Error>;
}

/// A matrix algorithm owns a known number of columns; each unit processes
/// the column whose index it is handed.
pub trait MatrixAlgorithm: Send + Sync {
    fn object_count(&self) -> usize;

    fn run_column(&self, idx: usize) -> Result<(), Error>;
}

/// Fixed worker pool with a shared job queue and a completion queue.
struct WorkerPool<J: Send + 'static> {
    job_sender: Option<SyncSender<J>>,
    completion_receiver: Receiver<Result<bool, Error>>,
    workers: Vec<thread::JoinHandle<()>>,
}

enum Completion {
    Done(Result<bool, Error>),
    Pending,
    PoolGone,
}

impl<J: Send + 'static> WorkerPool<J> {
    fn start<W>(n_workers: usize, buffer: usize, work: W) -> Self
    where
        W: Fn(J) -> Result<bool, Error> + Send + Sync + 'static,
    {
        let (job_sender, job_receiver) = sync_channel::<J>(buffer);
        let job_receiver = Arc::new(Mutex::new(job_receiver));
        let (completion_sender, completion_receiver) = sync_channel(buffer);
        let work = Arc::new(work);

        let mut workers = Vec::with_capacity(n_workers);
        for _ in 0..n_workers {
            let job_receiver = Arc::clone(&job_receiver);
            let completion_sender = completion_sender.clone();
            let work = Arc::clone(&work);

            workers.push(thread::spawn(move || loop {
                let job = {
                    let guard = job_receiver.lock().unwrap();
                    guard.recv()
                };

                let job = match job {
                    Ok(job) => job,
                    Err(_) => break, // queue closed, no more work coming
                };

                let result = work(job);
                if completion_sender.send(result).is_err() {
                    break;
                }
            }));
        }

        return Self {
            job_sender: Some(job_sender),
            completion_receiver,
            workers,
        };
    }

    fn submit(&self, job: J) -> bool {
        match &self.job_sender {
            Some(sender) => sender.send(job).is_ok(),
            None => false,
        }
    }

    fn next_completion(&self) -> Completion {
        match self.completion_receiver.recv_timeout(COMPLETION_POLL) {
            Ok(result) => Completion::Done(result),
            Err(RecvTimeoutError::Timeout) => Completion::Pending,
            Err(RecvTimeoutError::Disconnected) => Completion::PoolGone,
        }
    }

    fn shutdown(mut self) {
        self.job_sender.take();

        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

/// Runs a `StreamAlgorithm` until its input is exhausted: `n_workers` units
/// are submitted up front and every unit that reports more input triggers
/// one resubmission.
pub struct StreamRunner<A: StreamAlgorithm + 'static> {
    algorithm: Arc<A>,
    n_workers: usize,
    progress: Arc<dyn ProgressObserver>,
    cancel: CancelToken,
}

impl<A: StreamAlgorithm + 'static> StreamRunner<A> {
    pub fn new(algorithm: Arc<A>, n_workers: usize) -> Self {
        return Self {
            algorithm,
            n_workers: n_workers.max(1),
            progress: Arc::new(LogProgress),
            cancel: CancelToken::new(),
        };
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressObserver>) -> Self {
        self.progress = progress;
        return self;
    }

    pub fn cancel_token(&self) -> CancelToken {
        return self.cancel.clone();
    }

    /// Returns how many units processed a record.
    pub fn run(&self) -> Result<usize, Error> {
        let start = Instant::now();
        let algorithm = Arc::clone(&self.algorithm);
        let pool = WorkerPool::start(self.n_workers, self.n_workers * 2, move |_job: ()| {
            algorithm.run_unit()
        });

        let mut in_flight = 0usize;
        for _ in 0..self.n_workers {
            if pool.submit(()) {
                in_flight += 1;
            }
        }

        let tick = 100 * self.n_workers;
        let mut processed = 0usize;
        let mut failure: Option<Error> = None;

        while in_flight > 0 {
            let result = match pool.next_completion() {
                Completion::Done(result) => result,
                Completion::Pending => {
                    continue;
                }
                Completion::PoolGone => {
                    failure = Some(Error::Engine("worker pool terminated unexpectedly".to_string()));
                    break;
                }
            };

            in_flight -= 1;
            match result {
                Ok(true) => {
                    processed += 1;
                    if failure.is_none() && !self.cancel.is_cancelled() && pool.submit(()) {
                        in_flight += 1;
                    }
                    if processed % tick == 0 {
                        self.progress.on_tick(processed);
                    }
                }
                Ok(false) => {} // input exhausted, let this slot retire
                Err(e) => {
                    if failure.is_none() {
                        failure = Some(Error::WorkUnit(Box::new(e)));
                    }
                }
            }
        }

        pool.shutdown();

        if failure.is_none() && self.cancel.is_cancelled() {
            failure = Some(Error::Interrupted);
        }

        match failure {
            Some(e) => Err(e),
            None => {
                self.progress
                    .on_finished("stream", processed, self.n_workers, start.elapsed().as_secs_f64());
                Ok(processed)
            }
        }
    }
}

/// Runs a `MatrixAlgorithm` over all of its columns: an initial batch of
/// `min(2 * workers, columns)` units, then one new column per completion
/// until every column was submitted, then a drain.
pub struct MatrixRunner<A: MatrixAlgorithm + 'static> {
    algorithm: Arc<A>,
    n_workers: usize,
    progress: Arc<dyn ProgressObserver>,
    cancel: CancelToken,
}

impl<A: MatrixAlgorithm + 'static> MatrixRunner<A> {
    pub fn new(algorithm: Arc<A>, n_workers: usize) -> Self {
        return Self {
            algorithm,
            n_workers: n_workers.max(1),
            progress: Arc::new(LogProgress),
            cancel: CancelToken::new(),
        };
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressObserver>) -> Self {
        self.progress = progress;
        return self;
    }

    pub fn cancel_token(&self) -> CancelToken {
        return self.cancel.clone();
    }

    /// Returns how many columns completed.
    pub fn run(&self) -> Result<usize, Error> {
        let total = self.algorithm.object_count();
        if total == 0 {
            return Ok(0);
        }

        // more workers than columns would just idle
        let n_workers = self.n_workers.min(total);
        if n_workers < self.n_workers {
            warn!(
                "reduced workers from {} to {} due to lack of input items",
                self.n_workers, n_workers
            );
        }

        let start = Instant::now();
        let algorithm = Arc::clone(&self.algorithm);
        let pool = WorkerPool::start(n_workers, n_workers * 2, move |idx: usize| {
            algorithm.run_column(idx).map(|_| true)
        });

        let prefill = (n_workers * 2).min(total);
        let mut next_idx = 0usize;
        let mut in_flight = 0usize;
        while next_idx < prefill {
            if pool.submit(next_idx) {
                in_flight += 1;
            }
            next_idx += 1;
        }

        let tick = 100 * n_workers;
        let mut completed = 0usize;
        let mut failure: Option<Error> = None;

        while in_flight > 0 {
            let result = match pool.next_completion() {
                Completion::Done(result) => result,
                Completion::Pending => {
                    continue;
                }
                Completion::PoolGone => {
                    failure = Some(Error::Engine("worker pool terminated unexpectedly".to_string()));
                    break;
                }
            };

            in_flight -= 1;
            match result {
                Ok(_) => {
                    completed += 1;
                    let more = next_idx < total && failure.is_none() && !self.cancel.is_cancelled();
                    if more && pool.submit(next_idx) {
                        next_idx += 1;
                        in_flight += 1;
                    }
                    if completed % tick == 0 {
                        self.progress.on_tick(completed);
                    }
                }
                Err(e) => {
                    if failure.is_none() {
                        failure = Some(Error::WorkUnit(Box::new(e)));
                    }
                }
            }
        }

        pool.shutdown();

        if failure.is_none() && self.cancel.is_cancelled() {
            failure = Some(Error::Interrupted);
        }

        match failure {
            Some(e) => Err(e),
            None => {
                self.progress
                    .on_finished("matrix", completed, n_workers, start.elapsed().as_secs_f64());
                Ok(completed)
            }
        }
    }
}
