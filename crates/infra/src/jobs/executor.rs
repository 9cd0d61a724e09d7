//! Bounded worker pool with a delay queue for backoff retries.
//!
//! A dispatcher thread owns the delay queue and forwards due job ids to a
//! fixed set of worker threads. Callers only ever hold a [`JobQueue`].

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use orgflags_core::JobId;

use crate::config::PropagationConfig;

use super::error::JobError;
use super::types::JobOutcome;

/// Upper bound for a single scheduling delay; keeps `Instant` arithmetic in range.
const MAX_SCHEDULE_DELAY: Duration = Duration::from_secs(60 * 60 * 24 * 365);

#[derive(Debug)]
enum Dispatch {
    Now(JobId),
    At(JobId, Instant),
    Shutdown,
}

/// Submission side of the executor.
#[derive(Debug, Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<Dispatch>,
}

/// The executor has shut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("job queue is closed")]
pub struct QueueClosed;

impl JobQueue {
    /// Run the job as soon as a worker is free.
    pub fn submit(&self, job_id: JobId) -> Result<(), QueueClosed> {
        self.tx.send(Dispatch::Now(job_id)).map_err(|_| QueueClosed)
    }

    /// Run the job once `delay` has elapsed; no worker is held while waiting.
    pub fn submit_after(&self, job_id: JobId, delay: Duration) -> Result<(), QueueClosed> {
        if delay.is_zero() {
            return self.submit(job_id);
        }
        let due = Instant::now() + delay.min(MAX_SCHEDULE_DELAY);
        self.tx.send(Dispatch::At(job_id, due)).map_err(|_| QueueClosed)
    }
}

/// Executor runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct ExecutorStats {
    pub jobs_processed: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub retries_scheduled: u64,
    /// Runs that ended in an error without reaching a terminal job state
    pub jobs_aborted: u64,
    pub current_running: usize,
    /// Retries waiting for their backoff to elapse
    pub delayed: usize,
}

/// Handle to control a running executor.
#[derive(Debug)]
pub struct JobExecutorHandle {
    queue: JobQueue,
    dispatcher: Option<thread::JoinHandle<()>>,
    workers: Vec<thread::JoinHandle<()>>,
    stats: Arc<Mutex<ExecutorStats>>,
}

impl JobExecutorHandle {
    /// Stop accepting work and wait for running jobs to finish.
    ///
    /// Jobs already handed to workers still run; retries still waiting on
    /// their backoff are dropped and stay PENDING in the store.
    pub fn shutdown(mut self) {
        let _ = self.queue.tx.send(Dispatch::Shutdown);
        if let Some(dispatcher) = self.dispatcher.take() {
            let _ = dispatcher.join();
        }
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }

    /// Get current executor statistics.
    pub fn stats(&self) -> ExecutorStats {
        lock(&self.stats).clone()
    }
}

/// Fixed-size pool executing propagation jobs by id.
#[derive(Debug)]
pub struct JobExecutor {
    name: String,
    workers: usize,
    rx: mpsc::Receiver<Dispatch>,
    queue: JobQueue,
}

impl JobExecutor {
    /// Create the executor and the queue that feeds it.
    ///
    /// Jobs submitted before [`JobExecutor::spawn`] are kept and run once the
    /// pool starts.
    pub fn new(config: &PropagationConfig) -> (Self, JobQueue) {
        let (tx, rx) = mpsc::channel();
        let queue = JobQueue { tx };
        let executor = Self {
            name: config.name.clone(),
            workers: config.workers.max(1),
            rx,
            queue: queue.clone(),
        };
        (executor, queue)
    }

    /// Start the dispatcher and worker threads.
    pub fn spawn<H>(self, handler: H) -> JobExecutorHandle
    where
        H: Fn(JobId) -> Result<JobOutcome, JobError> + Send + Sync + 'static,
    {
        let JobExecutor {
            name,
            workers: worker_count,
            rx,
            queue,
        } = self;

        let stats = Arc::new(Mutex::new(ExecutorStats::default()));
        let handler = Arc::new(handler);
        let (work_tx, work_rx) = mpsc::channel::<JobId>();
        let work_rx = Arc::new(Mutex::new(work_rx));

        let mut workers = Vec::with_capacity(worker_count);
        for index in 0..worker_count {
            let worker_name = format!("{name}-worker-{index}");
            let work_rx = work_rx.clone();
            let handler = handler.clone();
            let stats = stats.clone();
            let join = thread::Builder::new()
                .name(worker_name.clone())
                .spawn(move || worker_loop(&worker_name, &work_rx, &*handler, &stats))
                .expect("failed to spawn propagation worker thread");
            workers.push(join);
        }

        let dispatcher_stats = stats.clone();
        let dispatcher_name = name.clone();
        let dispatcher = thread::Builder::new()
            .name(format!("{name}-dispatcher"))
            .spawn(move || dispatcher_loop(&dispatcher_name, rx, work_tx, &dispatcher_stats))
            .expect("failed to spawn job dispatcher thread");

        info!(executor = %name, workers = worker_count, "job executor started");

        JobExecutorHandle {
            queue,
            dispatcher: Some(dispatcher),
            workers,
            stats,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn dispatcher_loop(
    name: &str,
    rx: mpsc::Receiver<Dispatch>,
    work_tx: mpsc::Sender<JobId>,
    stats: &Mutex<ExecutorStats>,
) {
    let mut delayed: BinaryHeap<Reverse<(Instant, JobId)>> = BinaryHeap::new();

    'dispatch: loop {
        let message = match delayed.peek() {
            Some(Reverse((due, _))) => {
                rx.recv_timeout(due.saturating_duration_since(Instant::now()))
            }
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        match message {
            Ok(Dispatch::Now(job_id)) => {
                if work_tx.send(job_id).is_err() {
                    break 'dispatch;
                }
            }
            Ok(Dispatch::At(job_id, due)) => {
                debug!(executor = %name, job_id = %job_id, "job parked until due");
                delayed.push(Reverse((due, job_id)));
            }
            Ok(Dispatch::Shutdown) | Err(RecvTimeoutError::Disconnected) => break 'dispatch,
            Err(RecvTimeoutError::Timeout) => {}
        }

        let now = Instant::now();
        while let Some(&Reverse((due, job_id))) = delayed.peek() {
            if due > now {
                break;
            }
            delayed.pop();
            if work_tx.send(job_id).is_err() {
                break 'dispatch;
            }
        }

        lock(stats).delayed = delayed.len();
    }

    if !delayed.is_empty() {
        warn!(
            executor = %name,
            dropped = delayed.len(),
            "dispatcher stopped with delayed jobs still waiting"
        );
    }
    lock(stats).delayed = 0;
    info!(executor = %name, "job dispatcher stopped");
}

fn worker_loop<H>(name: &str, jobs: &Mutex<mpsc::Receiver<JobId>>, handler: &H, stats: &Mutex<ExecutorStats>)
where
    H: Fn(JobId) -> Result<JobOutcome, JobError>,
{
    debug!(worker = %name, "propagation worker started");

    loop {
        let next = {
            let rx = lock(jobs);
            rx.recv()
        };
        let Ok(job_id) = next else {
            break;
        };

        lock(stats).current_running += 1;
        let result = handler(job_id);

        {
            let mut s = lock(stats);
            s.current_running = s.current_running.saturating_sub(1);
            s.jobs_processed += 1;
            match &result {
                Ok(JobOutcome::Completed { .. }) => s.jobs_completed += 1,
                Ok(JobOutcome::RetryScheduled { .. }) => s.retries_scheduled += 1,
                Ok(JobOutcome::Failed { .. }) => s.jobs_failed += 1,
                Err(_) => s.jobs_aborted += 1,
            }
        }

        if let Err(e) = result {
            error!(worker = %name, job_id = %job_id, error = %e, "job execution aborted");
        }
    }

    debug!(worker = %name, "propagation worker stopped");
}
