// ABOUTME: The single process-wide worker that performs all store file I/O in FIFO order.
// ABOUTME: A dedicated OS thread drains a tokio channel; callers await results through oneshot replies.

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::thread;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Returned when a job is submitted after the worker thread has exited.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("io worker has stopped")]
pub struct WorkerStopped;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Cloneable handle for submitting jobs to the I/O worker. The worker thread
/// exits once every handle has been dropped and the queue is drained.
#[derive(Debug, Clone)]
pub struct IoWorkerHandle {
    job_tx: mpsc::UnboundedSender<Job>,
}

impl IoWorkerHandle {
    /// Enqueue `job` and return a receiver for its result. The job is queued
    /// before this returns, so submission order is execution order even if
    /// the receiver is awaited later or never.
    pub fn submit<F, T>(&self, job: F) -> Result<oneshot::Receiver<T>, WorkerStopped>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let boxed: Job = Box::new(move || {
            // Ignore send error — the caller may have dropped their receiver
            let _ = reply_tx.send(job());
        });
        self.job_tx.send(boxed).map_err(|_| WorkerStopped)?;
        Ok(reply_rx)
    }

    pub fn is_running(&self) -> bool {
        !self.job_tx.is_closed()
    }
}

/// Spawn the I/O worker thread and return a handle to it.
pub fn spawn() -> io::Result<IoWorkerHandle> {
    let (job_tx, job_rx) = mpsc::unbounded_channel::<Job>();

    thread::Builder::new()
        .name("strongbox-io".to_string())
        .spawn(move || run(job_rx))?;

    Ok(IoWorkerHandle { job_tx })
}

fn run(mut job_rx: mpsc::UnboundedReceiver<Job>) {
    tracing::debug!("io worker started");
    while let Some(job) = job_rx.blocking_recv() {
        // A panicking job drops its reply sender; the caller sees a closed
        // channel and the worker keeps serving everyone else.
        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
            tracing::error!("io worker job panicked");
        }
    }
    tracing::debug!("io worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[tokio::test]
    async fn jobs_run_in_submission_order() {
        let worker = spawn().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let receivers: Vec<_> = (0..50)
            .map(|i| {
                let seen = Arc::clone(&seen);
                worker
                    .submit(move || {
                        seen.lock().unwrap().push(i);
                        i
                    })
                    .unwrap()
            })
            .collect();

        // Await in reverse to show completion order does not depend on awaiting
        for (i, rx) in receivers.into_iter().enumerate().rev() {
            assert_eq!(rx.await.unwrap(), i);
        }

        assert_eq!(*seen.lock().unwrap(), (0..50).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn all_jobs_share_one_thread() {
        let worker = spawn().unwrap();
        let a = worker
            .submit(|| thread::current().name().map(str::to_string))
            .unwrap();
        let b = worker.clone().submit(|| thread::current().id()).unwrap();
        let c = worker.submit(|| thread::current().id()).unwrap();

        assert_eq!(a.await.unwrap().as_deref(), Some("strongbox-io"));
        assert_eq!(b.await.unwrap(), c.await.unwrap());
    }

    #[tokio::test]
    async fn survives_a_panicking_job() {
        let worker = spawn().unwrap();

        let bad = worker.submit(|| -> u8 { panic!("boom") }).unwrap();
        assert!(bad.await.is_err());

        let good = worker.submit(|| 5u8).unwrap();
        assert_eq!(good.await.unwrap(), 5);
    }

    #[tokio::test]
    async fn dropped_receiver_still_runs_job() {
        let worker = spawn().unwrap();
        let flag = Arc::new(Mutex::new(false));

        let flag_in_job = Arc::clone(&flag);
        drop(worker.submit(move || *flag_in_job.lock().unwrap() = true).unwrap());

        // A later job on the FIFO queue observes the earlier one's effect
        let check = Arc::clone(&flag);
        let observed = worker.submit(move || *check.lock().unwrap()).unwrap();
        assert!(tokio::time::timeout(Duration::from_secs(5), observed)
            .await
            .unwrap()
            .unwrap());
    }
}
