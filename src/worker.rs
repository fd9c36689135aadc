/// Background worker for scans, repairs and map rendering

use crate::error::{ImageError, Result};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Single background thread running jobs in submission order
///
/// Dropping the worker lets queued jobs finish, then joins the thread.
pub struct Worker {
    jobs: Option<Sender<Job>>,
    thread: Option<JoinHandle<()>>,
}

impl Worker {
    /// Start the worker thread
    pub fn new() -> Result<Self> {
        let (tx, rx) = mpsc::channel::<Job>();
        let thread = thread::Builder::new()
            .name("retromount-worker".to_string())
            .spawn(move || {
                for job in rx {
                    job();
                }
                log::debug!("worker: queue closed");
            })?;

        Ok(Self {
            jobs: Some(tx),
            thread: Some(thread),
        })
    }

    /// Queue a job and get a ticket for its result
    pub fn submit<T, F>(&self, job: F) -> Pending<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let boxed: Job = Box::new(move || {
            // The ticket may have been dropped already
            let _ = tx.send(job());
        });

        if let Some(jobs) = &self.jobs {
            if jobs.send(boxed).is_err() {
                log::warn!("worker: thread gone, job dropped");
            }
        }
        Pending { rx }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.jobs.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("worker: thread panicked");
            }
        }
    }
}

/// Ticket for the result of a background job
///
/// A job that never reports back (its thread died) resolves to `Discarded`.
#[derive(Debug)]
pub struct Pending<T> {
    rx: Receiver<Result<T>>,
}

impl<T> Pending<T> {
    /// Block until the job finishes
    pub fn wait(self) -> Result<T> {
        self.rx.recv().unwrap_or(Err(ImageError::Discarded))
    }

    /// Block for at most `timeout`; `None` if the job is still running
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<T>> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Err(ImageError::Discarded)),
        }
    }

    /// Take the result if the job has finished
    pub fn try_take(&self) -> Option<Result<T>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(ImageError::Discarded)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};

    #[test]
    fn test_jobs_run_in_order() {
        let worker = Worker::new().unwrap();
        let first = worker.submit(|| Ok(1));
        let second = worker.submit(|| Ok(2));
        assert_eq!(second.wait().unwrap(), 2);
        assert_eq!(first.try_take().unwrap().unwrap(), 1);
    }

    #[test]
    fn test_errors_are_delivered() {
        let worker = Worker::new().unwrap();
        let pending = worker.submit::<(), _>(|| Err(ImageError::NoScanResult));
        assert!(matches!(pending.wait(), Err(ImageError::NoScanResult)));
    }

    #[test]
    fn test_pending_while_running() {
        let worker = Worker::new().unwrap();
        let gate = Arc::new(Barrier::new(2));
        let job_gate = gate.clone();
        let pending = worker.submit(move || {
            job_gate.wait();
            Ok("done")
        });
        assert!(pending.try_take().is_none());
        assert!(pending.wait_timeout(Duration::from_millis(10)).is_none());
        gate.wait();
        assert_eq!(pending.wait().unwrap(), "done");
    }

    #[test]
    fn test_drop_drains_queue() {
        let worker = Worker::new().unwrap();
        let pending = worker.submit(|| Ok(7));
        drop(worker);
        assert_eq!(pending.wait().unwrap(), 7);
    }
}
