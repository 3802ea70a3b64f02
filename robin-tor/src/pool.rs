//! Bounded worker pool
//!
//! A fixed number of tokio tasks drain a shared job queue. A [`HaltLatch`]
//! lets the single collector stop new jobs from being picked up; jobs still
//! queued when the latch closes are handed back to the caller untouched.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;
use tracing::trace;

use crate::OrchestratorError;

/// One-way latch: once closed it stays closed for the run
///
/// Closing and taking a job from the queue serialise on a shared gate, so no
/// job is handed out after `close` has returned.
#[derive(Debug)]
pub struct HaltLatch {
    tx: watch::Sender<bool>,
    gate: Arc<Mutex<()>>,
}

impl Default for HaltLatch {
    fn default() -> Self {
        Self::new()
    }
}

impl HaltLatch {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            tx,
            gate: Arc::new(Mutex::new(())),
        }
    }

    /// Close the latch; returns `true` only for the call that closed it
    pub fn close(&self) -> bool {
        let _gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        self.tx.send_if_modified(|halted| {
            if *halted {
                false
            } else {
                *halted = true;
                true
            }
        })
    }

    pub fn signal(&self) -> HaltSignal {
        HaltSignal {
            rx: self.tx.subscribe(),
            gate: Arc::clone(&self.gate),
        }
    }
}

/// Worker side of a [`HaltLatch`]
#[derive(Debug, Clone)]
pub struct HaltSignal {
    rx: watch::Receiver<bool>,
    gate: Arc<Mutex<()>>,
}

impl HaltSignal {
    pub fn is_halted(&self) -> bool {
        *self.rx.borrow()
    }

    /// Run `take` unless the latch is closed, atomically with respect to `close`
    pub fn unless_halted<T>(&self, take: impl FnOnce() -> Option<T>) -> Option<T> {
        let _gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        if self.is_halted() {
            None
        } else {
            take()
        }
    }

    /// Resolves once the latch closes; never resolves otherwise
    pub async fn halted(&mut self) {
        if self.rx.wait_for(|halted| *halted).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Fixed-size pool of workers
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        Self { size: size.max(1) }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Run `work` over every job with at most `size` jobs in flight
    ///
    /// Returns the jobs that were never started because `halt` fired.
    pub async fn run<J, F, Fut>(
        &self,
        jobs: Vec<J>,
        halt: HaltSignal,
        work: F,
    ) -> Result<Vec<J>, OrchestratorError>
    where
        J: Send + 'static,
        F: Fn(J) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if jobs.is_empty() {
            return Ok(Vec::new());
        }

        let workers = self.size.min(jobs.len());
        let queue = Arc::new(Mutex::new(VecDeque::from(jobs)));
        let work = Arc::new(work);

        let handles: Vec<_> = (0..workers)
            .map(|worker| {
                let queue = Arc::clone(&queue);
                let work = Arc::clone(&work);
                let halt = halt.clone();
                tokio::spawn(async move {
                    loop {
                        let job = halt.unless_halted(|| {
                            queue
                                .lock()
                                .unwrap_or_else(PoisonError::into_inner)
                                .pop_front()
                        });
                        let Some(job) = job else {
                            trace!(worker, halted = halt.is_halted(), "leaving queue");
                            break;
                        };
                        work(job).await;
                    }
                })
            })
            .collect();

        let mut panicked = None;
        for joined in futures::future::join_all(handles).await {
            if let Err(e) = joined {
                panicked = Some(e.to_string());
            }
        }
        if let Some(msg) = panicked {
            return Err(OrchestratorError::Internal(format!("worker failed: {msg}")));
        }

        let remaining = queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        Ok(remaining)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_runs_every_job() {
        let done = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&done);
        let latch = HaltLatch::new();

        let skipped = WorkerPool::new(3)
            .run((0..10).collect(), latch.signal(), move |_job: u32| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            })
            .await
            .unwrap();

        assert!(skipped.is_empty());
        assert_eq!(done.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (f, p) = (Arc::clone(&in_flight), Arc::clone(&peak));
        let latch = HaltLatch::new();

        WorkerPool::new(2)
            .run((0..8).collect(), latch.signal(), move |_job: u32| {
                let (in_flight, peak) = (Arc::clone(&f), Arc::clone(&p));
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                }
            })
            .await
            .unwrap();

        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_halt_returns_unstarted_jobs() {
        let latch = Arc::new(HaltLatch::new());
        let closer = Arc::clone(&latch);

        let skipped = WorkerPool::new(1)
            .run(vec![1, 2, 3, 4], latch.signal(), move |job: u32| {
                let closer = Arc::clone(&closer);
                async move {
                    if job == 2 {
                        closer.close();
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(skipped, vec![3, 4]);
    }

    #[tokio::test]
    async fn test_latch_closes_once() {
        let latch = HaltLatch::new();
        let mut signal = latch.signal();
        assert!(!signal.is_halted());
        assert!(latch.close());
        assert!(!latch.close());
        signal.halted().await;
        assert!(signal.is_halted());
    }

    #[test]
    fn test_closed_latch_hands_out_nothing() {
        let latch = HaltLatch::new();
        let signal = latch.signal();
        let mut queue: VecDeque<u32> = VecDeque::from(vec![1, 2, 3]);

        assert_eq!(signal.unless_halted(|| queue.pop_front()), Some(1));
        latch.close();
        assert_eq!(signal.unless_halted(|| queue.pop_front()), None);
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_no_job_taken_after_close_returns() {
        // Several workers race for the queue while one job closes the latch;
        // every job taken must have been taken before close returned.
        let latch = Arc::new(HaltLatch::new());
        let closed = Arc::new(AtomicBool::new(false));
        let late = Arc::new(AtomicUsize::new(0));
        let (closer, flag, counter) = (Arc::clone(&latch), Arc::clone(&closed), Arc::clone(&late));

        let skipped = WorkerPool::new(4)
            .run((0..200).collect(), latch.signal(), move |job: u32| {
                let (closer, flag, counter) = (Arc::clone(&closer), Arc::clone(&flag), Arc::clone(&counter));
                async move {
                    if flag.load(Ordering::SeqCst) {
                        counter.fetch_add(1, Ordering::SeqCst);
                    }
                    if job == 20 {
                        closer.close();
                        flag.store(true, Ordering::SeqCst);
                    }
                    tokio::task::yield_now().await;
                }
            })
            .await
            .unwrap();

        assert!(!skipped.is_empty());
        assert!(late.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_worker_panic_is_internal_error() {
        let latch = HaltLatch::new();
        let err = WorkerPool::new(2)
            .run(vec![1u32, 2], latch.signal(), |job: u32| async move {
                if job == 1 {
                    panic!("boom");
                }
            })
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Internal(_)));
    }
}
