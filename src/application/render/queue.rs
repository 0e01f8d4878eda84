//! Admission control for pipeline runs.
//!
//! At most `concurrency` jobs run at once. Excess submissions wait in a FIFO
//! line and are admitted in submission order as slots free up. Jobs run on
//! detached tasks: dropping the [`JobHandle`] does not cancel the job.

use std::{
    collections::VecDeque,
    future::Future,
    num::NonZeroUsize,
    pin::Pin,
    sync::{Arc, Mutex},
    task::{Context, Poll},
    time::Instant,
};

use futures::FutureExt;
use metrics::{gauge, histogram};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, error};
use uuid::Uuid;

use crate::util::lock::mutex_lock;

const SOURCE: &str = "render::queue";

pub(crate) const METRIC_QUEUE_QUEUED: &str = "tikzrender_queue_queued";
pub(crate) const METRIC_QUEUE_RUNNING: &str = "tikzrender_queue_running";
pub(crate) const METRIC_QUEUE_WAIT_MS: &str = "tikzrender_queue_wait_ms";

pub const DEFAULT_CONCURRENCY: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("queued job ended without delivering a result")]
    Aborted,
}

/// Snapshot of the scheduler taken under its lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub queued: usize,
    pub running: usize,
    pub concurrency: usize,
}

#[derive(Clone)]
pub struct CompilationQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    concurrency: usize,
    state: Mutex<QueueState>,
}

#[derive(Default)]
struct QueueState {
    waiting: VecDeque<oneshot::Sender<Slot>>,
    running: usize,
}

/// One unit of the admission gate. Dropping it frees the slot, or hands it
/// straight to the oldest waiter.
struct Slot {
    queue: Option<Arc<QueueInner>>,
}

impl Drop for Slot {
    fn drop(&mut self) {
        if let Some(queue) = self.queue.take() {
            queue.release();
        }
    }
}

enum Admission {
    Immediate(Slot),
    Queued(oneshot::Receiver<Slot>),
}

impl QueueInner {
    fn admit(self: &Arc<Self>) -> Admission {
        let mut state = mutex_lock(&self.state, SOURCE, "admit");
        let admission = if state.running < self.concurrency && state.waiting.is_empty() {
            state.running += 1;
            Admission::Immediate(Slot {
                queue: Some(Arc::clone(self)),
            })
        } else {
            let (tx, rx) = oneshot::channel();
            state.waiting.push_back(tx);
            Admission::Queued(rx)
        };
        publish(&state);
        admission
    }

    fn release(self: Arc<Self>) {
        let mut state = mutex_lock(&self.state, SOURCE, "release");
        while let Some(waiter) = state.waiting.pop_front() {
            let slot = Slot {
                queue: Some(Arc::clone(&self)),
            };
            match waiter.send(slot) {
                Ok(()) => {
                    publish(&state);
                    return;
                }
                // The waiter is gone; disarm the returned slot so it does not
                // re-enter release while the lock is held, then try the next.
                Err(mut slot) => slot.queue = None,
            }
        }
        state.running = state.running.saturating_sub(1);
        publish(&state);
    }

    fn stats(&self) -> QueueStats {
        let state = mutex_lock(&self.state, SOURCE, "stats");
        QueueStats {
            queued: state.waiting.len(),
            running: state.running,
            concurrency: self.concurrency,
        }
    }
}

fn publish(state: &QueueState) {
    gauge!(METRIC_QUEUE_QUEUED).set(state.waiting.len() as f64);
    gauge!(METRIC_QUEUE_RUNNING).set(state.running as f64);
}

impl CompilationQueue {
    pub fn new(concurrency: NonZeroUsize) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                concurrency: concurrency.get(),
                state: Mutex::new(QueueState::default()),
            }),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.inner.concurrency
    }

    pub fn stats(&self) -> QueueStats {
        self.inner.stats()
    }

    /// Submit a job. It starts immediately when a slot is free, otherwise after
    /// every earlier submission has been admitted. The handle resolves exactly
    /// once with the job's outcome; a panicking job resolves it with
    /// [`QueueError::Aborted`] converted into `E`.
    pub fn add<F, Fut, T, E>(&self, job: F) -> JobHandle<T, E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: From<QueueError> + Send + 'static,
    {
        let job_id = Uuid::new_v4();
        let submitted_at = Instant::now();
        let admission = self.inner.admit();
        let (tx, rx) = oneshot::channel();

        let state = match admission {
            Admission::Immediate(_) => "running",
            Admission::Queued(_) => "queued",
        };
        debug!(
            target = "tikzrender::render::queue",
            op = "queue::add",
            job_id = %job_id,
            state,
            "Job submitted"
        );

        tokio::spawn(async move {
            let slot = match admission {
                Admission::Immediate(slot) => slot,
                Admission::Queued(rx) => match rx.await {
                    Ok(slot) => slot,
                    Err(_) => return,
                },
            };
            let waited_ms = submitted_at.elapsed().as_millis() as u64;
            histogram!(METRIC_QUEUE_WAIT_MS).record(waited_ms as f64);
            debug!(
                target = "tikzrender::render::queue",
                op = "queue::run",
                job_id = %job_id,
                state = "running",
                waited_ms,
                "Job admitted"
            );

            let outcome = std::panic::AssertUnwindSafe(job()).catch_unwind().await;
            drop(slot);

            let result = match outcome {
                Ok(result) => {
                    let state = if result.is_ok() { "completed" } else { "failed" };
                    debug!(
                        target = "tikzrender::render::queue",
                        op = "queue::run",
                        job_id = %job_id,
                        state,
                        elapsed_ms = submitted_at.elapsed().as_millis() as u64,
                        "Job finished"
                    );
                    result
                }
                Err(_) => {
                    error!(
                        target = "tikzrender::render::queue",
                        op = "queue::run",
                        job_id = %job_id,
                        state = "failed",
                        "Job panicked"
                    );
                    Err(E::from(QueueError::Aborted))
                }
            };
            let _ = tx.send(result);
        });

        JobHandle { rx }
    }
}

/// Single-resolution result slot for one submitted job.
pub struct JobHandle<T, E> {
    rx: oneshot::Receiver<Result<T, E>>,
}

impl<T, E: From<QueueError>> Future for JobHandle<T, E> {
    type Output = Result<T, E>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or_else(|_| Err(E::from(QueueError::Aborted))))
    }
}
