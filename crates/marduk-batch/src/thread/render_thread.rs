use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::error::{BatchError, Result};

pub type RenderJob = Box<dyn FnOnce() + Send + 'static>;

/// Render-thread primitives provided by the frame driver.
pub trait RenderThreadHost: Send + Sync {
    fn is_render_thread(&self) -> bool;

    /// Queues `job` to run on the render thread after all previously queued jobs.
    fn run_on_render_thread(&self, job: RenderJob);
}

/// FIFO job queue bound to the thread that created it.
///
/// The owning thread drains it with [`run_pending`](Self::run_pending),
/// typically once per frame.
pub struct RenderThreadQueue {
    owner: ThreadId,
    tx: Sender<RenderJob>,
    rx: Receiver<RenderJob>,
}

impl RenderThreadQueue {
    /// Creates a queue owned by the calling thread.
    pub fn new() -> Arc<Self> {
        let (tx, rx) = crossbeam_channel::unbounded();
        Arc::new(Self {
            owner: thread::current().id(),
            tx,
            rx,
        })
    }

    /// Runs every queued job, in submission order. Returns how many ran.
    ///
    /// # Panics
    /// If called off the owning thread.
    pub fn run_pending(&self) -> usize {
        assert!(
            self.is_render_thread(),
            "RenderThreadQueue::run_pending called off the render thread"
        );
        let mut ran = 0;
        while let Ok(job) = self.rx.try_recv() {
            job();
            ran += 1;
        }
        ran
    }

    #[inline]
    pub fn pending(&self) -> usize {
        self.rx.len()
    }
}

impl RenderThreadHost for RenderThreadQueue {
    fn is_render_thread(&self) -> bool {
        thread::current().id() == self.owner
    }

    fn run_on_render_thread(&self, job: RenderJob) {
        // The queue holds its own receiver, so sending cannot fail while `self` lives.
        let _ = self.tx.send(job);
    }
}

/// Runs `job` on the render thread and waits for its result.
///
/// On the render thread itself the job runs inline. Otherwise the caller
/// blocks until the job completes; with `wait = Some(d)` it gives up after `d`
/// with [`BatchError::RenderThreadStalled`] (the job may still run later).
/// A job dropped without running yields [`BatchError::RenderThreadGone`].
pub fn block_on_render_thread<T, F>(
    host: &dyn RenderThreadHost,
    job: F,
    wait: Option<Duration>,
) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    if host.is_render_thread() {
        return Ok(job());
    }

    let (tx, rx) = crossbeam_channel::bounded(1);
    host.run_on_render_thread(Box::new(move || {
        let _ = tx.send(job());
    }));

    match wait {
        None => rx.recv().map_err(|_| BatchError::RenderThreadGone),
        Some(limit) => rx.recv_timeout(limit).map_err(|err| match err {
            RecvTimeoutError::Timeout => {
                log::error!("render thread did not answer within {limit:?}");
                BatchError::RenderThreadStalled(limit)
            }
            RecvTimeoutError::Disconnected => BatchError::RenderThreadGone,
        }),
    }
}
