//! Bounded worker pool that executes calls.
//!
//! # Design
//! Submissions go through a bounded `mpsc` queue of `max_queue` slots and are
//! drained by `max_worker` long-lived Tokio tasks sharing the receiver. Each
//! worker runs one job to completion before taking the next, so at most
//! `max_worker` calls are ever on the network. A full queue makes `submit`
//! wait rather than fail.
//!
//! Workers exit once every sender is gone, which happens when the last
//! `Client` clone is dropped.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, trace};

use crate::context::Context;
use crate::error::{Error, Result};
use crate::job::{JobState, PooledJob, SlotPool};

/// Point-in-time view of dispatcher activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Calls currently inside a network invocation.
    pub in_flight: usize,
    /// Highest `in_flight` seen since the client started.
    pub peak_in_flight: usize,
    pub completed: u64,
    pub cancelled: u64,
    /// Execution slots alive, pooled or in use.
    pub slots: usize,
}

#[derive(Debug, Default)]
pub(crate) struct DispatchCounters {
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    completed: AtomicU64,
    cancelled: AtomicU64,
}

impl DispatchCounters {
    pub(crate) fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, slots: usize) -> DispatchStats {
        DispatchStats {
            in_flight: self.in_flight.load(Ordering::SeqCst),
            peak_in_flight: self.peak_in_flight.load(Ordering::SeqCst),
            completed: self.completed.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            slots,
        }
    }
}

/// Counts one network invocation for as long as it is held.
pub(crate) struct InflightGuard<'counters> {
    counters: &'counters DispatchCounters,
}

impl<'counters> InflightGuard<'counters> {
    pub(crate) fn acquire(counters: &'counters DispatchCounters) -> Self {
        let now = counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        counters.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        Self { counters }
    }
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        self.counters.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug)]
pub(crate) struct Dispatcher {
    queue: mpsc::Sender<PooledJob>,
    pool: Arc<SlotPool>,
    counters: Arc<DispatchCounters>,
}

impl Dispatcher {
    pub(crate) fn start(http: reqwest::Client, max_worker: usize, max_queue: usize, runtime: &Handle) -> Self {
        let (queue, rx) = mpsc::channel(max_queue);
        let rx = Arc::new(Mutex::new(rx));
        let counters = Arc::new(DispatchCounters::default());

        for worker in 0..max_worker {
            runtime.spawn(worker_loop(worker, Arc::clone(&rx), http.clone(), Arc::clone(&counters)));
        }

        Self {
            queue,
            pool: SlotPool::new(max_queue + max_worker),
            counters,
        }
    }

    /// Run `request` under `ctx` and wait for its result.
    ///
    /// Returns early with a cancellation error if `ctx` ends while the call is
    /// still waiting for queue space or for a worker. Once a worker has picked
    /// the call up, the result always comes from the invoker, which drains an
    /// aborted call before reporting the cancellation.
    pub(crate) async fn submit(&self, ctx: &Context, request: reqwest::Request) -> Result<reqwest::Response> {
        let mut job = self.pool.acquire();
        let (mut receiver, state) = job.reset(ctx.clone(), request);

        tokio::select! {
            biased;
            reason = ctx.done() => return Err(Error::Cancelled(reason)),
            sent = self.queue.send(job) => sent.map_err(|_| Error::DispatcherClosed)?,
        }

        let delivered = tokio::select! {
            biased;
            reason = ctx.done() => Err(reason),
            result = &mut receiver => Ok(result),
        };
        match delivered {
            Ok(result) => result.map_err(|_| Error::DispatcherClosed)?,
            Err(reason) => {
                if state.transition(JobState::Queued, JobState::Cancelled) {
                    debug!(%reason, "call cancelled while queued");
                    self.counters.record_cancelled();
                    return Err(Error::Cancelled(reason));
                }
                // Already running: the invoker reports once the call is drained.
                receiver.await.map_err(|_| Error::DispatcherClosed)?
            }
        }
    }

    pub(crate) fn stats(&self) -> DispatchStats {
        self.counters.snapshot(self.pool.allocated())
    }
}

async fn worker_loop(
    worker: usize,
    rx: Arc<Mutex<mpsc::Receiver<PooledJob>>>,
    http: reqwest::Client,
    counters: Arc<DispatchCounters>,
) {
    loop {
        let next = {
            let mut rx = rx.lock().await;
            rx.recv().await
        };
        let Some(mut job) = next else {
            debug!(worker, "dispatch queue closed, worker exiting");
            break;
        };
        trace!(worker, "worker picked up call");
        job.run(&http, &counters).await;
    }
}
