//! Execution slots and the pool they are recycled through.
//!
//! # Design
//! A `Job` holds everything one call needs while it waits for and occupies a
//! worker: the caller's context, the prepared request, and the sending half
//! of a oneshot result channel. `reset` installs a fresh channel every time,
//! so a receiver from an earlier activation can never observe a later result.
//!
//! Jobs live in a `SlotPool` free list and are handed out as `PooledJob`
//! guards. The guard is moved caller -> queue -> worker, so exactly one party
//! owns a slot at any moment, and dropping the guard returns the slot to the
//! pool. The only handle that outlives a hand-off is the activation's
//! `JobState` cell. `reset` allocates a new cell each time, so a caller still
//! holding the cell of a finished activation cannot move the slot's next one.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

use crate::context::Context;
use crate::dispatch::DispatchCounters;
use crate::error::{Error, Result};
use crate::invoke::invoke;

pub(crate) type JobResult = Result<reqwest::Response>;

/// Lifecycle of one activation. `Idle` only while the slot sits in the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum JobState {
    Idle = 0,
    Queued = 1,
    Running = 2,
    Completed = 3,
    Cancelled = 4,
}

impl JobState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Queued,
            2 => Self::Running,
            3 => Self::Completed,
            4 => Self::Cancelled,
            _ => Self::Idle,
        }
    }
}

#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    fn new() -> Self {
        Self(AtomicU8::new(JobState::Idle as u8))
    }

    pub(crate) fn load(&self) -> JobState {
        JobState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn store(&self, state: JobState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// Move from `from` to `to`; false if another party moved first.
    pub(crate) fn transition(&self, from: JobState, to: JobState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

#[derive(Debug)]
pub(crate) struct Job {
    ctx: Option<Context>,
    request: Option<reqwest::Request>,
    result: Option<oneshot::Sender<JobResult>>,
    state: Arc<StateCell>,
}

impl Job {
    fn new() -> Self {
        Self {
            ctx: None,
            request: None,
            result: None,
            state: Arc::new(StateCell::new()),
        }
    }

    /// Prepare the slot for a new activation and hand back the only receiver
    /// for its result together with the activation's state cell. Any previous
    /// channel and cell are discarded.
    pub(crate) fn reset(
        &mut self,
        ctx: Context,
        request: reqwest::Request,
    ) -> (oneshot::Receiver<JobResult>, Arc<StateCell>) {
        let (tx, rx) = oneshot::channel();
        self.ctx = Some(ctx);
        self.request = Some(request);
        self.result = Some(tx);
        self.state = Arc::new(StateCell::new());
        self.state.store(JobState::Queued);
        (rx, Arc::clone(&self.state))
    }

    /// Execute the activation once and deliver its result. A slot whose
    /// caller already gave up while it was queued is skipped.
    pub(crate) async fn run(&mut self, http: &reqwest::Client, counters: &DispatchCounters) {
        let (Some(ctx), Some(request), Some(result)) = (self.ctx.take(), self.request.take(), self.result.take())
        else {
            return;
        };

        if !self.state.transition(JobState::Queued, JobState::Running) {
            debug!(url = %request.url(), "skipping call cancelled while queued");
            return;
        }

        let outcome = invoke(http, &ctx, request, counters).await;
        let terminal = match &outcome {
            Err(Error::Cancelled(_)) => {
                counters.record_cancelled();
                JobState::Cancelled
            }
            _ => {
                counters.record_completed();
                JobState::Completed
            }
        };
        self.state.store(terminal);

        if let Err(unclaimed) = result.send(outcome) {
            // Caller is gone; drop the response here so its connection is released.
            if let Ok(response) = unclaimed {
                debug!(status = %response.status(), "discarding response for abandoned call");
                drop(response);
            }
        }
    }

    fn clear(&mut self) {
        self.ctx = None;
        self.request = None;
        self.result = None;
        self.state.store(JobState::Idle);
    }
}

/// Free list of reusable jobs.
#[derive(Debug)]
pub(crate) struct SlotPool {
    free: Mutex<Vec<Box<Job>>>,
    capacity: usize,
    allocated: AtomicUsize,
}

impl SlotPool {
    pub(crate) fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            free: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
            allocated: AtomicUsize::new(0),
        })
    }

    pub(crate) fn acquire(self: &Arc<Self>) -> PooledJob {
        let job = match self.free.lock().pop() {
            Some(job) => job,
            None => {
                self.allocated.fetch_add(1, Ordering::Relaxed);
                Box::new(Job::new())
            }
        };
        PooledJob {
            job: Some(job),
            pool: Arc::clone(self),
        }
    }

    fn release(&self, mut job: Box<Job>) {
        job.clear();
        let mut free = self.free.lock();
        if free.len() < self.capacity {
            free.push(job);
        } else {
            self.allocated.fetch_sub(1, Ordering::Relaxed);
        }
    }

    /// Slots currently alive, pooled or in use.
    pub(crate) fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    fn idle(&self) -> usize {
        self.free.lock().len()
    }
}

/// Exclusive handle on a pooled job; returns it to the pool on drop.
#[derive(Debug)]
pub(crate) struct PooledJob {
    job: Option<Box<Job>>,
    pool: Arc<SlotPool>,
}

impl Deref for PooledJob {
    type Target = Job;

    fn deref(&self) -> &Job {
        self.job.as_deref().unwrap_or_else(|| unreachable!("job taken before drop"))
    }
}

impl DerefMut for PooledJob {
    fn deref_mut(&mut self) -> &mut Job {
        self.job.as_deref_mut().unwrap_or_else(|| unreachable!("job taken before drop"))
    }
}

impl Drop for PooledJob {
    fn drop(&mut self) {
        if let Some(job) = self.job.take() {
            self.pool.release(job);
        }
    }
}
