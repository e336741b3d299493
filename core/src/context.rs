//! Cancellation contexts bound to individual calls.
//!
//! # Design
//! A `Context` is a set of cancellation signals plus an optional deadline.
//! Deriving a context copies the parent's signals and keeps the earlier of
//! the two deadlines, so cancelling a parent ends every descendant while a
//! child can only ever shorten its own lifetime. Signals are
//! `tokio::sync::watch` channels flipped to `true` once; a dropped
//! `CancelHandle` that never fired leaves its contexts running.

use std::future::pending;
use std::time::Duration;

use futures_util::future::select_all;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};

/// Why a context ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Cancellation {
    #[error("context canceled")]
    Canceled,
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

#[derive(Debug, Clone, Default)]
pub struct Context {
    signals: Vec<watch::Receiver<bool>>,
    deadline: Option<Instant>,
}

/// Cancels the context returned alongside it by [`Context::with_cancel`].
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Context {
    /// A context that never ends.
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_cancel(&self) -> (Context, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        let mut child = self.clone();
        child.signals.push(rx);
        (child, CancelHandle { tx })
    }

    pub fn with_timeout(&self, timeout: Duration) -> Context {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(&self, deadline: Instant) -> Context {
        let mut child = self.clone();
        child.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        child
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Current state without waiting. Explicit cancellation is reported ahead
    /// of an expired deadline.
    pub fn err(&self) -> Option<Cancellation> {
        if self.signals.iter().any(|rx| *rx.borrow()) {
            return Some(Cancellation::Canceled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(Cancellation::DeadlineExceeded),
            _ => None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// Resolves once the context is cancelled or its deadline passes. Never
    /// resolves for a background context.
    pub async fn done(&self) -> Cancellation {
        if let Some(reason) = self.err() {
            return reason;
        }

        let cancelled = async {
            if self.signals.is_empty() {
                return pending::<()>().await;
            }
            let waits = self.signals.iter().map(|rx| {
                let mut rx = rx.clone();
                Box::pin(async move {
                    let fired = rx.wait_for(|cancelled| *cancelled).await.is_ok();
                    if !fired {
                        // Handle dropped without cancelling.
                        pending::<()>().await;
                    }
                })
            });
            select_all(waits).await;
        };
        let expired = async {
            match self.deadline {
                Some(deadline) => sleep_until(deadline).await,
                None => pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            () = cancelled => Cancellation::Canceled,
            () = expired => Cancellation::DeadlineExceeded,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn background_is_never_done() {
        let ctx = Context::background();
        assert_eq!(ctx.err(), None);
        assert!(ctx.deadline().is_none());
    }

    #[tokio::test]
    async fn cancel_ends_context_and_descendants() {
        let (parent, cancel) = Context::background().with_cancel();
        let (child, _child_cancel) = parent.with_cancel();
        let grandchild = child.with_timeout(Duration::from_secs(60));

        let waiter = tokio::spawn(async move { grandchild.done().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();

        assert_eq!(waiter.await.unwrap(), Cancellation::Canceled);
        assert_eq!(parent.err(), Some(Cancellation::Canceled));
        assert_eq!(child.err(), Some(Cancellation::Canceled));
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn child_cancel_does_not_reach_parent() {
        let (parent, _cancel) = Context::background().with_cancel();
        let (child, child_cancel) = parent.with_cancel();
        child_cancel.cancel();
        assert!(child.is_done());
        assert!(!parent.is_done());
    }

    #[tokio::test]
    async fn deadline_expires() {
        let ctx = Context::background().with_timeout(Duration::from_millis(20));
        assert_eq!(ctx.err(), None);
        assert_eq!(ctx.done().await, Cancellation::DeadlineExceeded);
        assert_eq!(ctx.err(), Some(Cancellation::DeadlineExceeded));
    }

    #[tokio::test]
    async fn child_keeps_earlier_deadline() {
        let parent = Context::background().with_timeout(Duration::from_millis(10));
        let child = parent.with_timeout(Duration::from_secs(60));
        assert_eq!(child.deadline(), parent.deadline());
        assert_eq!(child.done().await, Cancellation::DeadlineExceeded);
    }

    #[tokio::test]
    async fn explicit_cancel_reported_over_expired_deadline() {
        let (ctx, cancel) = Context::background()
            .with_timeout(Duration::from_millis(1))
            .with_cancel();
        tokio::time::sleep(Duration::from_millis(5)).await;
        cancel.cancel();
        assert_eq!(ctx.err(), Some(Cancellation::Canceled));
    }

    #[tokio::test]
    async fn dropped_handle_leaves_context_running() {
        let (ctx, cancel) = Context::background().with_cancel();
        drop(cancel);
        let ctx = ctx.with_timeout(Duration::from_millis(20));
        assert_eq!(ctx.done().await, Cancellation::DeadlineExceeded);
    }
}
