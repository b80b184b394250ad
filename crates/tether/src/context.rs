//! Cancellation and deadlines for database calls.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use crate::error::QueryFailure;

#[derive(Debug, Default)]
struct CancelSignal {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Carries a cancellation signal and an optional deadline into every query.
///
/// Clones and derived contexts share the cancellation signal, so cancelling
/// any of them cancels all of them. Deadlines only ever tighten.
///
/// # Example
///
/// ```ignore
/// let ctx = Context::background().with_timeout(Duration::from_secs(2));
/// let books = Book::objects().all().with(["Author"]).execute(&ctx, &db).await?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct Context {
    deadline: Option<Instant>,
    signal: Arc<CancelSignal>,
}

impl Context {
    /// A context that is never cancelled and has no deadline.
    #[must_use]
    pub fn background() -> Self {
        Self::default()
    }

    /// Derives a context whose deadline is at most `timeout` from now.
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Derives a context whose deadline is at most `deadline`.
    #[must_use]
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(current) if current <= deadline => current,
            _ => deadline,
        };
        Self {
            deadline: Some(deadline),
            signal: Arc::clone(&self.signal),
        }
    }

    /// The deadline, if any.
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Cancels this context and every context sharing its signal.
    pub fn cancel(&self) {
        self.signal.cancelled.store(true, Ordering::SeqCst);
        self.signal.notify.notify_waiters();
    }

    /// Whether [`cancel`](Self::cancel) has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.signal.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once the context is cancelled.
    pub async fn cancelled(&self) {
        loop {
            // Registered before the flag check so a concurrent cancel is not missed.
            let notified = self.signal.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// Runs `fut` unless the context is cancelled or its deadline passes first.
    ///
    /// # Errors
    ///
    /// Returns [`QueryFailure::Cancelled`] or [`QueryFailure::DeadlineExceeded`];
    /// the future is dropped in both cases.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, QueryFailure> {
        if self.is_cancelled() {
            return Err(QueryFailure::Cancelled);
        }
        if self.deadline.is_some_and(|deadline| deadline <= Instant::now()) {
            return Err(QueryFailure::DeadlineExceeded);
        }
        let deadline = self.deadline;
        let expired = async move {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            biased;
            () = self.cancelled() => Err(QueryFailure::Cancelled),
            () = expired => Err(QueryFailure::DeadlineExceeded),
            output = fut => Ok(output),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn runs_to_completion_without_signal() {
        let ctx = Context::background();
        assert_eq!(ctx.run(async { 7 }).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn cancelled_context_short_circuits() {
        let ctx = Context::background();
        let child = ctx.with_timeout(Duration::from_secs(60));
        ctx.cancel();
        assert!(child.is_cancelled());
        assert!(matches!(
            child.run(async { 7 }).await,
            Err(QueryFailure::Cancelled)
        ));
    }

    #[tokio::test]
    async fn cancel_interrupts_pending_work() {
        let ctx = Context::background();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });
        let result = ctx.run(std::future::pending::<()>()).await;
        assert!(matches!(result, Err(QueryFailure::Cancelled)));
    }

    #[tokio::test]
    async fn deadline_interrupts_slow_work() {
        let ctx = Context::background().with_timeout(Duration::from_millis(50));
        let result = ctx
            .run(tokio::time::sleep(Duration::from_secs(10)))
            .await;
        assert!(matches!(result, Err(QueryFailure::DeadlineExceeded)));
    }

    #[test]
    fn deadlines_only_tighten() {
        let now = Instant::now();
        let ctx = Context::background().with_deadline(now + Duration::from_secs(1));
        let looser = ctx.with_deadline(now + Duration::from_secs(10));
        assert_eq!(looser.deadline(), ctx.deadline());
    }
}
