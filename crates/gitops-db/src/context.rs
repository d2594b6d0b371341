//! # Query Context
//!
//! Caller-supplied cancellation and deadline for a single engine call.
//!
//! ## How Cancellation Works
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    One Engine Call                                      │
//! │                                                                         │
//! │  caller ── QueryContext ──► engine.get_application_by_id(&ctx, ..)     │
//! │                                   │                                     │
//! │                                   ▼                                     │
//! │                       already cancelled / expired?                      │
//! │                          yes ──► Err(Canceled) (no round trip)          │
//! │                          no                                             │
//! │                                   │                                     │
//! │                                   ▼                                     │
//! │                 tokio::select! {                                        │
//! │                     store call      ──► its result                      │
//! │                     cancel signal   ──► Err(Canceled)                   │
//! │                     deadline        ──► Err(DeadlineExceeded)           │
//! │                 }                                                       │
//! │                                                                         │
//! │  Losing branch is dropped: the in-flight statement is abandoned and     │
//! │  an open transaction rolls back when its handle drops.                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The engines never create their own contexts.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::{DbError, DbResult};

/// Cancellation and deadline token for one or more engine calls.
///
/// Cheap to clone; clones observe the same cancel signal.
#[derive(Debug, Clone, Default)]
pub struct QueryContext {
    deadline: Option<Instant>,
    cancel: Option<watch::Receiver<bool>>,
}

/// Fires the cancel signal of the contexts created with it.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Cancels every context sharing this handle. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

impl QueryContext {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        QueryContext::default()
    }

    /// A context that can be cancelled through the returned handle.
    pub fn cancellable() -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        let ctx = QueryContext {
            deadline: None,
            cancel: Some(rx),
        };
        (ctx, CancelHandle { tx })
    }

    /// Adds a deadline `timeout` from now. An earlier deadline is kept.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Adds an absolute deadline. An earlier deadline is kept.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        });
        self
    }

    /// Returns the deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// True once the cancel handle has fired.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Fails if the context can no longer be used for a new call.
    pub fn check(&self) -> DbResult<()> {
        if self.is_cancelled() {
            return Err(DbError::Canceled);
        }
        if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Err(DbError::DeadlineExceeded);
        }
        Ok(())
    }

    /// Runs one store interaction under this context.
    ///
    /// `fut` is usually a bare sqlx future; its error is classified on the
    /// way out.
    pub(crate) async fn run<T, E, F>(&self, fut: F) -> DbResult<T>
    where
        F: Future<Output = Result<T, E>>,
        E: Into<DbError>,
    {
        self.check()?;

        let cancelled = async {
            match &self.cancel {
                Some(rx) => {
                    let mut rx = rx.clone();
                    loop {
                        let fired = *rx.borrow_and_update();
                        if fired {
                            break;
                        }
                        if rx.changed().await.is_err() {
                            // Handle dropped without cancelling: never fires.
                            std::future::pending::<()>().await;
                        }
                    }
                }
                None => std::future::pending::<()>().await,
            }
        };

        let expired = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            result = fut => result.map_err(Into::into),
            _ = cancelled => Err(DbError::Canceled),
            _ = expired => Err(DbError::DeadlineExceeded),
        }
    }
}
