//! Bounded concurrency for cache store operations.
//!
//! Every store operation holds a [`GatePermit`] from a shared
//! [`CapacityGate`] while it talks to the store. The permit is released when
//! it drops, so an operation that fails, times out, or is cancelled gives its
//! capacity back.
//!
//! Operations run inside a [`CacheContext`], which carries an optional
//! deadline and an optional [`CancelToken`]. Whichever fires first aborts the
//! operation (including a wait for gate capacity).

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use keel_core::{CacheError, KeelResult};
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

// ============================================================================
// CAPACITY GATE
// ============================================================================

/// Weighted ceiling on simultaneous in-flight cache operations.
///
/// Cloning shares the same capacity.
#[derive(Debug, Clone)]
pub struct CapacityGate {
    semaphore: Arc<Semaphore>,
    capacity: u32,
}

/// Capacity held by one operation; released on drop.
#[derive(Debug)]
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
}

impl CapacityGate {
    /// Create a gate admitting up to `capacity` units at once.
    pub fn new(capacity: usize) -> Self {
        let capacity = u32::try_from(capacity).unwrap_or(u32::MAX);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity as usize)),
            capacity,
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Units currently free.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Wait for `weight` units. Weights above the capacity are clamped so a
    /// heavy operation can still run alone.
    pub async fn acquire(&self, weight: u32) -> KeelResult<GatePermit> {
        let weight = weight.clamp(1, self.capacity.max(1));
        let permit = Arc::clone(&self.semaphore)
            .acquire_many_owned(weight)
            .await
            .map_err(|_| CacheError::GateClosed)?;
        Ok(GatePermit { _permit: permit })
    }

    /// Refuse all further acquisitions. Waiters fail with `GateClosed`.
    pub fn close(&self) {
        self.semaphore.close();
    }
}

// ============================================================================
// CANCELLATION
// ============================================================================

/// Cooperative cancellation signal shared between a caller and its
/// operations.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Signal cancellation to every operation holding this token.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the token is cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close under us.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// OPERATION CONTEXT
// ============================================================================

/// Deadline and cancellation for cache operations.
#[derive(Debug, Clone, Default)]
pub struct CacheContext {
    deadline: Option<Instant>,
    cancel: Option<CancelToken>,
}

impl CacheContext {
    /// No deadline, no cancellation.
    pub fn background() -> Self {
        Self::default()
    }

    /// Expire `timeout` from now.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// This context, given a deadline `timeout` from now if it has none.
    pub fn or_timeout(&self, timeout: Option<Duration>) -> Self {
        match (self.deadline, timeout) {
            (None, Some(timeout)) => self.clone().with_timeout(timeout),
            _ => self.clone(),
        }
    }

    /// Run `op`, aborting it when the context is cancelled or expires.
    ///
    /// Aborting drops `op`, which releases any gate permit it holds.
    pub async fn run<T, F>(&self, op: F) -> KeelResult<T>
    where
        F: Future<Output = KeelResult<T>>,
    {
        if self.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
            return Err(CacheError::Cancelled.into());
        }

        let started = Instant::now();
        tokio::select! {
            biased;
            _ = wait_cancelled(self.cancel.as_ref()) => Err(CacheError::Cancelled.into()),
            _ = wait_deadline(self.deadline) => Err(CacheError::Timeout {
                elapsed_ms: started.elapsed().as_millis() as u64,
            }
            .into()),
            out = op => out,
        }
    }
}

async fn wait_cancelled(token: Option<&CancelToken>) {
    match token {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}

async fn wait_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
