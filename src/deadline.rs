use std::future::Future;
use std::time::Duration;
use anyhow::anyhow;
use tokio::time::{sleep_until, timeout_at, Instant};


/// A zero timeout is unbounded, just like `None`
pub fn effective_timeout(timeout: Option<Duration>) -> Option<Duration> {
    timeout.filter(|d| !d.is_zero())
}

/// Turns an optional timeout into an optional absolute deadline, starting now.
pub fn deadline_after(timeout: Option<Duration>) -> Option<Instant> {
    effective_timeout(timeout).map(|d| Instant::now() + d)
}

/// The effective deadline for a single operation on a connection: the per-operation timeout
///  (if any) counted from now, capped by the connection's overall deadline (if any).
pub fn op_deadline(overall: Option<Instant>, per_op: Option<Duration>) -> Option<Instant> {
    match (overall, deadline_after(per_op)) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

pub fn is_expired(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|d| Instant::now() >= d)
}

/// Runs `op`, failing with a timeout error naming `what` if `deadline` passes first. `None` means
///  unbounded.
pub async fn with_deadline<T>(
    deadline: Option<Instant>,
    what: &str,
    op: impl Future<Output = anyhow::Result<T>>,
) -> anyhow::Result<T> {
    match deadline {
        None => op.await,
        Some(deadline) => match timeout_at(deadline, op).await {
            Ok(result) => result,
            Err(_) => Err(anyhow!("{} timed out", what)),
        },
    }
}

/// Completes when `deadline` is reached, never for `None`. Intended as a `select!` branch.
pub async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
