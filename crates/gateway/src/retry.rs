//! Bounded retry on optimistic-concurrency conflicts
//!
//! Every write in the gateway is a compare-and-swap against a version token
//! (a Kubernetes `resourceVersion`, or the remote branch head for git pushes).
//! A lost race surfaces as a conflict and the whole read-modify-write cycle is
//! replayed with exponential backoff.

use crate::error::{Error, Result};
use crate::store::backend::ObjectApi;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    100
}

/// Retry budget for conflicting writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    #[serde(default = "default_max_retries", rename = "maxRetries")]
    pub max_retries: u32,

    /// Delay before the first retry; doubled on each subsequent retry
    #[serde(default = "default_initial_backoff_ms", rename = "initialBackoffMs")]
    pub initial_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
        }
    }
}

impl RetryPolicy {
    /// Retry without sleeping
    #[must_use]
    pub const fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_backoff_ms: 0,
        }
    }

    /// Delay before retry number `attempt + 1` (100ms, 200ms, 400ms with defaults)
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        Duration::from_millis(self.initial_backoff_ms.saturating_mul(factor))
    }

    /// Sleep and return `Ok` when `err` is a conflict with budget left,
    /// otherwise hand the error back
    async fn pause_or_fail(&self, operation: &str, attempt: u32, err: Error) -> Result<()> {
        if !err.is_conflict() || attempt >= self.max_retries {
            if err.is_conflict() {
                warn!(operation, attempt, "Conflict persisted after retries: {}", err);
            }
            return Err(err);
        }

        let delay = self.backoff(attempt);
        debug!(
            operation,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Write conflict, retrying"
        );
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }
}

/// Run `op` until it succeeds, fails with a non-conflict error, or the retry
/// budget runs out. `op` receives the zero-based attempt number and must
/// re-read whatever state it depends on.
pub async fn retry_on_conflict<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut op: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => policy.pause_or_fail(operation, attempt, err).await?,
        }
        attempt += 1;
    }
}

/// Outcome of a modify step in [`read_modify_write`]
#[derive(Debug)]
pub enum Mutation<K> {
    /// The object did not exist; create it
    Create(K),
    /// Replace the object read in this attempt (carries its resourceVersion)
    Replace(K),
    /// Nothing to write
    Noop,
}

/// Read the named object, let `modify` decide what to write, and write it with
/// the version token that was read. A create that loses to a concurrent
/// creator comes back as a conflict and falls into the same loop, so the next
/// attempt sees the winner's object and updates it instead.
///
/// Returns the stored object after the write, or the current object (if any)
/// for [`Mutation::Noop`].
pub async fn read_modify_write<K, A, F>(
    api: &A,
    name: &str,
    policy: &RetryPolicy,
    mut modify: F,
) -> Result<Option<K>>
where
    K: Clone + Send + Sync + 'static,
    A: ObjectApi<K> + ?Sized,
    F: FnMut(Option<K>) -> Result<Mutation<K>>,
{
    let mut attempt = 0;
    loop {
        let outcome = async {
            let current = api.get_opt(name).await?;
            match modify(current.clone())? {
                Mutation::Create(obj) => api.create(&obj).await.map(Some),
                Mutation::Replace(obj) => api.replace(name, &obj).await.map(Some),
                Mutation::Noop => Ok(current),
            }
        }
        .await;

        match outcome {
            Ok(value) => return Ok(value),
            Err(err) => policy.pause_or_fail(name, attempt, err).await?,
        }
        attempt += 1;
    }
}
