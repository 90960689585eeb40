/// Fixed-interval polling with an attempt cap.
///
/// Every wait in the workflow (transaction receipts, MSP confirmation on
/// chain, backend indexing of buckets and files) has the same shape:
/// check, sleep a fixed interval, check again, and give up with a timeout
/// once the attempt budget is spent. No backoff, no jitter.
use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::debug;

use crate::error::{Result, WorkflowError};

/// Interval and attempt cap for one polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl PollPolicy {
    pub const fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }

    /// MSP confirmation of a storage request on chain (~20s).
    pub const fn msp_confirmation() -> Self {
        Self::new(Duration::from_secs(2), 10)
    }

    /// Backend reporting a file as ready (~12min, covers BSP replication).
    pub const fn backend_file_ready() -> Self {
        Self::new(Duration::from_secs(5), 144)
    }

    /// Backend indexer catching up with a freshly created bucket (~30s).
    pub const fn backend_bucket_ready() -> Self {
        Self::new(Duration::from_secs(3), 10)
    }

    /// Transaction inclusion (~60s).
    pub const fn transaction_receipt() -> Self {
        Self::new(Duration::from_secs(1), 60)
    }

    /// Upper bound of time spent sleeping if every attempt comes back pending.
    pub fn budget(&self) -> Duration {
        self.interval * self.max_attempts.saturating_sub(1)
    }
}

/// Outcome of a single check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStatus<T> {
    Ready(T),
    Pending,
}

/// Run `check` until it reports `Ready`, errors, or the policy's attempts run out.
///
/// `check` receives the 1-based attempt number. An `Err` from the check is
/// not retried: transient conditions must be mapped to `Pending` by the caller.
pub async fn poll_until<T, F, Fut>(policy: &PollPolicy, what: &str, mut check: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<PollStatus<T>>>,
{
    let started = Instant::now();
    debug!(
        what,
        max_attempts = policy.max_attempts,
        budget = ?policy.budget(),
        "Polling"
    );

    for attempt in 1..=policy.max_attempts {
        match check(attempt).await? {
            PollStatus::Ready(value) => {
                debug!(what, attempt, "Poll condition met");
                return Ok(value);
            }
            PollStatus::Pending => {
                debug!(
                    what,
                    attempt,
                    max_attempts = policy.max_attempts,
                    "Poll condition not met yet"
                );
            }
        }

        if attempt < policy.max_attempts {
            sleep(policy.interval).await;
        }
    }

    Err(WorkflowError::PollTimeout {
        what: what.to_string(),
        attempts: policy.max_attempts,
        elapsed: started.elapsed(),
    })
}
