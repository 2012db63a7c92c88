//! Interval polling with an optional deadline.
//!
//! Used to wait on execution units and on comparison source jobs. Dropping
//! the returned future cancels the wait.

use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, sleep};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Poller {
    interval: Duration,
    deadline: Option<Duration>,
}

impl Poller {
    /// Poll forever on `interval`.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            deadline: None,
        }
    }

    /// Give up once `deadline` has elapsed since polling started.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Run `check` until it yields a value.
    ///
    /// Checks immediately, then once per interval. A final check is made at
    /// the deadline; if that also yields nothing, returns `Ok(None)`. Errors
    /// from `check` end polling at once.
    pub async fn until<T, E, F, Fut>(&self, mut check: F) -> Result<Option<T>, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
    {
        let started = Instant::now();
        loop {
            if let Some(value) = check().await? {
                return Ok(Some(value));
            }

            match self.deadline {
                Some(deadline) => {
                    let elapsed = started.elapsed();
                    if elapsed >= deadline {
                        return Ok(None);
                    }
                    sleep(self.interval.min(deadline - elapsed)).await;
                }
                None => sleep(self.interval).await,
            }
        }
    }
}
