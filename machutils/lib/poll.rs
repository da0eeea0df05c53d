//! Bounded polling with an injectable sleeper.
//!
//! Every wait in monomachine is a fixed number of checks separated by a fixed interval. The sleeper
//! is a trait object so tests can run poll loops without waiting on the wall clock.

use std::{
    future::Future,
    sync::atomic::{AtomicU32, Ordering},
    time::Duration,
};

use async_trait::async_trait;

use crate::MachutilsError;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Suspends the current task between poll attempts.
#[async_trait]
pub trait Sleeper: Send + Sync {
    /// Sleeps for the given duration.
    async fn sleep(&self, duration: Duration);
}

/// A [`Sleeper`] backed by the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

/// A [`Sleeper`] that returns immediately and counts how often it was called.
#[derive(Debug, Default)]
pub struct InstantSleeper {
    calls: AtomicU32,
}

/// How often and how many times a condition is checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// The pause between two checks.
    pub interval: Duration,

    /// The maximum number of checks.
    pub attempts: u32,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl PollPolicy {
    /// Creates a new poll policy.
    pub const fn new(interval: Duration, attempts: u32) -> Self {
        Self { interval, attempts }
    }

    /// The longest time a poll loop with this policy can spend sleeping.
    pub fn budget(&self) -> Duration {
        self.interval * self.attempts
    }
}

impl InstantSleeper {
    /// Creates a new instant sleeper.
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of times `sleep` was called.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Checks `condition` until it reports `true`, sleeping `policy.interval` between checks.
///
/// An error from `condition` ends the loop immediately. When all attempts are used up the loop
/// fails with [`MachutilsError::PollExhausted`], converted into the caller's error type.
pub async fn wait_for<F, Fut, E>(
    what: &str,
    policy: &PollPolicy,
    sleeper: &dyn Sleeper,
    mut condition: F,
) -> Result<(), E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, E>>,
    E: From<MachutilsError>,
{
    for attempt in 1..=policy.attempts {
        if condition().await? {
            return Ok(());
        }

        tracing::debug!("waiting for {what} ({attempt}/{})", policy.attempts);
        if attempt < policy.attempts {
            sleeper.sleep(policy.interval).await;
        }
    }

    Err(MachutilsError::PollExhausted {
        what: what.to_string(),
        attempts: policy.attempts,
    }
    .into())
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[async_trait]
impl Sleeper for InstantSleeper {
    async fn sleep(&self, _duration: Duration) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
