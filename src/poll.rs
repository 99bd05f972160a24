//! Polling bounds and cooperative cancellation.

use std::{future::Future, time::Duration};

use tokio::sync::watch;

use crate::error::{Error, Result};

/// How often, and how many times, a polling loop asks the server again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Delay between two attempts.
    pub interval: Duration,

    /// `None` polls until the server reaches a terminal state or the caller cancels.
    pub max_attempts: Option<u32>,
}

impl PollPolicy {
    pub const fn new(interval: Duration, max_attempts: u32) -> Self {
        PollPolicy {
            interval,
            max_attempts: Some(max_attempts),
        }
    }

    /// Polls forever; only the caller's [`Cancellation`] ends the loop.
    pub const fn unbounded(interval: Duration) -> Self {
        PollPolicy {
            interval,
            max_attempts: None,
        }
    }

    pub(crate) fn start(&self, what: impl Into<String>) -> Poller {
        Poller {
            policy: *self,
            what: what.into(),
            attempts: 0,
        }
    }
}

/// One run of a polling loop.
///
/// Call [`tick`](Self::tick) before each attempt after the first.
#[derive(Debug)]
pub(crate) struct Poller {
    policy: PollPolicy,
    what: String,
    attempts: u32,
}

impl Poller {
    /// Counts an attempt. Fails once the bound is exhausted.
    pub(crate) fn attempt(&mut self) -> Result<()> {
        self.attempts += 1;

        match self.policy.max_attempts {
            Some(max) if self.attempts > max => Err(Error::Timeout {
                what: self.what.clone(),
                attempts: max,
            }),
            _ => Ok(()),
        }
    }

    /// Sleeps for the policy interval, waking early with [`Error::Cancelled`].
    pub(crate) async fn sleep(&self, cancel: &Cancellation) -> Result<()> {
        log::debug!(
            "Waiting {}ms for {} (attempt {})",
            self.policy.interval.as_millis(),
            self.what,
            self.attempts
        );
        cancel.guard(tokio::time::sleep(self.policy.interval)).await
    }

    /// [`sleep`](Self::sleep) followed by [`attempt`](Self::attempt).
    pub(crate) async fn tick(&mut self, cancel: &Cancellation) -> Result<()> {
        self.sleep(cancel).await?;
        self.attempt()
    }
}

/// Creates a linked cancel handle and cancellation signal.
pub fn cancellation() -> (CancelHandle, Cancellation) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, Cancellation { rx: Some(rx) })
}

/// Cancels every [`Cancellation`] cloned from its pair.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

/// Cooperative cancellation signal, checked at every sleep and request boundary.
#[derive(Debug, Clone)]
pub struct Cancellation {
    rx: Option<watch::Receiver<bool>>,
}

impl Cancellation {
    /// A signal that never fires.
    pub fn never() -> Self {
        Cancellation { rx: None }
    }

    pub fn is_cancelled(&self) -> bool {
        self.rx.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Fails with [`Error::Cancelled`] if cancellation was requested.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolves once cancellation is requested. Pending forever if it never will be.
    pub async fn cancelled(&self) {
        let Some(rx) = &self.rx else {
            return std::future::pending().await;
        };

        let mut rx = rx.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            // handle dropped without cancelling
            std::future::pending::<()>().await;
        }
    }

    /// Runs `fut` unless cancellation is requested first.
    pub async fn guard<F: Future>(&self, fut: F) -> Result<F::Output> {
        self.check()?;

        tokio::select! {
            biased;
            () = self.cancelled() => Err(Error::Cancelled),
            out = fut => Ok(out),
        }
    }
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::never()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_policy_times_out() {
        let policy = PollPolicy::new(Duration::ZERO, 3);
        let mut poller = policy.start("order");

        for _ in 0..3 {
            poller.attempt().unwrap();
        }

        match poller.attempt().unwrap_err() {
            Error::Timeout { what, attempts } => {
                assert_eq!(what, "order");
                assert_eq!(attempts, 3);
            }
            err => panic!("unexpected error: {err}"),
        }
    }

    #[test]
    fn unbounded_policy_never_times_out() {
        let policy = PollPolicy::unbounded(Duration::ZERO);
        let mut poller = policy.start("order");
        for _ in 0..10_000 {
            poller.attempt().unwrap();
        }
    }

    #[tokio::test]
    async fn cancel_interrupts_sleep() {
        let (handle, cancel) = cancellation();
        let policy = PollPolicy::new(Duration::from_secs(3600), 10);
        let poller = policy.start("authorization");

        let sleeping = tokio::spawn(async move { poller_sleep(poller, cancel).await });
        tokio::task::yield_now().await;
        handle.cancel();

        assert!(matches!(sleeping.await.unwrap(), Err(Error::Cancelled)));
    }

    async fn poller_sleep(poller: Poller, cancel: Cancellation) -> Result<()> {
        poller.sleep(&cancel).await
    }

    #[tokio::test]
    async fn already_cancelled_fails_fast() {
        let (handle, cancel) = cancellation();
        handle.cancel();

        assert!(cancel.is_cancelled());
        let res = cancel.guard(async { 1 }).await;
        assert!(matches!(res, Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn dropped_handle_never_cancels() {
        let (handle, cancel) = cancellation();
        drop(handle);

        assert!(!cancel.is_cancelled());
        assert_eq!(cancel.guard(async { 7 }).await.unwrap(), 7);
        assert_eq!(Cancellation::never().guard(async { 8 }).await.unwrap(), 8);
    }
}
