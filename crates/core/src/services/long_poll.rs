//! Long-poll change detection.
//!
//! A waiting request captures a fingerprint of what it watches, then
//! re-reads the store every `interval` until the fingerprint differs or
//! `timeout` elapses. Waiting is async, and the number of concurrent waiters
//! is capped; a request over the cap gets the current state immediately.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use livepoll_common::{AppResult, config::LongPollConfig};
use livepoll_db::{
    entities::poll::PollStatus,
    repositories::{PollRepository, PollWithOptions},
};
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, warn};

type PollFingerprint = (String, PollStatus, Vec<(String, i32)>);

fn fingerprint(poll: &PollWithOptions) -> PollFingerprint {
    (
        poll.poll.id.clone(),
        poll.poll.status,
        poll.options
            .iter()
            .map(|o| (o.id.clone(), o.vote_count))
            .collect(),
    )
}

fn list_fingerprint(polls: &[PollWithOptions]) -> Vec<PollFingerprint> {
    polls.iter().map(fingerprint).collect()
}

/// Holds requests open until a poll or the active list changes.
#[derive(Clone)]
pub struct ChangeWatcher {
    poll_repo: PollRepository,
    interval: Duration,
    timeout: Duration,
    permits: Arc<Semaphore>,
}

impl ChangeWatcher {
    /// Create a watcher from configuration.
    #[must_use]
    pub fn new(poll_repo: PollRepository, config: &LongPollConfig) -> Self {
        Self::with_timing(
            poll_repo,
            config.interval(),
            config.timeout(),
            config.max_waiters,
        )
    }

    /// Create a watcher with explicit timing.
    #[must_use]
    pub fn with_timing(
        poll_repo: PollRepository,
        interval: Duration,
        timeout: Duration,
        max_waiters: usize,
    ) -> Self {
        Self {
            poll_repo,
            interval,
            timeout,
            permits: Arc::new(Semaphore::new(max_waiters)),
        }
    }

    /// Wait until a poll's status or tallies change.
    ///
    /// Returns the changed poll, or the latest state at timeout. `None` when
    /// the poll does not exist or is deleted while waiting.
    pub async fn wait_for_poll_change(&self, poll_id: &str) -> AppResult<Option<PollWithOptions>> {
        let Some(initial) = self.poll_repo.find_with_options(poll_id).await? else {
            return Ok(None);
        };

        let repo = &self.poll_repo;
        self.watch(
            initial,
            move || async move { repo.find_with_options(poll_id).await },
            fingerprint,
        )
        .await
    }

    /// Wait until the set of active polls or any of their tallies change.
    pub async fn wait_for_active_change(&self) -> AppResult<Vec<PollWithOptions>> {
        let initial = self.load_active().await?;

        let this = self;
        let latest = self
            .watch(
                initial,
                move || async move { this.load_active().await.map(Some) },
                |polls: &Vec<PollWithOptions>| list_fingerprint(polls),
            )
            .await?;

        Ok(latest.unwrap_or_default())
    }

    async fn load_active(&self) -> AppResult<Vec<PollWithOptions>> {
        self.poll_repo
            .find_by_status_with_options(PollStatus::Active)
            .await
    }

    async fn watch<T, K, F, Fut>(
        &self,
        initial: T,
        mut load: F,
        key: impl Fn(&T) -> K,
    ) -> AppResult<Option<T>>
    where
        K: PartialEq,
        F: FnMut() -> Fut,
        Fut: Future<Output = AppResult<Option<T>>>,
    {
        let Ok(_permit) = self.permits.clone().try_acquire_owned() else {
            warn!("Too many long-poll waiters, answering immediately");
            return Ok(Some(initial));
        };

        let baseline = key(&initial);
        let deadline = Instant::now() + self.timeout;
        let mut latest = initial;

        loop {
            let now = Instant::now();
            if now >= deadline {
                debug!("Long-poll timed out without change");
                return Ok(Some(latest));
            }
            tokio::time::sleep(self.interval.min(deadline - now)).await;

            match load().await? {
                None => return Ok(None),
                Some(current) => {
                    if key(&current) != baseline {
                        debug!("Long-poll detected change");
                        return Ok(Some(current));
                    }
                    latest = current;
                }
            }
        }
    }
}
