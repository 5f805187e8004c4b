//! Poll lifecycle state machine and the time-based status updater.
//!
//! Status moves DRAFT -> ACTIVE -> CLOSED, and CLOSED -> ACTIVE on
//! reactivation. Every operation is a no-op outside its source states, so
//! applying one twice is harmless. Persisted transitions are compare-and-set
//! on the previous status.

use chrono::{DateTime, Utc};
use livepoll_common::AppResult;
use livepoll_db::{
    entities::poll::{self, PollStatus},
    repositories::PollRepository,
};
use tracing::{debug, error, info};

use super::event_publisher::{PollUpdatedEvent, UpdatePublisherService};

/// A status change that was performed in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// Status before the change.
    pub from: PollStatus,
    /// Status after the change.
    pub to: PollStatus,
}

/// Lifecycle view of a poll: its status and time window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollLifecycle {
    status: PollStatus,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
}

impl PollLifecycle {
    /// Build a lifecycle from raw parts.
    #[must_use]
    pub const fn new(
        status: PollStatus,
        start_time: Option<DateTime<Utc>>,
        end_time: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            status,
            start_time,
            end_time,
        }
    }

    /// Lifecycle of a stored poll.
    #[must_use]
    pub fn of(poll: &poll::Model) -> Self {
        Self::new(
            poll.status,
            poll.start_time.map(|t| t.with_timezone(&Utc)),
            poll.end_time.map(|t| t.with_timezone(&Utc)),
        )
    }

    /// Current status.
    #[must_use]
    pub const fn status(&self) -> PollStatus {
        self.status
    }

    /// Whether the poll accepts votes.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == PollStatus::Active
    }

    /// A DRAFT poll whose start time has passed, or any CLOSED poll.
    #[must_use]
    pub fn can_start(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            PollStatus::Draft => self.start_time.is_some_and(|start| now > start),
            PollStatus::Closed => true,
            PollStatus::Active | PollStatus::Expired => false,
        }
    }

    /// Whether the end time has passed.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.end_time.is_some_and(|end| now > end)
    }

    /// DRAFT -> ACTIVE.
    pub fn start(&mut self) -> Option<Transition> {
        self.move_to(&[PollStatus::Draft], PollStatus::Active)
    }

    /// ACTIVE -> CLOSED.
    pub fn close(&mut self) -> Option<Transition> {
        self.move_to(&[PollStatus::Active], PollStatus::Closed)
    }

    /// CLOSED -> ACTIVE.
    pub fn reactivate(&mut self) -> Option<Transition> {
        self.move_to(&[PollStatus::Closed], PollStatus::Active)
    }

    /// DRAFT or CLOSED -> ACTIVE.
    pub fn start_or_reactivate(&mut self) -> Option<Transition> {
        self.move_to(&[PollStatus::Draft, PollStatus::Closed], PollStatus::Active)
    }

    fn move_to(&mut self, sources: &[PollStatus], to: PollStatus) -> Option<Transition> {
        if !sources.contains(&self.status) {
            return None;
        }
        let from = self.status;
        self.status = to;
        Some(Transition { from, to })
    }
}

/// Outcome of one status update tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Polls moved to ACTIVE.
    pub started: u64,
    /// Polls moved to CLOSED.
    pub closed: u64,
    /// Polls whose update failed.
    pub failed: u64,
}

/// Applies time-based transitions to every poll.
#[derive(Clone)]
pub struct PollStatusUpdater {
    poll_repo: PollRepository,
    publisher: UpdatePublisherService,
}

impl PollStatusUpdater {
    /// Create a new status updater.
    #[must_use]
    pub const fn new(poll_repo: PollRepository, publisher: UpdatePublisherService) -> Self {
        Self {
            poll_repo,
            publisher,
        }
    }

    /// Run one tick against the current time.
    pub async fn run_tick(&self) -> AppResult<TickReport> {
        self.run_tick_at(Utc::now()).await
    }

    /// Run one tick as if the time were `now`.
    ///
    /// A failure on one poll is logged and does not stop the others.
    pub async fn run_tick_at(&self, now: DateTime<Utc>) -> AppResult<TickReport> {
        let polls = self.poll_repo.find_all().await?;
        let mut report = TickReport::default();

        for poll in &polls {
            match self.advance(poll, now).await {
                Ok((started, closed)) => {
                    report.started += u64::from(started);
                    report.closed += u64::from(closed);
                }
                Err(e) => {
                    error!(poll_id = %poll.id, error = %e, "Failed to update poll status");
                    report.failed += 1;
                }
            }
        }

        if report.started > 0 || report.closed > 0 || report.failed > 0 {
            info!(
                started = report.started,
                closed = report.closed,
                failed = report.failed,
                "Poll status tick completed"
            );
        }

        Ok(report)
    }

    async fn advance(&self, poll: &poll::Model, now: DateTime<Utc>) -> AppResult<(bool, bool)> {
        let mut lifecycle = PollLifecycle::of(poll);
        let mut started = false;
        let mut closed = false;

        if lifecycle.can_start(now) {
            if let Some(transition) = lifecycle.start() {
                if !self.persist(&poll.id, transition).await? {
                    return Ok((false, false));
                }
                started = true;
            }
        }

        if lifecycle.is_active() && lifecycle.is_expired(now) {
            if let Some(transition) = lifecycle.close() {
                closed = self.persist(&poll.id, transition).await?;
            }
        }

        Ok((started, closed))
    }

    async fn persist(&self, poll_id: &str, transition: Transition) -> AppResult<bool> {
        let applied = self
            .poll_repo
            .transition_status(poll_id, transition.from, transition.to)
            .await?;

        if applied {
            debug!(poll_id = %poll_id, from = ?transition.from, to = ?transition.to, "Poll status changed");
            self.publisher.publish(PollUpdatedEvent::new(poll_id));
        } else {
            debug!(poll_id = %poll_id, "Poll status changed concurrently, skipping");
        }
        Ok(applied)
    }
}
