//! Vote recording.
//!
//! A ballot (one `vote` or `vote_multiple` call) is written in a single
//! transaction: preconditions are re-checked inside it, every vote row is
//! inserted and every tally is bumped with an atomic conditional update.
//! Either all of it commits or none of it does.
//!
//! On polls that allow one ballot per voter, the first row of a ballot carries
//! a `ballot_key` covered by a unique index. The has-voted check inside the
//! transaction rejects ordinary repeats; the index rejects a concurrent ballot
//! of the same voter that passed the check at the same time.

use std::time::Duration;

use chrono::Utc;
use livepoll_common::{AppResult, IdGenerator};
use livepoll_db::{
    entities::{poll::PollStatus, vote},
    repositories::{
        PollOptionRepository, PollRepository, VoteRepository, is_lock_contention,
        is_unique_violation,
    },
};
use rand::Rng;
use sea_orm::{DatabaseTransaction, DbErr, Set};
use tracing::{debug, error, warn};

/// Attempts per ballot when the store reports lock contention.
const MAX_BALLOT_ATTEMPTS: u32 = 5;

/// Base delay between attempts; grows linearly and gets random jitter.
const RETRY_BASE_DELAY_MS: u64 = 10;

enum Ballot {
    Committed,
    Rejected(&'static str),
}

/// Records votes and keeps option tallies consistent with vote rows.
#[derive(Clone)]
pub struct VoteRecorder {
    vote_repo: VoteRepository,
    id_gen: IdGenerator,
}

impl VoteRecorder {
    /// Create a new vote recorder.
    #[must_use]
    pub const fn new(vote_repo: VoteRepository) -> Self {
        Self {
            vote_repo,
            id_gen: IdGenerator::new(),
        }
    }

    /// Record a single choice.
    ///
    /// Returns `false` when the poll is missing or not active, the option is
    /// not part of the poll, the voter already voted on a single-vote poll,
    /// or the store failed.
    pub async fn vote(&self, poll_id: &str, option_id: &str, voter_id: &str) -> bool {
        self.record(poll_id, &[option_id.to_string()], voter_id)
            .await
    }

    /// Record several choices as one ballot.
    ///
    /// Every option is validated before anything is written. On a single-vote
    /// poll the voter must not have voted on the poll at all.
    pub async fn vote_multiple(&self, poll_id: &str, option_ids: &[String], voter_id: &str) -> bool {
        if option_ids.is_empty() {
            debug!(poll_id = %poll_id, voter_id = %voter_id, "Vote rejected: no options selected");
            return false;
        }
        self.record(poll_id, option_ids, voter_id).await
    }

    /// Whether the voter has any vote on the poll.
    pub async fn has_voted(&self, poll_id: &str, voter_id: &str) -> AppResult<bool> {
        self.vote_repo.has_voted(poll_id, voter_id).await
    }

    async fn record(&self, poll_id: &str, option_ids: &[String], voter_id: &str) -> bool {
        for attempt in 1..=MAX_BALLOT_ATTEMPTS {
            match self.try_record(poll_id, option_ids, voter_id).await {
                Ok(Ballot::Committed) => {
                    debug!(
                        poll_id = %poll_id,
                        voter_id = %voter_id,
                        choices = option_ids.len(),
                        "Ballot recorded"
                    );
                    return true;
                }
                Ok(Ballot::Rejected(reason)) => {
                    debug!(poll_id = %poll_id, voter_id = %voter_id, reason, "Vote rejected");
                    return false;
                }
                Err(e) if is_unique_violation(&e) => {
                    debug!(poll_id = %poll_id, voter_id = %voter_id, "Vote rejected: concurrent ballot of same voter");
                    return false;
                }
                Err(e) if is_lock_contention(&e) && attempt < MAX_BALLOT_ATTEMPTS => {
                    let delay = retry_delay(attempt);
                    warn!(
                        poll_id = %poll_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Ballot hit lock contention, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    error!(poll_id = %poll_id, voter_id = %voter_id, error = %e, "Failed to record ballot");
                    return false;
                }
            }
        }

        false
    }

    async fn try_record(
        &self,
        poll_id: &str,
        option_ids: &[String],
        voter_id: &str,
    ) -> Result<Ballot, DbErr> {
        let txn = self.vote_repo.begin_ballot(poll_id).await?;

        let Some(poll) = PollRepository::find_by_id_in(&txn, poll_id).await? else {
            return reject(txn, "poll not found").await;
        };
        if poll.status != PollStatus::Active {
            return reject(txn, "poll is not active").await;
        }

        let options = PollOptionRepository::find_by_poll_in(&txn, poll_id).await?;
        if option_ids
            .iter()
            .any(|id| !options.iter().any(|option| &option.id == id))
        {
            return reject(txn, "option does not belong to poll").await;
        }

        let single_vote = !poll.allow_multiple_votes;
        if single_vote && VoteRepository::has_voted_in(&txn, poll_id, voter_id).await? {
            return reject(txn, "already voted").await;
        }

        let now = Utc::now();
        for (index, option_id) in option_ids.iter().enumerate() {
            let ballot_key = (single_vote && index == 0).then(|| format!("{poll_id}:{voter_id}"));

            VoteRepository::insert_in(
                &txn,
                vote::ActiveModel {
                    id: Set(self.id_gen.generate()),
                    poll_id: Set(poll_id.to_string()),
                    option_id: Set(option_id.clone()),
                    voter_id: Set(voter_id.to_string()),
                    ballot_key: Set(ballot_key),
                    created_at: Set(now.into()),
                },
            )
            .await?;

            let changed =
                PollOptionRepository::increment_vote_count_in(&txn, option_id, poll_id).await?;
            if changed == 0 {
                return reject(txn, "option disappeared").await;
            }
        }

        txn.commit().await?;
        Ok(Ballot::Committed)
    }
}

fn retry_delay(attempt: u32) -> Duration {
    let jitter = rand::thread_rng().gen_range(0..RETRY_BASE_DELAY_MS);
    Duration::from_millis(RETRY_BASE_DELAY_MS * u64::from(attempt) + jitter)
}

async fn reject(txn: DatabaseTransaction, reason: &'static str) -> Result<Ballot, DbErr> {
    txn.rollback().await?;
    Ok(Ballot::Rejected(reason))
}
