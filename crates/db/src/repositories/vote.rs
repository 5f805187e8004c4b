//! Vote repository.

use std::sync::Arc;

use livepoll_common::{AppError, AppResult};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseBackend, DatabaseConnection,
    DatabaseTransaction, DbErr, EntityTrait, Order, PaginatorTrait, QueryFilter, QueryOrder,
    TransactionTrait, sea_query::Expr,
};
use serde::Serialize;

use crate::entities::{Poll, PollOption, Vote, poll, poll_option, vote};

/// One vote joined with the text of the chosen option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRecord {
    pub id: String,
    pub poll_id: String,
    pub option_id: String,
    pub option_text: String,
    pub voter_id: String,
    pub timestamp: sea_orm::prelude::DateTimeWithTimeZone,
}

/// Repository for vote rows.
#[derive(Clone)]
pub struct VoteRepository {
    db: Arc<DatabaseConnection>,
}

impl VoteRepository {
    /// Create a new vote repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Begin a ballot transaction at the store's default isolation.
    ///
    /// On `SQLite` the transaction takes the write lock with its first
    /// statement, before any read. Competing ballots then queue on the busy
    /// timeout instead of failing when a read lock cannot be upgraded.
    pub async fn begin_ballot(&self, poll_id: &str) -> Result<DatabaseTransaction, DbErr> {
        let txn = self.db.begin().await?;

        if txn.get_database_backend() == DatabaseBackend::Sqlite {
            Poll::update_many()
                .col_expr(poll::Column::Status, Expr::col(poll::Column::Status).into())
                .filter(poll::Column::Id.eq(poll_id))
                .exec(&txn)
                .await?;
        }

        Ok(txn)
    }

    /// Whether the voter has any vote on the poll.
    pub async fn has_voted(&self, poll_id: &str, voter_id: &str) -> AppResult<bool> {
        Self::has_voted_in(self.db.as_ref(), poll_id, voter_id)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Whether the voter has any vote on the poll, on an arbitrary connection.
    pub async fn has_voted_in<C: ConnectionTrait>(
        conn: &C,
        poll_id: &str,
        voter_id: &str,
    ) -> Result<bool, DbErr> {
        let count = Vote::find()
            .filter(vote::Column::PollId.eq(poll_id))
            .filter(vote::Column::VoterId.eq(voter_id))
            .count(conn)
            .await?;
        Ok(count > 0)
    }

    /// Insert a vote row on an arbitrary connection.
    pub async fn insert_in<C: ConnectionTrait>(
        conn: &C,
        model: vote::ActiveModel,
    ) -> Result<vote::Model, DbErr> {
        model.insert(conn).await
    }

    /// Number of vote rows referencing an option.
    pub async fn count_by_option(&self, option_id: &str) -> AppResult<u64> {
        Vote::find()
            .filter(vote::Column::OptionId.eq(option_id))
            .count(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Number of vote rows on a poll.
    pub async fn count_by_poll(&self, poll_id: &str) -> AppResult<u64> {
        Vote::find()
            .filter(vote::Column::PollId.eq(poll_id))
            .count(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Vote history of a poll, newest first.
    pub async fn find_history(&self, poll_id: &str) -> AppResult<Vec<VoteRecord>> {
        let rows: Vec<(vote::Model, Option<poll_option::Model>)> = Vote::find()
            .find_also_related(PollOption)
            .filter(vote::Column::PollId.eq(poll_id))
            .order_by(vote::Column::CreatedAt, Order::Desc)
            .order_by(vote::Column::Id, Order::Desc)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|(vote, option)| VoteRecord {
                option_text: option.map(|o| o.text).unwrap_or_default(),
                id: vote.id,
                poll_id: vote.poll_id,
                option_id: vote.option_id,
                voter_id: vote.voter_id,
                timestamp: vote.created_at,
            })
            .collect())
    }
}
