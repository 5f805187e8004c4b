//! Poll repository.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use livepoll_common::{AppError, AppResult};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    Order, QueryFilter, QueryOrder, TransactionTrait, sea_query::Expr,
};
use serde::Serialize;

use super::map_write_err;
use crate::entities::{Poll, PollOption, Vote, poll, poll_option, vote};

/// A poll together with its options in display order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PollWithOptions {
    /// The poll row.
    pub poll: poll::Model,
    /// Options ordered by position.
    pub options: Vec<poll_option::Model>,
}

impl PollWithOptions {
    /// Sum of all option tallies.
    #[must_use]
    pub fn total_votes(&self) -> i64 {
        self.options.iter().map(|o| i64::from(o.vote_count)).sum()
    }

    /// Tally per option text.
    #[must_use]
    pub fn results(&self) -> BTreeMap<String, i32> {
        let mut results = BTreeMap::new();
        for option in &self.options {
            *results.entry(option.text.clone()).or_insert(0) += option.vote_count;
        }
        results
    }

    /// Find an option of this poll by id.
    #[must_use]
    pub fn option(&self, option_id: &str) -> Option<&poll_option::Model> {
        self.options.iter().find(|o| o.id == option_id)
    }
}

/// Poll repository for database operations.
#[derive(Clone)]
pub struct PollRepository {
    db: Arc<DatabaseConnection>,
}

impl PollRepository {
    /// Create a new poll repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Find a poll by ID.
    pub async fn find_by_id(&self, id: &str) -> AppResult<Option<poll::Model>> {
        Poll::find_by_id(id)
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Find a poll by ID on an arbitrary connection (e.g. inside a transaction).
    pub async fn find_by_id_in<C: ConnectionTrait>(
        conn: &C,
        id: &str,
    ) -> Result<Option<poll::Model>, DbErr> {
        Poll::find_by_id(id).one(conn).await
    }

    /// Find a poll by its short code.
    pub async fn find_by_short_code(&self, code: &str) -> AppResult<Option<poll::Model>> {
        Poll::find()
            .filter(poll::Column::ShortCode.eq(code))
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Check whether a short code is already taken.
    pub async fn short_code_exists(&self, code: &str) -> AppResult<bool> {
        Ok(self.find_by_short_code(code).await?.is_some())
    }

    /// All polls, newest first.
    pub async fn find_all(&self) -> AppResult<Vec<poll::Model>> {
        Poll::find()
            .order_by(poll::Column::CreatedAt, Order::Desc)
            .order_by(poll::Column::Id, Order::Desc)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Polls in the given status, newest first.
    pub async fn find_by_status(&self, status: poll::PollStatus) -> AppResult<Vec<poll::Model>> {
        Poll::find()
            .filter(poll::Column::Status.eq(status))
            .order_by(poll::Column::CreatedAt, Order::Desc)
            .order_by(poll::Column::Id, Order::Desc)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Find a poll with its options.
    pub async fn find_with_options(&self, id: &str) -> AppResult<Option<PollWithOptions>> {
        let Some(poll) = self.find_by_id(id).await? else {
            return Ok(None);
        };
        let options = load_options(self.db.as_ref(), &poll.id)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(Some(PollWithOptions { poll, options }))
    }

    /// Find a poll with its options by short code.
    pub async fn find_with_options_by_short_code(
        &self,
        code: &str,
    ) -> AppResult<Option<PollWithOptions>> {
        let Some(poll) = self.find_by_short_code(code).await? else {
            return Ok(None);
        };
        let options = load_options(self.db.as_ref(), &poll.id)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(Some(PollWithOptions { poll, options }))
    }

    /// All polls with options, newest first.
    pub async fn find_all_with_options(&self) -> AppResult<Vec<PollWithOptions>> {
        let polls = self.find_all().await?;
        self.attach_options(polls).await
    }

    /// Polls in the given status with options, newest first.
    pub async fn find_by_status_with_options(
        &self,
        status: poll::PollStatus,
    ) -> AppResult<Vec<PollWithOptions>> {
        let polls = self.find_by_status(status).await?;
        self.attach_options(polls).await
    }

    async fn attach_options(&self, polls: Vec<poll::Model>) -> AppResult<Vec<PollWithOptions>> {
        if polls.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = polls.iter().map(|p| p.id.clone()).collect();
        let options = PollOption::find()
            .filter(poll_option::Column::PollId.is_in(ids))
            .order_by(poll_option::Column::Position, Order::Asc)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        let mut by_poll: HashMap<String, Vec<poll_option::Model>> = HashMap::new();
        for option in options {
            by_poll.entry(option.poll_id.clone()).or_default().push(option);
        }

        Ok(polls
            .into_iter()
            .map(|poll| {
                let options = by_poll.remove(&poll.id).unwrap_or_default();
                PollWithOptions { poll, options }
            })
            .collect())
    }

    /// Insert a poll and its options in one transaction.
    ///
    /// A short code collision surfaces as [`AppError::Conflict`].
    pub async fn create_with_options(
        &self,
        poll: poll::ActiveModel,
        options: Vec<poll_option::ActiveModel>,
    ) -> AppResult<PollWithOptions> {
        let txn = self.db.begin().await.map_err(map_write_err)?;

        let poll = poll.insert(&txn).await.map_err(map_write_err)?;
        let mut inserted = Vec::with_capacity(options.len());
        for option in options {
            inserted.push(option.insert(&txn).await.map_err(map_write_err)?);
        }

        txn.commit().await.map_err(map_write_err)?;

        inserted.sort_by_key(|o| o.position);
        Ok(PollWithOptions {
            poll,
            options: inserted,
        })
    }

    /// Compare-and-set a status transition.
    ///
    /// Returns `false` when the poll is missing or no longer in `from`.
    pub async fn transition_status(
        &self,
        id: &str,
        from: poll::PollStatus,
        to: poll::PollStatus,
    ) -> AppResult<bool> {
        let result = Poll::update_many()
            .col_expr(poll::Column::Status, Expr::value(to))
            .filter(poll::Column::Id.eq(id))
            .filter(poll::Column::Status.eq(from))
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(result.rows_affected > 0)
    }

    /// Apply metadata changes, option renames and appended options in one
    /// transaction. Status and tallies are never written here.
    pub async fn update_with_options(
        &self,
        id: &str,
        poll: poll::ActiveModel,
        renamed: Vec<(String, String)>,
        added: Vec<poll_option::ActiveModel>,
    ) -> AppResult<PollWithOptions> {
        let txn = self.db.begin().await.map_err(map_write_err)?;

        let poll = if poll.is_changed() {
            poll.update(&txn).await.map_err(map_write_err)?
        } else {
            Poll::find_by_id(id)
                .one(&txn)
                .await
                .map_err(map_write_err)?
                .ok_or_else(|| AppError::PollNotFound(id.to_string()))?
        };

        for (option_id, text) in renamed {
            let result = PollOption::update_many()
                .col_expr(poll_option::Column::Text, Expr::value(text))
                .filter(poll_option::Column::Id.eq(option_id.as_str()))
                .filter(poll_option::Column::PollId.eq(poll.id.as_str()))
                .exec(&txn)
                .await
                .map_err(map_write_err)?;
            if result.rows_affected == 0 {
                return Err(AppError::OptionNotFound(option_id));
            }
        }

        for option in added {
            option.insert(&txn).await.map_err(map_write_err)?;
        }

        let options = load_options(&txn, &poll.id).await.map_err(map_write_err)?;
        txn.commit().await.map_err(map_write_err)?;

        Ok(PollWithOptions { poll, options })
    }

    /// Delete a poll with its votes and options, children first.
    ///
    /// Returns `false` when the poll did not exist.
    pub async fn delete_cascade(&self, id: &str) -> AppResult<bool> {
        let txn = self.db.begin().await.map_err(map_write_err)?;

        Vote::delete_many()
            .filter(vote::Column::PollId.eq(id))
            .exec(&txn)
            .await
            .map_err(map_write_err)?;
        PollOption::delete_many()
            .filter(poll_option::Column::PollId.eq(id))
            .exec(&txn)
            .await
            .map_err(map_write_err)?;
        let result = Poll::delete_by_id(id)
            .exec(&txn)
            .await
            .map_err(map_write_err)?;

        txn.commit().await.map_err(map_write_err)?;

        Ok(result.rows_affected > 0)
    }
}

async fn load_options<C: ConnectionTrait>(
    conn: &C,
    poll_id: &str,
) -> Result<Vec<poll_option::Model>, DbErr> {
    PollOption::find()
        .filter(poll_option::Column::PollId.eq(poll_id))
        .order_by(poll_option::Column::Position, Order::Asc)
        .all(conn)
        .await
}
