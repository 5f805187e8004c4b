//! Database repositories.

pub mod poll;
pub mod poll_option;
pub mod vote;

pub use poll::{PollRepository, PollWithOptions};
pub use poll_option::PollOptionRepository;
pub use vote::{VoteRecord, VoteRepository};

use livepoll_common::AppError;
use sea_orm::{DbErr, SqlErr};

/// Map a write error, keeping unique-index violations distinguishable.
pub(crate) fn map_write_err(err: DbErr) -> AppError {
    if is_unique_violation(&err) {
        AppError::Conflict(err.to_string())
    } else {
        AppError::Database(err.to_string())
    }
}

/// Whether the store rejected a write because of a unique index.
#[must_use]
pub fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

/// Whether a write failed on lock contention with another transaction.
///
/// Such transactions can be retried from the start.
#[must_use]
pub fn is_lock_contention(err: &DbErr) -> bool {
    let message = err.to_string();
    message.contains("database is locked")
        || message.contains("deadlock detected")
        || message.contains("could not obtain lock")
}
