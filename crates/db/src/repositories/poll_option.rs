//! Poll option repository.

use sea_orm::{
    ColumnTrait, ConnectionTrait, DbErr, EntityTrait, Order, QueryFilter, QueryOrder,
    sea_query::Expr,
};

use crate::entities::{PollOption, poll_option};

/// Option queries that run inside a ballot transaction.
pub struct PollOptionRepository;

impl PollOptionRepository {
    /// Options of a poll in display order, on an arbitrary connection.
    pub async fn find_by_poll_in<C: ConnectionTrait>(
        conn: &C,
        poll_id: &str,
    ) -> Result<Vec<poll_option::Model>, DbErr> {
        PollOption::find()
            .filter(poll_option::Column::PollId.eq(poll_id))
            .order_by(poll_option::Column::Position, Order::Asc)
            .all(conn)
            .await
    }

    /// Increment an option's tally atomically.
    ///
    /// Only matches when the option belongs to `poll_id`; returns the number
    /// of rows changed (0 or 1).
    pub async fn increment_vote_count_in<C: ConnectionTrait>(
        conn: &C,
        option_id: &str,
        poll_id: &str,
    ) -> Result<u64, DbErr> {
        let result = PollOption::update_many()
            .col_expr(
                poll_option::Column::VoteCount,
                Expr::col(poll_option::Column::VoteCount).add(1),
            )
            .filter(poll_option::Column::Id.eq(option_id))
            .filter(poll_option::Column::PollId.eq(poll_id))
            .exec(conn)
            .await?;

        Ok(result.rows_affected)
    }
}
