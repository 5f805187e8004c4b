//! Poll entity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Lifecycle status of a poll.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PollStatus {
    /// Created, not yet accepting votes.
    #[sea_orm(string_value = "DRAFT")]
    Draft,
    /// Accepting votes.
    #[sea_orm(string_value = "ACTIVE")]
    Active,
    /// No longer accepting votes; may be reactivated.
    #[sea_orm(string_value = "CLOSED")]
    Closed,
    /// Reserved.
    #[sea_orm(string_value = "EXPIRED")]
    Expired,
}

/// How many options a voter picks per ballot.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PollType {
    #[sea_orm(string_value = "SINGLE_CHOICE")]
    SingleChoice,
    #[sea_orm(string_value = "MULTIPLE_CHOICE")]
    MultipleChoice,
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "poll")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    pub question: String,

    pub poll_type: PollType,

    #[sea_orm(indexed)]
    pub status: PollStatus,

    pub created_at: DateTimeWithTimeZone,

    /// When the scheduler may start the poll
    #[sea_orm(nullable)]
    pub start_time: Option<DateTimeWithTimeZone>,

    /// When the scheduler closes the poll
    #[sea_orm(nullable)]
    pub end_time: Option<DateTimeWithTimeZone>,

    /// Opaque identifier of the organizer
    pub created_by: String,

    pub is_public: bool,

    /// Whether a voter may cast more than one ballot
    pub allow_multiple_votes: bool,

    #[sea_orm(unique)]
    pub short_code: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::poll_option::Entity")]
    PollOption,

    #[sea_orm(has_many = "super::vote::Entity")]
    Vote,
}

impl Related<super::poll_option::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PollOption.def()
    }
}

impl Related<super::vote::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Vote.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
