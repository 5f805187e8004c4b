//! API endpoints.

mod polls;
mod user;

use axum::Router;

use crate::middleware::AppState;

pub use polls::{PollOptionResponse, PollResponse, VoteResponse};

/// Create the API router.
pub fn router() -> Router<AppState> {
    Router::new()
        .nest("/polls", polls::router())
        .nest("/user", user::router())
}
