//! Caller identity endpoints.

use axum::{Router, extract::State, routing::get};
use livepoll_common::AppResult;
use livepoll_core::SignedVoterId;

use crate::{
    extractors::AuthUser,
    middleware::{AppState, Caller},
    response::ApiResponse,
};

/// Current caller.
async fn current_user(AuthUser(caller): AuthUser) -> AppResult<ApiResponse<Caller>> {
    Ok(ApiResponse::ok(caller))
}

/// Issue a signed anonymous voter id.
async fn voter_token(State(state): State<AppState>) -> AppResult<ApiResponse<SignedVoterId>> {
    let token = state.voting_tokens.issue();
    tracing::debug!(voter_id = %token.user_id, "Issued voter token");
    Ok(ApiResponse::ok(token))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(current_user))
        .route("/voter-token", get(voter_token))
}
