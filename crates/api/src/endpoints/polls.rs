//! Poll endpoints.

use std::collections::BTreeMap;

use axum::{
    Json, Router,
    extract::{Path, State},
    response::IntoResponse,
    routing::{get, post, put},
};
use livepoll_common::{AppError, AppResult};
use livepoll_core::{CreatePollInput, UpdatePollInput};
use livepoll_db::{
    entities::poll::{PollStatus, PollType},
    repositories::{PollWithOptions, VoteRecord},
};
use serde::{Deserialize, Serialize};

use crate::{
    extractors::{AuthUser, Voter},
    middleware::AppState,
    response::{self, ApiResponse},
};

/// Poll response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollResponse {
    pub id: String,
    pub question: String,
    pub poll_type: PollType,
    pub status: PollStatus,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    pub created_by: String,
    pub is_public: bool,
    pub allow_multiple_votes: bool,
    pub short_code: String,
    pub options: Vec<PollOptionResponse>,
    pub total_votes: i64,
}

/// Poll option response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollOptionResponse {
    pub id: String,
    pub text: String,
    pub vote_count: i32,
}

impl From<PollWithOptions> for PollResponse {
    fn from(poll: PollWithOptions) -> Self {
        let total_votes = poll.total_votes();
        let PollWithOptions { poll, options } = poll;

        Self {
            id: poll.id,
            question: poll.question,
            poll_type: poll.poll_type,
            status: poll.status,
            created_at: poll.created_at.to_rfc3339(),
            start_time: poll.start_time.map(|t| t.to_rfc3339()),
            end_time: poll.end_time.map(|t| t.to_rfc3339()),
            created_by: poll.created_by,
            is_public: poll.is_public,
            allow_multiple_votes: poll.allow_multiple_votes,
            short_code: poll.short_code,
            options: options
                .into_iter()
                .map(|o| PollOptionResponse {
                    id: o.id,
                    text: o.text,
                    vote_count: o.vote_count,
                })
                .collect(),
            total_votes,
        }
    }
}

fn to_responses(polls: Vec<PollWithOptions>) -> Vec<PollResponse> {
    polls.into_iter().map(PollResponse::from).collect()
}

/// Vote request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRequest {
    pub option_id: String,
}

/// Multiple vote request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteMultipleRequest {
    pub option_ids: Vec<String>,
}

/// Vote response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteResponse {
    pub poll_id: String,
    pub results: BTreeMap<String, i32>,
}

/// List all polls.
async fn list_polls(State(state): State<AppState>) -> AppResult<ApiResponse<Vec<PollResponse>>> {
    let polls = state.poll_service.list_all().await?;
    Ok(ApiResponse::ok(to_responses(polls)))
}

/// List active polls.
async fn list_active(State(state): State<AppState>) -> AppResult<ApiResponse<Vec<PollResponse>>> {
    let polls = state.poll_service.list_active().await?;
    Ok(ApiResponse::ok(to_responses(polls)))
}

/// Wait for the active poll list to change.
async fn wait_active(State(state): State<AppState>) -> AppResult<ApiResponse<Vec<PollResponse>>> {
    let polls = state.change_watcher.wait_for_active_change().await?;
    Ok(ApiResponse::ok(to_responses(polls)))
}

/// Create a poll owned by the caller.
async fn create_poll(
    AuthUser(caller): AuthUser,
    State(state): State<AppState>,
    Json(input): Json<CreatePollInput>,
) -> AppResult<ApiResponse<PollResponse>> {
    let poll = state.poll_service.create_poll(&caller.id, input).await?;
    Ok(ApiResponse::ok(poll.into()))
}

/// Get a poll by short code.
async fn get_by_short_code(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> AppResult<ApiResponse<PollResponse>> {
    let poll = state
        .poll_service
        .get_poll_by_short_code(&code)
        .await?
        .ok_or_else(|| AppError::PollNotFound(code))?;
    Ok(ApiResponse::ok(poll.into()))
}

/// Get a poll.
async fn get_poll(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<PollResponse>> {
    let poll = load(&state, &id).await?;
    Ok(ApiResponse::ok(poll.into()))
}

/// Wait for a poll's status or tallies to change.
async fn wait_poll(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<PollResponse>> {
    let poll = state
        .change_watcher
        .wait_for_poll_change(&id)
        .await?
        .ok_or(AppError::PollNotFound(id))?;
    Ok(ApiResponse::ok(poll.into()))
}

/// Tally per option text.
async fn results(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<BTreeMap<String, i32>>> {
    Ok(ApiResponse::ok(state.poll_service.results(&id).await?))
}

/// Vote history, newest first.
async fn history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<Vec<VoteRecord>>> {
    Ok(ApiResponse::ok(state.poll_service.history(&id).await?))
}

/// Vote for one option.
async fn vote(
    Voter(voter_id): Voter,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<VoteRequest>,
) -> AppResult<ApiResponse<VoteResponse>> {
    if state.poll_service.vote(&id, &req.option_id, &voter_id).await {
        return vote_response(&state, id).await;
    }
    Err(state
        .poll_service
        .explain_rejected_vote(&id, &[req.option_id], &voter_id)
        .await)
}

/// Vote for several options as one ballot.
async fn vote_multiple(
    Voter(voter_id): Voter,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<VoteMultipleRequest>,
) -> AppResult<ApiResponse<VoteResponse>> {
    if state
        .poll_service
        .vote_multiple(&id, &req.option_ids, &voter_id)
        .await
    {
        return vote_response(&state, id).await;
    }
    Err(state
        .poll_service
        .explain_rejected_vote(&id, &req.option_ids, &voter_id)
        .await)
}

async fn vote_response(state: &AppState, poll_id: String) -> AppResult<ApiResponse<VoteResponse>> {
    let results = state.poll_service.results(&poll_id).await?;
    Ok(ApiResponse::ok(VoteResponse { poll_id, results }))
}

/// Update a poll.
async fn update_poll(
    AuthUser(caller): AuthUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(input): Json<UpdatePollInput>,
) -> AppResult<ApiResponse<PollResponse>> {
    let updated = state
        .poll_service
        .update(&id, input, Some(&caller.id))
        .await?;
    if !updated {
        return Err(refusal(&state, &id, "poll could not be updated").await);
    }
    Ok(ApiResponse::ok(load(&state, &id).await?.into()))
}

/// Start or reactivate a poll.
async fn start_poll(
    AuthUser(caller): AuthUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<PollResponse>> {
    if !state.poll_service.start(&id, Some(&caller.id)).await? {
        return Err(refusal(&state, &id, "poll cannot be started").await);
    }
    Ok(ApiResponse::ok(load(&state, &id).await?.into()))
}

/// Close a poll.
async fn close_poll(
    AuthUser(caller): AuthUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<PollResponse>> {
    if !state.poll_service.close(&id, Some(&caller.id)).await? {
        return Err(refusal(&state, &id, "poll cannot be closed").await);
    }
    Ok(ApiResponse::ok(load(&state, &id).await?.into()))
}

/// Delete a poll.
async fn delete_poll(
    AuthUser(caller): AuthUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    if !state.poll_service.delete(&id, Some(&caller.id)).await? {
        return Err(refusal(&state, &id, "poll could not be deleted").await);
    }
    Ok(response::ok())
}

async fn load(state: &AppState, id: &str) -> AppResult<PollWithOptions> {
    state
        .poll_service
        .get_poll(id)
        .await?
        .ok_or_else(|| AppError::PollNotFound(id.to_string()))
}

/// Error for a mutation that reported `false`.
async fn refusal(state: &AppState, id: &str, message: &str) -> AppError {
    match load(state, id).await {
        Ok(_) => AppError::Conflict(message.to_string()),
        Err(e) => e,
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_polls).post(create_poll))
        .route("/active", get(list_active))
        .route("/active/wait", get(wait_active))
        .route("/shortcode/{code}", get(get_by_short_code))
        .route(
            "/{id}",
            get(get_poll).put(update_poll).delete(delete_poll),
        )
        .route("/{id}/wait", get(wait_poll))
        .route("/{id}/results", get(results))
        .route("/{id}/history", get(history))
        .route("/{id}/vote", post(vote))
        .route("/{id}/vote-multiple", post(vote_multiple))
        .route("/{id}/start", put(start_poll))
        .route("/{id}/close", put(close_poll))
}
