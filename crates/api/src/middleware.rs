//! API middleware.

#![allow(missing_docs)]

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};
use livepoll_core::{ChangeWatcher, NotificationHub, PollService, VotingTokenService};
use serde::Serialize;

/// Header carrying the caller id set by the upstream identity provider.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Optional display name accompanying [`USER_ID_HEADER`].
pub const USER_NAME_HEADER: &str = "x-user-name";

/// Caller used for every request while authorization is disabled.
pub const DEV_USER_ID: &str = "dev-user";
const DEV_USER_NAME: &str = "Development User";

/// Application state.
#[derive(Clone)]
pub struct AppState {
    pub poll_service: PollService,
    pub change_watcher: ChangeWatcher,
    pub hub: NotificationHub,
    pub voting_tokens: VotingTokenService,
    pub auth_disabled: bool,
}

/// The identified caller of a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Caller {
    pub id: String,
    pub name: String,
}

impl Caller {
    fn development() -> Self {
        Self {
            id: DEV_USER_ID.to_string(),
            name: DEV_USER_NAME.to_string(),
        }
    }
}

/// Authentication middleware.
///
/// Trusts the identity headers set upstream. With authorization disabled
/// every request without them runs as the development user.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let caller = req
        .headers()
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(|id| Caller {
            id: id.to_string(),
            name: req
                .headers()
                .get(USER_NAME_HEADER)
                .and_then(|v| v.to_str().ok())
                .map_or_else(|| id.to_string(), ToString::to_string),
        });

    if let Some(caller) = caller.or_else(|| state.auth_disabled.then(Caller::development)) {
        req.extensions_mut().insert(caller);
    }

    next.run(req).await
}
