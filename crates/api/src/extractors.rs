//! Request extractors.

use axum::{extract::FromRequestParts, http::request::Parts};
use livepoll_common::AppError;

use crate::middleware::{AppState, Caller};

/// Header carrying an anonymous voter id.
pub const VOTER_ID_HEADER: &str = "x-voter-id";

/// Header carrying the signature of [`VOTER_ID_HEADER`].
pub const SIGNATURE_HEADER: &str = "x-signature";

/// Authenticated caller extractor.
#[derive(Debug, Clone)]
pub struct AuthUser(pub Caller);

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        // Set by auth middleware
        parts
            .extensions
            .get::<Caller>()
            .cloned()
            .map(AuthUser)
            .ok_or(AppError::Unauthorized)
    }
}

/// Voter identity extractor.
///
/// A signed anonymous voter id takes precedence over the caller. With
/// authorization disabled an unsigned voter id is accepted as is.
#[derive(Debug, Clone)]
pub struct Voter(pub String);

impl FromRequestParts<AppState> for Voter {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };

        if let Some(voter_id) = header(VOTER_ID_HEADER) {
            return match header(SIGNATURE_HEADER) {
                Some(signature) if state.voting_tokens.verify(voter_id, signature) => {
                    Ok(Self(voter_id.to_string()))
                }
                Some(_) => Err(AppError::Forbidden("invalid voter signature".to_string())),
                None if state.auth_disabled => Ok(Self(voter_id.to_string())),
                None => Err(AppError::Unauthorized),
            };
        }

        parts
            .extensions
            .get::<Caller>()
            .map(|caller| Self(caller.id.clone()))
            .ok_or(AppError::Unauthorized)
    }
}
