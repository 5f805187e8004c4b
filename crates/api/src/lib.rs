//! HTTP API layer for livepoll-rs.
//!
//! - **Endpoints**: poll management, voting, results, long-poll waits
//! - **Extractors**: caller and voter identity
//! - **Middleware**: caller identification
//! - **Streaming**: WebSocket push of poll updates
//!
//! Built on Axum 0.8 with Tower middleware stack.

pub mod endpoints;
pub mod extractors;
pub mod middleware;
pub mod response;
pub mod streaming;

use axum::{Router, routing::get};

pub use endpoints::router;
pub use middleware::{AppState, Caller};
pub use streaming::poll_stream_handler;

/// The complete application: the API under `/api` plus the push endpoint.
pub fn app(state: AppState) -> Router {
    Router::new()
        .nest("/api", router())
        .route("/ws/polls/{id}", get(poll_stream_handler))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth_middleware,
        ))
        .with_state(state)
}
