//! OfficeDesk HTTP API server (Axum).
//!
//! Exposes sessions, operation dispatch, recovery records and extension
//! bindings as JSON endpoints.

pub mod error;
pub mod routes;
pub mod state;

use axum::Router;
use state::AppState;

/// Build the application router with a custom state.
pub fn app_with_state(state: AppState) -> Router {
    Router::new()
        .merge(routes::health_routes())
        .merge(routes::session_routes())
        .merge(routes::dispatch_routes())
        .merge(routes::recovery_routes())
        .merge(routes::extension_routes())
        .with_state(state)
}

#[cfg(test)]
mod tests;
