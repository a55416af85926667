//! HTTP surface: probes and controller introspection.

pub mod health;

use axum::Router;

use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new().merge(health::routes()).with_state(state)
}
