pub mod health;

use axum::{
    routing::{get, post},
    Router,
};

use crate::matcher::handlers as matcher;
use crate::projects::handlers as projects;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // ── Projects ───────────────────────────────────────────────────────
        .route("/projects", post(projects::handle_create_project))
        // ── Matcher ────────────────────────────────────────────────────────
        .route(
            "/projects/:project_id/run_match",
            post(matcher::handle_run_match),
        )
        .route(
            "/projects/:project_id/matches",
            get(matcher::handle_get_matches),
        )
        .with_state(state)
}
