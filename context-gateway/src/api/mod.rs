use axum::{
    Router,
    routing::{get, post},
};
use context_memory::ContextManager;
use std::sync::Arc;

pub mod context;
pub mod projects;
pub mod stats;

#[derive(Clone)]
pub struct ContextState {
    pub manager: Arc<ContextManager>,
}

pub fn routes(state: ContextState) -> Router {
    Router::new()
        .route("/health", get(stats::health_check))
        .route("/stats", get(stats::get_stats))
        .route(
            "/v1/context/:ai",
            get(context::get_context).delete(context::clear_context),
        )
        .route("/v1/context/:ai/messages", post(context::append_messages))
        .route("/v1/context/:ai/turns", post(context::record_turn))
        .route("/v1/context/:ai/search", get(context::search_context))
        .route("/v1/projects", get(projects::list_projects))
        .route("/v1/projects/ais", get(projects::list_ais))
        .route("/v1/projects/summary", get(projects::project_summary))
        .with_state(state)
}
