use axum::{Json, extract::State, response::IntoResponse};

use super::ContextState;
use crate::models::{
    context::{HealthResponse, SystemStats},
    error::ApiResult,
};

pub async fn health_check(State(state): State<ContextState>) -> ApiResult<impl IntoResponse> {
    state.manager.health().await?;

    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        backend: state.manager.backend(),
    }))
}

pub async fn get_stats(State(state): State<ContextState>) -> ApiResult<impl IntoResponse> {
    let stats = SystemStats {
        backend: state.manager.backend(),
        retention_limit: state.manager.retention_limit(),
        cache: state.manager.cache_stats(),
        version: env!("CARGO_PKG_VERSION"),
    };

    Ok(Json(stats))
}
