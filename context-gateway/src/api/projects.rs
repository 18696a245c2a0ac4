use axum::{
    Json,
    extract::{Query, State},
    response::IntoResponse,
};
use context_memory::Project;

use super::ContextState;
use crate::models::{
    context::{
        AiActivity, AiListResponse, ProjectInfo, ProjectListResponse, ProjectQuery,
        ProjectSummaryResponse,
    },
    error::ApiResult,
};

pub async fn list_projects(State(state): State<ContextState>) -> ApiResult<impl IntoResponse> {
    let projects = state.manager.list_projects().await?;

    Ok(Json(ProjectListResponse {
        projects: projects.into_iter().map(String::from).collect(),
    }))
}

pub async fn list_ais(
    State(state): State<ContextState>,
    Query(query): Query<ProjectQuery>,
) -> ApiResult<impl IntoResponse> {
    let project = Project::resolve(&query.project_path)?;
    let ais = state.manager.list_ais(&project.key).await?;

    Ok(Json(AiListResponse {
        project: ProjectInfo::from(&project),
        ais: ais.into_iter().map(String::from).collect(),
    }))
}

pub async fn project_summary(
    State(state): State<ContextState>,
    Query(query): Query<ProjectQuery>,
) -> ApiResult<impl IntoResponse> {
    let project = Project::resolve(&query.project_path)?;
    let summaries = state.manager.project_info(&project.key).await?;

    let ais: Vec<AiActivity> = summaries.into_iter().map(AiActivity::from).collect();
    Ok(Json(ProjectSummaryResponse {
        project: ProjectInfo::from(&project),
        total_messages: ais.iter().map(|a| a.message_count).sum(),
        last_active: ais.iter().map(|a| a.updated_at).max(),
        ais,
    }))
}
