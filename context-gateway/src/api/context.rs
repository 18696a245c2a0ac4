use axum::{
    Json,
    extract::{Path, Query, State},
    response::IntoResponse,
};
use context_memory::{AiName, ClearTarget, DEFAULT_SEARCH_LIMIT, Message, Project};
use tracing::{info, warn};

use super::ContextState;
use crate::models::{
    context::{
        AppendRequest, AppendResponse, ClearResponse, ContextQuery, ContextResponse, MessageView,
        ProjectInfo, ProjectQuery, SearchQuery, SearchResponse, TurnRequest, TurnResponse,
    },
    error::{ApiError, ApiResult},
};

pub async fn get_context(
    State(state): State<ContextState>,
    Path(ai): Path<String>,
    Query(query): Query<ContextQuery>,
) -> ApiResult<impl IntoResponse> {
    let ai = AiName::parse(&ai)?;
    let project = Project::resolve(&query.project_path)?;

    let mut messages = state.manager.get_context(&project.key, &ai).await?;
    let total = messages.len();
    if let Some(last) = query.last {
        messages.drain(..total.saturating_sub(last));
    }

    let response = ContextResponse {
        project: ProjectInfo::from(&project),
        known_ai: ai.is_known(),
        ai: ai.to_string(),
        retention_limit: state.manager.retention_limit(),
        total,
        messages: messages.into_iter().map(MessageView::from).collect(),
    };

    Ok(Json(response))
}

pub async fn append_messages(
    State(state): State<ContextState>,
    Path(ai): Path<String>,
    Json(request): Json<AppendRequest>,
) -> ApiResult<impl IntoResponse> {
    let ai = AiName::parse(&ai)?;
    let project = Project::resolve(&request.project_path)?;

    let messages: Vec<Message> = request
        .messages
        .into_iter()
        .map(|m| Message::new(m.role, m.content))
        .collect();
    let appended = messages.len();

    state
        .manager
        .append_and_persist(&project.key, &ai, messages)
        .await?;

    Ok(Json(AppendResponse {
        project: ProjectInfo::from(&project),
        ai: ai.to_string(),
        appended,
    }))
}

/// Remember one prompt/response exchange.
///
/// The answer has already been produced, so a storage failure degrades to
/// `remembered: false` instead of failing the call.
pub async fn record_turn(
    State(state): State<ContextState>,
    Path(ai): Path<String>,
    Json(request): Json<TurnRequest>,
) -> ApiResult<impl IntoResponse> {
    let ai = AiName::parse(&ai)?;
    let project = Project::resolve(&request.project_path)?;

    let (remembered, warning) = match state
        .manager
        .record_turn(&project.key, &ai, request.prompt, request.response)
        .await
    {
        Ok(()) => (true, None),
        Err(e) if e.is_storage_unavailable() => {
            warn!("Turn for {} in {} was not remembered: {}", ai, project.key, e);
            (false, Some(format!("conversation was not saved: {e}")))
        },
        Err(e) => return Err(e.into()),
    };

    Ok(Json(TurnResponse {
        project: ProjectInfo::from(&project),
        ai: ai.to_string(),
        remembered,
        warning,
    }))
}

pub async fn clear_context(
    State(state): State<ContextState>,
    Path(target): Path<String>,
    Query(query): Query<ProjectQuery>,
) -> ApiResult<impl IntoResponse> {
    let target: ClearTarget = target.parse()?;
    let project = Project::resolve(&query.project_path)?;

    let cleared = state.manager.clear(&project.key, &target).await?;
    let target = match target {
        ClearTarget::Ai(ai) => ai.to_string(),
        ClearTarget::All => "all".to_string(),
    };
    info!("Cleared {} context for project {}", target, project.name);

    Ok(Json(ClearResponse {
        project: ProjectInfo::from(&project),
        target,
        cleared,
    }))
}

pub async fn search_context(
    State(state): State<ContextState>,
    Path(ai): Path<String>,
    Query(query): Query<SearchQuery>,
) -> ApiResult<impl IntoResponse> {
    let ai = AiName::parse(&ai)?;
    let project = Project::resolve(&query.project_path)?;
    if query.query.trim().is_empty() {
        return Err(ApiError::BadRequest("query must not be empty".to_string()));
    }

    let results = state
        .manager
        .search(
            &project.key,
            &ai,
            &query.query,
            query.limit.unwrap_or(DEFAULT_SEARCH_LIMIT),
        )
        .await?;

    Ok(Json(SearchResponse {
        project: ProjectInfo::from(&project),
        ai: ai.to_string(),
        query: query.query,
        results: results.into_iter().map(MessageView::from).collect(),
    }))
}
