use chrono::{DateTime, Utc};
use context_memory::{AiSummary, BackendKind, CacheStats, Message, Project, Role};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectInfo {
    pub key: String,
    pub path: String,
    pub name: String,
}

impl From<&Project> for ProjectInfo {
    fn from(project: &Project) -> Self {
        Self {
            key: project.key.to_string(),
            path: project.path.display().to_string(),
            name: project.name.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageView {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl From<Message> for MessageView {
    fn from(message: Message) -> Self {
        Self {
            role: message.role,
            content: message.content,
            timestamp: message.timestamp,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ProjectQuery {
    pub project_path: String,
}

#[derive(Debug, Deserialize)]
pub struct ContextQuery {
    pub project_path: String,
    pub last: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ContextResponse {
    pub project: ProjectInfo,
    pub ai: String,
    pub known_ai: bool,
    pub retention_limit: usize,
    pub total: usize,
    pub messages: Vec<MessageView>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct IncomingMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct AppendRequest {
    pub project_path: String,
    pub messages: Vec<IncomingMessage>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AppendResponse {
    pub project: ProjectInfo,
    pub ai: String,
    pub appended: usize,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct TurnRequest {
    pub project_path: String,
    pub prompt: String,
    pub response: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TurnResponse {
    pub project: ProjectInfo,
    pub ai: String,
    pub remembered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClearResponse {
    pub project: ProjectInfo,
    pub target: String,
    pub cleared: usize,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub project_path: String,
    pub query: String,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchResponse {
    pub project: ProjectInfo,
    pub ai: String,
    pub query: String,
    pub results: Vec<MessageView>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProjectListResponse {
    pub projects: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AiListResponse {
    pub project: ProjectInfo,
    pub ais: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AiActivity {
    pub ai: String,
    pub known_ai: bool,
    pub message_count: usize,
    pub updated_at: DateTime<Utc>,
}

impl From<AiSummary> for AiActivity {
    fn from(summary: AiSummary) -> Self {
        Self {
            known_ai: summary.ai.is_known(),
            ai: summary.ai.into(),
            message_count: summary.message_count,
            updated_at: summary.updated_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProjectSummaryResponse {
    pub project: ProjectInfo,
    pub total_messages: usize,
    pub last_active: Option<DateTime<Utc>>,
    pub ais: Vec<AiActivity>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub backend: BackendKind,
}

#[derive(Debug, Serialize)]
pub struct SystemStats {
    pub backend: BackendKind,
    pub retention_limit: usize,
    pub cache: Option<CacheStats>,
    pub version: &'static str,
}
