//! HTTP server implementation for the mini-app API.
//!
//! Handlers authenticate the caller from the signed init-data token, resolve
//! the local user through the role directory, then delegate role- and
//! state-gated mutations to the lifecycle engine.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::HeaderMap,
    routing::{get, patch, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::auth;
use crate::config::Config;
use crate::db::Database;
use crate::error::{ApiError, ApiResult};
use crate::lifecycle::{self, TaskPatch};
use crate::notify::Notifier;
use crate::types::{Role, TaskStatus, TaskWithAssignee, User};

/// Header carrying the signed init data on authenticated endpoints.
pub const INIT_DATA_HEADER: &str = "x-telegram-init-data";

/// Shared state for request handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub notifier: Notifier,
    pub config: Arc<Config>,
}

/// Verify a raw init-data token and resolve the local user.
///
/// Verification failures are collapsed into the uniform authentication
/// failure; the specific cause only reaches the debug log.
fn authenticate(state: &AppState, init_data: &str) -> ApiResult<User> {
    let claim = auth::verify_init_data(init_data, &state.config.bot.token).map_err(|e| {
        debug!(error = %e, "init data verification failed");
        ApiError::auth_failed()
    })?;

    let user = state.db.resolve_or_create(
        claim.id,
        &claim.full_name(),
        state.config.bot.owner_id,
    )?;
    Ok(user)
}

fn authenticate_headers(state: &AppState, headers: &HeaderMap) -> ApiResult<User> {
    let raw = headers
        .get(INIT_DATA_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(ApiError::auth_failed)?;
    authenticate(state, raw)
}

fn ms_to_datetime(ms: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
}

// =============================================================================
// Request/response bodies
// =============================================================================

#[derive(Debug, Deserialize)]
struct AuthRequest {
    #[serde(rename = "initData")]
    init_data: String,
}

#[derive(Debug, Serialize)]
struct UserProfile {
    id: i64,
    telegram_id: i64,
    full_name: String,
    role: Role,
}

impl UserProfile {
    fn from_user(user: &User) -> Self {
        Self {
            id: user.id,
            telegram_id: user.telegram_id,
            full_name: user.full_name.clone(),
            role: user.role,
        }
    }
}

#[derive(Debug, Serialize)]
struct AuthResponse {
    user: UserProfile,
}

#[derive(Debug, Serialize)]
struct UserView {
    id: i64,
    full_name: String,
    role: Role,
}

#[derive(Debug, Deserialize)]
struct RoleUpdate {
    role: Role,
}

#[derive(Debug, Deserialize)]
struct TaskListParams {
    filter: Option<String>,
}

/// A task as a specific viewer sees it.
#[derive(Debug, Serialize)]
pub struct TaskView {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub deadline: Option<DateTime<Utc>>,
    pub assignee_name: String,
    pub is_mine: bool,
    pub is_locked: bool,
    pub dispute_reason: Option<String>,
}

impl TaskView {
    /// Project a task row for a specific viewer: flag ownership and redact
    /// the dispute reason from workers looking at other people's tasks.
    pub fn for_viewer(row: TaskWithAssignee, viewer: &User) -> Self {
        let task = row.task;
        let is_mine = task.assignee_id == viewer.id;
        let dispute_reason = if viewer.role != Role::Worker || is_mine {
            task.dispute_reason
        } else {
            None
        };

        Self {
            id: task.id,
            title: task.title,
            description: task.description,
            status: task.status,
            deadline: task.deadline.and_then(ms_to_datetime),
            assignee_name: row.assignee_name,
            is_mine,
            is_locked: task.is_locked,
            dispute_reason,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TaskCreate {
    title: String,
    #[serde(default)]
    description: Option<String>,
    assignee_id: i64,
    #[serde(default)]
    deadline: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TaskUpdateBody {
    status: Option<TaskStatus>,
    title: Option<String>,
    description: Option<String>,
    deadline: Option<DateTime<Utc>>,
    dispute_reason: Option<String>,
}

#[derive(Debug, Serialize)]
struct AnnouncementView {
    id: i64,
    content: String,
    author_name: String,
    created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct AnnouncementCreate {
    content: String,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

// =============================================================================
// Handlers
// =============================================================================

async fn auth_user(
    State(state): State<AppState>,
    Json(body): Json<AuthRequest>,
) -> ApiResult<Json<AuthResponse>> {
    let user = authenticate(&state, &body.init_data)?;
    Ok(Json(AuthResponse {
        user: UserProfile::from_user(&user),
    }))
}

async fn list_users(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<UserView>>> {
    authenticate_headers(&state, &headers)?;

    let users = state.db.list_users()?;
    let views = users
        .into_iter()
        .map(|u| UserView {
            id: u.id,
            full_name: u.full_name,
            role: u.role,
        })
        .collect();
    Ok(Json(views))
}

async fn update_user_role(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    headers: HeaderMap,
    Json(body): Json<RoleUpdate>,
) -> ApiResult<Json<StatusResponse>> {
    let acting = authenticate_headers(&state, &headers)?;

    state
        .db
        .set_role(&acting, user_id, body.role, state.config.bot.owner_id)?;

    Ok(Json(StatusResponse { status: "ok" }))
}

async fn list_tasks(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<TaskListParams>,
) -> ApiResult<Json<Vec<TaskView>>> {
    let user = authenticate_headers(&state, &headers)?;

    // Workers are always restricted to their own assignments; anyone can
    // narrow the listing with filter=mine.
    let assignee = if user.role == Role::Worker || params.filter.as_deref() == Some("mine") {
        Some(user.id)
    } else {
        None
    };

    let tasks = state.db.list_tasks(assignee)?;
    let views = tasks
        .into_iter()
        .map(|row| TaskView::for_viewer(row, &user))
        .collect();
    Ok(Json(views))
}

async fn create_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<TaskCreate>,
) -> ApiResult<Json<StatusResponse>> {
    let creator = authenticate_headers(&state, &headers)?;
    if !creator.role.is_privileged() {
        return Err(ApiError::forbidden("only admins and the owner can create tasks"));
    }

    let assignee = state
        .db
        .get_user(body.assignee_id)?
        .ok_or_else(|| ApiError::user_not_found(body.assignee_id))?;

    let deadline = body.deadline.map(|d| d.timestamp_millis());
    let task = state.db.create_task(
        &body.title,
        body.description.as_deref(),
        creator.id,
        assignee.id,
        deadline,
    )?;

    state.notifier.notify(
        assignee.telegram_id,
        &format!("\u{1f4dd} New task: {}", task.title),
    );

    Ok(Json(StatusResponse { status: "ok" }))
}

async fn update_task(
    State(state): State<AppState>,
    Path(task_id): Path<i64>,
    headers: HeaderMap,
    Json(body): Json<TaskUpdateBody>,
) -> ApiResult<Json<StatusResponse>> {
    let actor = authenticate_headers(&state, &headers)?;

    let patch = TaskPatch {
        status: body.status,
        title: body.title,
        description: body.description,
        deadline: body.deadline.map(|d| d.timestamp_millis()),
        dispute_reason: body.dispute_reason,
    };

    lifecycle::execute_update(&state.db, &state.notifier, &actor, task_id, &patch)?;

    Ok(Json(StatusResponse { status: "updated" }))
}

async fn list_announcements(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<AnnouncementView>>> {
    let items = state.db.recent_announcements()?;
    let views = items
        .into_iter()
        .map(|a| AnnouncementView {
            id: a.id,
            content: a.content,
            author_name: a.author_name,
            created_at: ms_to_datetime(a.created_at),
        })
        .collect();
    Ok(Json(views))
}

async fn create_announcement(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<AnnouncementCreate>,
) -> ApiResult<Json<StatusResponse>> {
    let author = authenticate_headers(&state, &headers)?;
    if !author.role.is_privileged() {
        return Err(ApiError::forbidden(
            "only admins and the owner can post announcements",
        ));
    }

    let announcement = state
        .db
        .insert_announcement(&body.content, &author.full_name)?;

    let ids = state.db.all_telegram_ids()?;
    state.notifier.broadcast(
        &ids,
        &format!("\u{1f4e2} New announcement:\n{}", announcement.content),
    );

    Ok(Json(StatusResponse { status: "ok" }))
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// =============================================================================
// Router and serving
// =============================================================================

/// Build the router with all routes.
fn build_router(state: AppState) -> Router {
    // The mini-app is served from the platform's web view; allow any origin.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/auth", post(auth_user))
        .route("/api/users", get(list_users))
        .route("/api/users/{user_id}/role", patch(update_user_role))
        .route("/api/tasks", get(list_tasks).post(create_task))
        .route("/api/tasks/{task_id}", patch(update_task))
        .route(
            "/api/announcements",
            get(list_announcements).post(create_announcement),
        )
        .route("/api/health", get(health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutdown signal received");
}

/// Bind and serve the HTTP API until a shutdown signal arrives.
pub async fn serve(state: AppState, addr: SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("API server listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
