use crate::{
    auth::{check_workspace_owner, AuthenticatedUser},
    error::{ApiError, ApiResult},
    state::AppState,
};
use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Extension, Json, Router,
};
use ide_orchestrator::{
    CreateWorkspaceRequest, IdeKind, PageRequest, WorkspaceFilters, WorkspaceHandle,
    WorkspacePage, WorkspaceRecord, WorkspaceStatus,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/v1/workspaces",
            get(list_workspaces).post(create_workspace),
        )
        .route(
            "/api/v1/workspaces/{id}",
            get(get_workspace).delete(delete_workspace),
        )
        .route("/api/v1/workspaces/{id}/extend", post(extend_workspace))
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListQuery {
    /// jupyter, notebook, code-server or vscode
    ide_kind: Option<String>,
    /// pending, active or failed
    status: Option<String>,
    /// 1-based page number
    page: Option<u32>,
    /// Items per page, at most 100
    page_size: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ExtendRequest {
    pub days: u32,
}

/// Create a workspace for the caller
#[utoipa::path(
    post,
    path = "/api/v1/workspaces",
    tag = "workspaces",
    request_body = CreateWorkspaceRequest,
    responses(
        (status = 200, description = "Workspace is active", body = WorkspaceHandle),
        (status = 400, description = "Invalid input"),
        (status = 403, description = "Quota exceeded"),
        (status = 404, description = "Unknown image"),
        (status = 502, description = "Cluster call failed")
    )
)]
pub async fn create_workspace(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(mut req): Json<CreateWorkspaceRequest>,
) -> ApiResult<Json<WorkspaceHandle>> {
    // Override owner with authenticated user
    req.owner_id = user.username;

    let handle = state.orchestrator.create_workspace(req).await?;

    Ok(Json(handle))
}

/// List the caller's workspaces
#[utoipa::path(
    get,
    path = "/api/v1/workspaces",
    tag = "workspaces",
    params(ListQuery),
    responses(
        (status = 200, description = "One page of workspaces", body = WorkspacePage),
        (status = 400, description = "Unknown ide_kind or status")
    )
)]
pub async fn list_workspaces(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<WorkspacePage>> {
    let ide_kind = query
        .ide_kind
        .as_deref()
        .map(str::parse::<IdeKind>)
        .transpose()?;

    let status = query
        .status
        .map(|s| {
            serde_json::from_value::<WorkspaceStatus>(serde_json::Value::String(s.clone()))
                .map_err(|_| ApiError::BadRequest(format!("Invalid status: {}", s)))
        })
        .transpose()?;

    let filters = WorkspaceFilters { ide_kind, status };
    let page = PageRequest::new(query.page, query.page_size);

    let workspaces = state
        .orchestrator
        .list_workspaces(&user.username, &filters, page)
        .await?;

    Ok(Json(workspaces))
}

/// Get one of the caller's workspaces
#[utoipa::path(
    get,
    path = "/api/v1/workspaces/{id}",
    tag = "workspaces",
    params(("id" = String, Path, description = "Workspace id")),
    responses(
        (status = 200, description = "The workspace record", body = WorkspaceRecord),
        (status = 403, description = "Workspace belongs to another user"),
        (status = 404, description = "Unknown workspace")
    )
)]
pub async fn get_workspace(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Extension(user): Extension<AuthenticatedUser>,
) -> ApiResult<Json<WorkspaceRecord>> {
    let workspace = check_workspace_owner(&state.orchestrator, &id, &user).await?;

    Ok(Json(workspace))
}

/// Delete a workspace and its cluster objects
#[utoipa::path(
    delete,
    path = "/api/v1/workspaces/{id}",
    tag = "workspaces",
    params(("id" = String, Path, description = "Workspace id")),
    responses(
        (status = 200, description = "Workspace deleted"),
        (status = 403, description = "Workspace belongs to another user"),
        (status = 404, description = "Unknown workspace"),
        (status = 502, description = "Cluster delete failed, record kept")
    )
)]
pub async fn delete_workspace(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Extension(user): Extension<AuthenticatedUser>,
) -> ApiResult<Json<serde_json::Value>> {
    check_workspace_owner(&state.orchestrator, &id, &user).await?;

    state.orchestrator.delete_workspace(&id).await?;

    Ok(Json(serde_json::json!({ "message": "Workspace deleted" })))
}

/// Push the lease out by a number of days
#[utoipa::path(
    post,
    path = "/api/v1/workspaces/{id}/extend",
    tag = "workspaces",
    params(("id" = String, Path, description = "Workspace id")),
    request_body = ExtendRequest,
    responses(
        (status = 200, description = "New lease", body = WorkspaceHandle),
        (status = 400, description = "days must be at least 1"),
        (status = 403, description = "Not the owner, or lease cap reached"),
        (status = 404, description = "Unknown workspace")
    )
)]
pub async fn extend_workspace(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(req): Json<ExtendRequest>,
) -> ApiResult<Json<WorkspaceHandle>> {
    check_workspace_owner(&state.orchestrator, &id, &user).await?;

    let handle = state.orchestrator.extend_workspace(&id, req.days).await?;

    Ok(Json(handle))
}
