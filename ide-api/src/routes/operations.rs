use crate::{
    auth::{check_workspace_owner, AuthenticatedUser},
    error::{ApiError, ApiResult},
    state::AppState,
};
use axum::{
    extract::{Path, Query, State},
    routing::get,
    Extension, Json, Router,
};
use ide_orchestrator::{Operation, OperationStatus, OperationType};
use serde::Deserialize;
use utoipa::IntoParams;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/operations", get(list_operations))
        .route("/api/v1/operations/{id}", get(get_operation))
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct OperationsQuery {
    /// Only operations on this workspace
    workspace_id: Option<String>,
    /// create, delete, extend, reap or reconcile
    #[serde(rename = "type")]
    operation_type: Option<String>,
    /// running, success or failed
    status: Option<String>,
}

fn parse_enum<T: serde::de::DeserializeOwned>(
    field: &str,
    value: Option<String>,
) -> ApiResult<Option<T>> {
    value
        .map(|s| {
            serde_json::from_value::<T>(serde_json::Value::String(s.clone()))
                .map_err(|_| ApiError::BadRequest(format!("Invalid {}: {}", field, s)))
        })
        .transpose()
}

/// List operations, newest first
#[utoipa::path(
    get,
    path = "/api/v1/operations",
    tag = "operations",
    params(OperationsQuery),
    responses(
        (status = 200, description = "Matching operations", body = [Operation]),
        (status = 400, description = "Unknown type or status"),
        (status = 401, description = "No authenticated user")
    )
)]
pub async fn list_operations(
    State(state): State<AppState>,
    Query(query): Query<OperationsQuery>,
) -> ApiResult<Json<Vec<Operation>>> {
    let operation_type = parse_enum::<OperationType>("type", query.operation_type)?;
    let status = parse_enum::<OperationStatus>("status", query.status)?;

    let operations = state
        .orchestrator
        .get_operations(query.workspace_id.as_deref(), operation_type, status)
        .await?;

    Ok(Json(operations))
}

/// Get one operation. Operations on workspaces that still exist are only
/// visible to their owner.
#[utoipa::path(
    get,
    path = "/api/v1/operations/{id}",
    tag = "operations",
    params(("id" = String, Path, description = "Operation id")),
    responses(
        (status = 200, description = "The operation", body = Operation),
        (status = 403, description = "Workspace belongs to another user"),
        (status = 404, description = "Unknown operation")
    )
)]
pub async fn get_operation(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Extension(user): Extension<AuthenticatedUser>,
) -> ApiResult<Json<Operation>> {
    let operation = state.orchestrator.get_operation(&id).await?;

    match check_workspace_owner(&state.orchestrator, &operation.workspace_id, &user).await {
        Ok(_) | Err(ApiError::NotFound(_)) => Ok(Json(operation)),
        Err(e) => Err(e),
    }
}
