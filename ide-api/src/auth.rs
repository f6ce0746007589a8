use crate::error::ApiError;
use axum::{extract::Request, http::StatusCode, middleware::Next, response::Response};
use ide_orchestrator::{WorkspaceOrchestrator, WorkspaceRecord};

#[derive(Clone, Debug)]
pub struct AuthenticatedUser {
    pub username: String,
    pub email: Option<String>,
}

/// Auth middleware - takes the caller from headers set by the fronting proxy
///
/// `x-ide-user` is set by the portal's auth proxy, `x-forwarded-user` by
/// oauth2-proxy. `x-user` is accepted for local development.
pub async fn auth_middleware(mut req: Request, next: Next) -> Result<Response, StatusCode> {
    let username = req
        .headers()
        .get("x-ide-user")
        .or_else(|| req.headers().get("x-forwarded-user"))
        .or_else(|| req.headers().get("x-user"))
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string());

    let email = req
        .headers()
        .get("x-ide-email")
        .or_else(|| req.headers().get("x-forwarded-email"))
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string());

    let username = username.ok_or(StatusCode::UNAUTHORIZED)?;

    req.extensions_mut()
        .insert(AuthenticatedUser { username, email });

    Ok(next.run(req).await)
}

/// Loads the workspace and checks the caller owns it.
///
/// - `ApiError::NotFound` if the workspace doesn't exist
/// - `ApiError::Forbidden` if it belongs to someone else
pub async fn check_workspace_owner(
    orchestrator: &WorkspaceOrchestrator,
    workspace_id: &str,
    user: &AuthenticatedUser,
) -> Result<WorkspaceRecord, ApiError> {
    let workspace = orchestrator
        .get_workspace(workspace_id)
        .await
        .map_err(|_| ApiError::NotFound(format!("Workspace not found: {}", workspace_id)))?;

    if workspace.owner_id != user.username {
        return Err(ApiError::Forbidden(format!(
            "Access denied: workspace {} belongs to another user",
            workspace_id
        )));
    }

    Ok(workspace)
}
