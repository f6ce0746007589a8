use crate::routes::workspaces::ExtendRequest;
use ide_orchestrator::{
    CreateWorkspaceRequest, IdeKind, Operation, OperationStatus, OperationType, ResourceRequest,
    WorkspaceHandle, WorkspacePage, WorkspaceRecord, WorkspaceStatus,
};
use ide_orchestrator::workspace::ClusterNames;
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::health::health_check,
        crate::routes::health::readiness_check,
        crate::routes::workspaces::list_workspaces,
        crate::routes::workspaces::create_workspace,
        crate::routes::workspaces::get_workspace,
        crate::routes::workspaces::delete_workspace,
        crate::routes::workspaces::extend_workspace,
        crate::routes::operations::list_operations,
        crate::routes::operations::get_operation,
    ),
    components(
        schemas(
            IdeKind,
            ResourceRequest,
            ClusterNames,
            WorkspaceStatus,
            WorkspaceRecord,
            WorkspaceHandle,
            WorkspacePage,
            CreateWorkspaceRequest,
            ExtendRequest,
            Operation,
            OperationStatus,
            OperationType
        )
    ),
    tags(
        (name = "ide-api", description = "Ephemeral IDE workspace API")
    )
)]
pub struct ApiDoc;
