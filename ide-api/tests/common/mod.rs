//! Common test utilities and helpers for ide-api tests
//!
//! Every test app runs against its own in-memory database and an
//! in-memory cluster the test can inspect or make fail.

#![allow(dead_code)]

use axum::Router;
use ide_api::AppState;
use ide_orchestrator::test_utils::{test_config, test_orchestrator, TEST_IMAGE};
use ide_orchestrator::{
    CreateWorkspaceRequest, IdeKind, InMemoryCluster, OrchestratorConfig, ResourceRequest,
    WorkspaceOrchestrator,
};
use std::sync::Arc;

/// Create a test app over the given orchestrator
pub async fn create_test_app(orchestrator: WorkspaceOrchestrator) -> Router {
    ide_api::create_app(AppState::new(orchestrator))
        .await
        .expect("Failed to create test app")
}

/// Create a test workspace request with default values
pub fn create_test_workspace_request(ide_kind: IdeKind) -> CreateWorkspaceRequest {
    CreateWorkspaceRequest {
        owner_id: String::new(),
        ide_kind,
        image_ref: TEST_IMAGE.to_string(),
        resources: ResourceRequest {
            cpu_units: 1,
            memory_units: 2,
        },
        data_warehouse_binding: None,
    }
}

/// Helper to extract JSON body from axum response
pub async fn extract_json_body<T>(response: axum::response::Response) -> T
where
    T: serde::de::DeserializeOwned,
{
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read response body");

    serde_json::from_slice(&body).expect("Failed to deserialize JSON")
}

/// Helper to create authenticated request headers
pub fn auth_headers(username: &str) -> Vec<(&'static str, &str)> {
    vec![("x-user", username)]
}

/// TestClient to encapsulate API interaction logic
pub struct TestClient {
    pub app: Router,
    pub orchestrator: WorkspaceOrchestrator,
    pub cluster: Arc<InMemoryCluster>,
}

impl TestClient {
    /// Client over the default test configuration
    pub async fn new() -> Self {
        Self::with_config(test_config()).await
    }

    pub async fn with_config(config: OrchestratorConfig) -> Self {
        let cluster = Arc::new(InMemoryCluster::new());
        let orchestrator = test_orchestrator(cluster.clone(), config, &[]).await;
        let app = create_test_app(orchestrator.clone()).await;
        Self {
            app,
            orchestrator,
            cluster,
        }
    }

    /// Send a request to the API
    pub async fn send_request(
        &self,
        request: axum::http::Request<axum::body::Body>,
    ) -> axum::http::Response<axum::body::Body> {
        // Clone the app to allow reuse (Router is cheap to clone)
        use tower::ServiceExt;
        self.app.clone().oneshot(request).await.unwrap()
    }

    fn request(
        method: &str,
        uri: &str,
        headers: Option<Vec<(&str, &str)>>,
    ) -> axum::http::request::Builder {
        let mut builder = axum::http::Request::builder().method(method).uri(uri);

        if let Some(h) = headers {
            for (k, v) in h {
                builder = builder.header(k, v);
            }
        }

        builder
    }

    /// Post JSON to an endpoint
    pub async fn post<T: serde::Serialize>(
        &self,
        uri: &str,
        body: &T,
        headers: Option<Vec<(&str, &str)>>,
    ) -> axum::http::Response<axum::body::Body> {
        let req_body = serde_json::to_string(body).expect("Failed to serialize request body");
        let request = Self::request("POST", uri, headers)
            .header("content-type", "application/json")
            .body(axum::body::Body::from(req_body))
            .unwrap();
        self.send_request(request).await
    }

    /// Get request to an endpoint
    pub async fn get(
        &self,
        uri: &str,
        headers: Option<Vec<(&str, &str)>>,
    ) -> axum::http::Response<axum::body::Body> {
        let request = Self::request("GET", uri, headers)
            .body(axum::body::Body::empty())
            .unwrap();
        self.send_request(request).await
    }

    /// Delete request to an endpoint
    pub async fn delete(
        &self,
        uri: &str,
        headers: Option<Vec<(&str, &str)>>,
    ) -> axum::http::Response<axum::body::Body> {
        let request = Self::request("DELETE", uri, headers)
            .body(axum::body::Body::empty())
            .unwrap();
        self.send_request(request).await
    }

    /// Create a workspace through the API and return its handle
    pub async fn create_workspace(
        &self,
        user: &str,
        ide_kind: IdeKind,
    ) -> ide_orchestrator::WorkspaceHandle {
        let response = self
            .post(
                "/api/v1/workspaces",
                &create_test_workspace_request(ide_kind),
                Some(auth_headers(user)),
            )
            .await;
        assert_eq!(response.status(), axum::http::StatusCode::OK);
        extract_json_body(response).await
    }
}
