use ide_orchestrator::WorkspaceOrchestrator;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: WorkspaceOrchestrator,
}

impl AppState {
    pub fn new(orchestrator: WorkspaceOrchestrator) -> Self {
        Self { orchestrator }
    }
}
