use houndcore::{EngineError, Workflow, WorkflowError};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory registry of workflow definitions, keyed by workflow id.
pub struct WorkflowManager {
    workflows: RwLock<HashMap<String, Arc<Workflow>>>,
}

impl WorkflowManager {
    pub fn new() -> Self {
        Self {
            workflows: RwLock::new(HashMap::new()),
        }
    }

    /// Validates and registers a definition. Re-registering an id
    /// replaces the previous definition.
    pub async fn register(&self, workflow: Workflow) -> Result<(), EngineError> {
        workflow.validate()?;
        tracing::debug!(workflow_id = %workflow.id, steps = workflow.steps.len(), "registered workflow");
        self.workflows
            .write()
            .await
            .insert(workflow.id.clone(), Arc::new(workflow));
        Ok(())
    }

    pub async fn get_workflow(&self, id: &str) -> Result<Arc<Workflow>, EngineError> {
        self.workflows
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| WorkflowError::NotFound(id.to_string()).into())
    }

    pub async fn remove(&self, id: &str) -> bool {
        self.workflows.write().await.remove(id).is_some()
    }

    /// `(id, name)` pairs of everything registered.
    pub async fn list(&self) -> Vec<(String, String)> {
        self.workflows
            .read()
            .await
            .values()
            .map(|w| (w.id.clone(), w.name.clone()))
            .collect()
    }

    /// Parse and register a single JSON definition file.
    pub async fn load_file(&self, path: &Path) -> Result<String, EngineError> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| WorkflowError::Invalid(format!("{}: {e}", path.display())))?;
        let workflow: Workflow = serde_json::from_str(&raw)
            .map_err(|e| WorkflowError::Invalid(format!("{}: {e}", path.display())))?;
        let id = workflow.id.clone();
        self.register(workflow).await?;
        Ok(id)
    }

    /// Register every `*.json` definition in a directory. Returns the
    /// ids loaded, in no particular order.
    pub async fn load_dir(&self, dir: &Path) -> Result<Vec<String>, EngineError> {
        let mut loaded = Vec::new();
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .map_err(|e| WorkflowError::Invalid(format!("{}: {e}", dir.display())))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| WorkflowError::Invalid(e.to_string()))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                loaded.push(self.load_file(&path).await?);
            }
        }
        Ok(loaded)
    }
}

impl Default for WorkflowManager {
    fn default() -> Self {
        Self::new()
    }
}
