use crate::{StepError, Value};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Request envelope for a delegated action step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRequest {
    pub action: String,
    #[serde(flatten)]
    pub params: HashMap<String, Value>,
}

impl ActionRequest {
    pub fn new(action: impl Into<String>, params: HashMap<String, Value>) -> Self {
        Self {
            action: action.into(),
            params,
        }
    }

    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params.get(name)
    }

    pub fn param_str(&self, name: &str) -> Option<&str> {
        self.params.get(name).and_then(Value::as_str)
    }
}

/// Response envelope from the page-automation surface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Machine-readable failure classification (e.g.
    /// `element_not_found`), when the surface can provide one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(flatten)]
    pub fields: HashMap<String, Value>,
}

impl ActionResponse {
    pub fn ok(fields: HashMap<String, Value>) -> Self {
        Self {
            success: true,
            error: None,
            code: None,
            fields,
        }
    }

    pub fn failure(error: impl Into<String>, code: Option<&str>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            code: code.map(str::to_string),
            fields: HashMap::new(),
        }
    }

    /// Convert a failed response into the classified step error.
    pub fn into_result(self) -> Result<HashMap<String, Value>, StepError> {
        if self.success {
            Ok(self.fields)
        } else {
            let message = self.error.unwrap_or_else(|| "action failed".to_string());
            Err(StepError::from_response(self.code.as_deref(), message))
        }
    }
}

/// Narrow contract to whatever manipulates the displayed page. The
/// engine never sees the surface's internals, only this envelope.
#[async_trait]
pub trait PageAutomation: Send + Sync {
    async fn dispatch(&self, request: ActionRequest) -> Result<ActionResponse, StepError>;
}

/// Request for an `ingest` step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestRequest {
    #[serde(rename = "entityType")]
    pub entity_type: String,
    pub data: Value,
    #[serde(rename = "caseId", default, skip_serializing_if = "Option::is_none")]
    pub case_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestResponse {
    pub success: bool,
    #[serde(rename = "entityId", default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Backend-ingestion surface used by `ingest` steps.
#[async_trait]
pub trait BackendIngest: Send + Sync {
    async fn ingest(&self, request: IngestRequest) -> Result<IngestResponse, StepError>;
}
