use async_trait::async_trait;
use chrono::Utc;
use houndcore::{
    ActionRequest, ActionResponse, BackendIngest, IngestRequest, IngestResponse, PageAutomation,
    StepError, Value,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

/// In-memory page-automation surface for local runs and tests. Keeps
/// a tiny model of a page: the current URL, fields filled so far and
/// canned extraction data keyed by selector.
pub struct SimulatedPage {
    state: Mutex<PageState>,
}

#[derive(Default)]
struct PageState {
    url: Option<String>,
    fields: HashMap<String, String>,
    extractions: HashMap<String, Value>,
    screenshots: u64,
}

impl SimulatedPage {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PageState::default()),
        }
    }

    /// Preload the value an `extract` step against `selector` returns.
    pub async fn stub_extraction(&self, selector: impl Into<String>, value: Value) {
        self.state
            .lock()
            .await
            .extractions
            .insert(selector.into(), value);
    }

    pub async fn current_url(&self) -> Option<String> {
        self.state.lock().await.url.clone()
    }

    pub async fn filled(&self, selector: &str) -> Option<String> {
        self.state.lock().await.fields.get(selector).cloned()
    }

    fn require<'a>(request: &'a ActionRequest, name: &str) -> Result<&'a str, StepError> {
        request
            .param_str(name)
            .ok_or_else(|| StepError::Validation(format!("{} needs '{name}'", request.action)))
    }
}

impl Default for SimulatedPage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PageAutomation for SimulatedPage {
    async fn dispatch(&self, request: ActionRequest) -> Result<ActionResponse, StepError> {
        tracing::debug!(action = %request.action, "simulated dispatch");
        match request.action.as_str() {
            "navigate" => {
                let url = Self::require(&request, "url")?.to_string();
                self.state.lock().await.url = Some(url.clone());
                Ok(ActionResponse::ok(HashMap::from([(
                    "url".to_string(),
                    Value::String(url),
                )])))
            }
            "click" => {
                let selector = Self::require(&request, "selector")?.to_string();
                Ok(ActionResponse::ok(HashMap::from([(
                    "clicked".to_string(),
                    Value::String(selector),
                )])))
            }
            "fill" => {
                let selector = Self::require(&request, "selector")?.to_string();
                let value = Self::require(&request, "value")?.to_string();
                self.state
                    .lock()
                    .await
                    .fields
                    .insert(selector.clone(), value);
                Ok(ActionResponse::ok(HashMap::from([(
                    "filled".to_string(),
                    Value::String(selector),
                )])))
            }
            "extract" => {
                let selector = Self::require(&request, "selector")?;
                let state = self.state.lock().await;
                match state.extractions.get(selector) {
                    Some(value) => Ok(ActionResponse::ok(HashMap::from([(
                        "data".to_string(),
                        value.clone(),
                    )]))),
                    None => Ok(ActionResponse::failure(
                        format!("no element matches '{selector}'"),
                        Some("element_not_found"),
                    )),
                }
            }
            "detect" => {
                let selector = Self::require(&request, "selector")?;
                let found = self.state.lock().await.extractions.contains_key(selector);
                Ok(ActionResponse::ok(HashMap::from([(
                    "found".to_string(),
                    Value::Bool(found),
                )])))
            }
            "wait" => {
                // Only time-based waits consume real time here; any
                // element condition resolves immediately.
                if request.param_str("for") == Some("time") {
                    let ms = request
                        .param("time")
                        .and_then(Value::as_f64)
                        .unwrap_or(0.0)
                        .max(0.0) as u64;
                    tokio::time::sleep(tokio::time::Duration::from_millis(ms)).await;
                }
                Ok(ActionResponse::ok(HashMap::from([(
                    "waited".to_string(),
                    Value::Bool(true),
                )])))
            }
            "screenshot" => {
                let n = {
                    let mut state = self.state.lock().await;
                    state.screenshots += 1;
                    state.screenshots - 1
                };
                Ok(ActionResponse::ok(HashMap::from([
                    (
                        "image".to_string(),
                        Value::String(format!("simulated-screenshot-{n}")),
                    ),
                    (
                        "captured_at".to_string(),
                        Value::String(Utc::now().to_rfc3339()),
                    ),
                ])))
            }
            "verify" => {
                let selector = Self::require(&request, "selector")?;
                let state = self.state.lock().await;
                let actual = state.extractions.get(selector).cloned();
                match (actual, request.param("expected")) {
                    (Some(actual), Some(expected)) if &actual == expected => Ok(
                        ActionResponse::ok(HashMap::from([(
                            "verified".to_string(),
                            Value::Bool(true),
                        )])),
                    ),
                    (Some(actual), Some(_)) => Ok(ActionResponse::failure(
                        format!("verification failed, got {actual:?}"),
                        Some("validation"),
                    )),
                    (None, _) => Ok(ActionResponse::failure(
                        format!("no element matches '{selector}'"),
                        Some("element_not_found"),
                    )),
                    (Some(_), None) => Ok(ActionResponse::ok(HashMap::from([(
                        "verified".to_string(),
                        Value::Bool(true),
                    )]))),
                }
            }
            other => Ok(ActionResponse::failure(
                format!("unsupported action '{other}'"),
                Some("configuration"),
            )),
        }
    }
}

/// Ingestion backend that just counts and remembers what it was
/// given. Entity ids are sequential.
pub struct MemoryIngest {
    counter: AtomicU64,
    received: Mutex<Vec<IngestRequest>>,
}

impl MemoryIngest {
    pub fn new() -> Self {
        Self {
            counter: AtomicU64::new(1),
            received: Mutex::new(Vec::new()),
        }
    }

    pub async fn received(&self) -> Vec<IngestRequest> {
        self.received.lock().await.clone()
    }
}

impl Default for MemoryIngest {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BackendIngest for MemoryIngest {
    async fn ingest(&self, request: IngestRequest) -> Result<IngestResponse, StepError> {
        let id = self.counter.fetch_add(1, Ordering::SeqCst);
        self.received.lock().await.push(request);
        Ok(IngestResponse {
            success: true,
            entity_id: Some(format!("entity-{id}")),
            error: None,
        })
    }
}
