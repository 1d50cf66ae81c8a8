use crate::{ContextError, ErrorKind, EventEmitter, ExecutionId, StepType, Value};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Number of log entries kept in the ring buffer and persisted.
pub const LOG_CAPACITY: usize = 100;

/// Version tag written into every persisted snapshot.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Lifecycle status of one execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Paused => "paused",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResultRecord {
    pub result: Value,
    pub timestamp: DateTime<Utc>,
}

/// Captured artifact (extracted value, screenshot, ...) recorded
/// during a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceItem {
    pub execution_id: ExecutionId,
    pub label: String,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

/// Final failure record appended once a step's retries are exhausted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    pub message: String,
    pub kind: ErrorKind,
    pub step_id: String,
    pub step_type: StepType,
    pub attempt_count: u32,
    pub retryable: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionTiming {
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub paused_at: Option<DateTime<Utc>>,
    pub resumed_at: Option<DateTime<Utc>>,
}

impl ExecutionTiming {
    pub fn duration_ms(&self) -> Option<u64> {
        let start = self.started_at?;
        let end = self.ended_at.unwrap_or_else(Utc::now);
        Some((end - start).num_milliseconds().max(0) as u64)
    }
}

/// The orchestrator owns the context behind this handle; parallel
/// branches clone the Arc and must bind disjoint output names.
pub type SharedContext = Arc<RwLock<ExecutionContext>>;

/// All runtime state for one workflow run
#[derive(Debug)]
pub struct ExecutionContext {
    pub workflow_id: String,
    pub execution_id: ExecutionId,
    status: ExecutionStatus,
    variables: HashMap<String, Value>,
    step_results: HashMap<String, StepResultRecord>,
    evidence: Vec<EvidenceItem>,
    logs: VecDeque<LogEntry>,
    errors: Vec<FailureRecord>,
    pub timing: ExecutionTiming,
    pub current_step_index: usize,
    pub total_steps: usize,
    events: EventEmitter,
}

impl ExecutionContext {
    pub fn new(workflow_id: impl Into<String>, total_steps: usize, events: EventEmitter) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            execution_id: events.execution_id(),
            status: ExecutionStatus::Pending,
            variables: HashMap::new(),
            step_results: HashMap::new(),
            evidence: Vec::new(),
            logs: VecDeque::new(),
            errors: Vec::new(),
            timing: ExecutionTiming::default(),
            current_step_index: 0,
            total_steps,
            events,
        }
    }

    pub fn status(&self) -> ExecutionStatus {
        self.status
    }

    fn transition(&mut self, to: ExecutionStatus) -> Result<(), ContextError> {
        use ExecutionStatus::*;
        let from = self.status;
        let legal = matches!(
            (from, to),
            (Pending, Running)
                | (Running, Paused)
                | (Paused, Running)
                | (Running, Completed)
                | (Running, Failed)
                | (Pending, Cancelled)
                | (Running, Cancelled)
                | (Paused, Cancelled)
        );
        if !legal {
            return Err(ContextError::InvalidTransition { from, to });
        }
        self.status = to;
        tracing::debug!(
            execution_id = %self.execution_id,
            %from,
            %to,
            "execution status changed"
        );
        self.events.status_changed(from, to);
        Ok(())
    }

    pub fn start(&mut self) -> Result<(), ContextError> {
        self.transition(ExecutionStatus::Running)?;
        self.timing.started_at = Some(Utc::now());
        self.log(LogLevel::Info, "execution started");
        Ok(())
    }

    pub fn pause(&mut self) -> Result<(), ContextError> {
        self.transition(ExecutionStatus::Paused)?;
        self.timing.paused_at = Some(Utc::now());
        self.log(LogLevel::Info, "execution paused");
        Ok(())
    }

    pub fn resume(&mut self) -> Result<(), ContextError> {
        self.transition(ExecutionStatus::Running)?;
        self.timing.resumed_at = Some(Utc::now());
        self.log(LogLevel::Info, "execution resumed");
        Ok(())
    }

    pub fn complete(&mut self) -> Result<(), ContextError> {
        self.transition(ExecutionStatus::Completed)?;
        self.timing.ended_at = Some(Utc::now());
        self.log(LogLevel::Info, "execution completed");
        Ok(())
    }

    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), ContextError> {
        self.transition(ExecutionStatus::Failed)?;
        self.timing.ended_at = Some(Utc::now());
        self.log(LogLevel::Error, format!("execution failed: {}", reason.into()));
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<(), ContextError> {
        self.transition(ExecutionStatus::Cancelled)?;
        self.timing.ended_at = Some(Utc::now());
        self.log(LogLevel::Warn, "execution cancelled");
        Ok(())
    }

    // Variable operations

    pub fn set_variable(&mut self, name: impl Into<String>, value: Value) {
        self.variables.insert(name.into(), value);
    }

    pub fn get_variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    pub fn get_variable_or(&self, name: &str, default: Value) -> Value {
        self.variables.get(name).cloned().unwrap_or(default)
    }

    pub fn has_variable(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }

    pub fn delete_variable(&mut self, name: &str) -> Option<Value> {
        self.variables.remove(name)
    }

    /// Snapshot copy, never a live reference.
    pub fn get_all_variables(&self) -> HashMap<String, Value> {
        self.variables.clone()
    }

    /// Resolve a dotted path whose root is a variable name.
    pub fn lookup_path(&self, path: &str) -> Option<&Value> {
        match path.split_once('.') {
            Some((root, rest)) => self.variables.get(root)?.get_path(rest),
            None => self.variables.get(path),
        }
    }

    /// Recursively replace `${name}` / `${name.path}` placeholders in
    /// strings, arrays and objects. Unresolvable placeholders are
    /// left untouched, so the operation is idempotent and never
    /// fails.
    pub fn substitute_variables(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => Value::String(self.substitute_string(s)),
            Value::Array(items) => {
                Value::Array(items.iter().map(|v| self.substitute_variables(v)).collect())
            }
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.substitute_variables(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    fn substitute_string(&self, input: &str) -> String {
        let mut out = String::with_capacity(input.len());
        let mut rest = input;
        while let Some(start) = rest.find("${") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            match after.find('}') {
                Some(end) => {
                    let path = &after[..end];
                    match self.lookup_path(path) {
                        Some(value) => out.push_str(&value.to_display_string()),
                        None => out.push_str(&rest[start..start + end + 3]),
                    }
                    rest = &after[end + 1..];
                }
                None => {
                    // Unterminated placeholder, keep literally.
                    out.push_str(&rest[start..]);
                    rest = "";
                }
            }
        }
        out.push_str(rest);
        out
    }

    // Results, evidence, logs, errors

    /// Merge a result's `outputs` object into variables. The executor
    /// runs this before applying step-level output bindings, so a
    /// declared binding wins when both name the same variable.
    pub fn merge_result_outputs(&mut self, result: &Value) {
        if let Some(outputs) = result.get_path("outputs").and_then(Value::as_object) {
            let merged: Vec<(String, Value)> = outputs
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            for (name, value) in merged {
                self.variables.insert(name, value);
            }
        }
    }

    /// Store a step result under its step id.
    pub fn record_step_result(&mut self, step_id: impl Into<String>, result: Value) {
        self.step_results.insert(
            step_id.into(),
            StepResultRecord {
                result,
                timestamp: Utc::now(),
            },
        );
    }

    pub fn step_result(&self, step_id: &str) -> Option<&StepResultRecord> {
        self.step_results.get(step_id)
    }

    pub fn step_results(&self) -> &HashMap<String, StepResultRecord> {
        &self.step_results
    }

    pub fn add_evidence(&mut self, label: impl Into<String>, data: Value) {
        let label = label.into();
        self.evidence.push(EvidenceItem {
            execution_id: self.execution_id,
            label: label.clone(),
            data,
            timestamp: Utc::now(),
        });
        self.events.evidence_added(label);
    }

    pub fn evidence(&self) -> &[EvidenceItem] {
        &self.evidence
    }

    pub fn log(&mut self, level: LogLevel, message: impl Into<String>) {
        if self.logs.len() == LOG_CAPACITY {
            self.logs.pop_front();
        }
        self.logs.push_back(LogEntry {
            level,
            message: message.into(),
            timestamp: Utc::now(),
        });
    }

    pub fn logs(&self) -> impl Iterator<Item = &LogEntry> {
        self.logs.iter()
    }

    pub fn record_failure(&mut self, failure: FailureRecord) {
        self.log(
            LogLevel::Error,
            format!("step {} failed: {}", failure.step_id, failure.message),
        );
        self.errors.push(failure);
    }

    pub fn errors(&self) -> &[FailureRecord] {
        &self.errors
    }

    pub fn get_progress(&self) -> u8 {
        if self.total_steps == 0 {
            return 0;
        }
        let completed = self.step_results.len().min(self.total_steps);
        ((100.0 * completed as f64 / self.total_steps as f64).round()) as u8
    }

    pub fn events(&self) -> &EventEmitter {
        &self.events
    }

    // Snapshots

    pub fn snapshot(&self) -> ExecutionSnapshot {
        ExecutionSnapshot {
            version: SNAPSHOT_VERSION,
            workflow_id: self.workflow_id.clone(),
            execution_id: self.execution_id,
            status: self.status,
            variables: self.variables.clone(),
            step_results: self.step_results.clone(),
            evidence: self.evidence.clone(),
            logs: self.logs.iter().cloned().collect(),
            errors: self.errors.clone(),
            timing: self.timing.clone(),
            current_step_index: self.current_step_index,
            total_steps: self.total_steps,
            saved_at: Utc::now(),
        }
    }

    /// Rebuild a context from a persisted snapshot. The emitter is
    /// detached until an orchestrator re-binds it.
    pub fn from_snapshot(snapshot: ExecutionSnapshot) -> Self {
        let mut logs: VecDeque<LogEntry> = snapshot.logs.into();
        while logs.len() > LOG_CAPACITY {
            logs.pop_front();
        }
        Self {
            workflow_id: snapshot.workflow_id,
            execution_id: snapshot.execution_id,
            status: snapshot.status,
            variables: snapshot.variables,
            step_results: snapshot.step_results,
            evidence: snapshot.evidence,
            logs,
            errors: snapshot.errors,
            timing: snapshot.timing,
            current_step_index: snapshot.current_step_index,
            total_steps: snapshot.total_steps,
            events: EventEmitter::detached(snapshot.execution_id),
        }
    }

    pub fn bind_events(&mut self, events: EventEmitter) {
        self.events = events;
    }

    pub fn into_shared(self) -> SharedContext {
        Arc::new(RwLock::new(self))
    }
}

/// Versioned persisted form of an ExecutionContext. Only the log
/// tail (at most [`LOG_CAPACITY`] entries) is carried.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSnapshot {
    pub version: u32,
    pub workflow_id: String,
    pub execution_id: ExecutionId,
    pub status: ExecutionStatus,
    pub variables: HashMap<String, Value>,
    pub step_results: HashMap<String, StepResultRecord>,
    pub evidence: Vec<EvidenceItem>,
    pub logs: Vec<LogEntry>,
    pub errors: Vec<FailureRecord>,
    pub timing: ExecutionTiming,
    pub current_step_index: usize,
    pub total_steps: usize,
    pub saved_at: DateTime<Utc>,
}
