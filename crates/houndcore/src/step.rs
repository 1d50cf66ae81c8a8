use crate::{Value, WorkflowError};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// The thirteen step kinds. The first ten are delegated to an
/// external capability; `conditional`, `loop` and `parallel` are
/// interpreted by the engine itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepType {
    Navigate,
    Click,
    Fill,
    Extract,
    Detect,
    Wait,
    Screenshot,
    Verify,
    Ingest,
    Script,
    Conditional,
    Loop,
    Parallel,
}

impl StepType {
    pub fn is_control_flow(&self) -> bool {
        matches!(self, StepType::Conditional | StepType::Loop | StepType::Parallel)
    }

    /// Wire name used in the page-automation envelope.
    pub fn action_name(&self) -> &'static str {
        match self {
            StepType::Navigate => "navigate",
            StepType::Click => "click",
            StepType::Fill => "fill",
            StepType::Extract => "extract",
            StepType::Detect => "detect",
            StepType::Wait => "wait",
            StepType::Screenshot => "screenshot",
            StepType::Verify => "verify",
            StepType::Ingest => "ingest",
            StepType::Script => "script",
            StepType::Conditional => "conditional",
            StepType::Loop => "loop",
            StepType::Parallel => "parallel",
        }
    }
}

impl std::fmt::Display for StepType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.action_name())
    }
}

/// Where a declared output variable is bound from: a named field of
/// the step result, or the entire result (`"$"` in workflow JSON).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum OutputBinding {
    EntireResult,
    Field(String),
}

impl From<String> for OutputBinding {
    fn from(s: String) -> Self {
        if s == "$" {
            OutputBinding::EntireResult
        } else {
            OutputBinding::Field(s)
        }
    }
}

impl From<OutputBinding> for String {
    fn from(binding: OutputBinding) -> String {
        match binding {
            OutputBinding::EntireResult => "$".to_string(),
            OutputBinding::Field(name) => name,
        }
    }
}

/// One unit of workflow behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: String,

    #[serde(rename = "type")]
    pub step_type: StepType,

    #[serde(default)]
    pub params: HashMap<String, Value>,

    /// Mapping from variable name to result field (or `"$"` for the
    /// whole result), applied after the step succeeds.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub outputs: HashMap<String, OutputBinding>,

    /// Step-level override of the global max-retry count; `Some(0)`
    /// disables retry for this step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,

    /// Step-level timeout override in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Sub-steps executed when a `conditional` evaluates true.
    #[serde(default, rename = "then", skip_serializing_if = "Vec::is_empty")]
    pub then_steps: Vec<Step>,

    /// Sub-steps executed when a `conditional` evaluates false.
    #[serde(default, rename = "else", skip_serializing_if = "Vec::is_empty")]
    pub else_steps: Vec<Step>,

    /// Body of a `loop` or the branches of a `parallel` step.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<Step>,
}

fn default_enabled() -> bool {
    true
}

impl Step {
    pub fn new(id: impl Into<String>, step_type: StepType) -> Self {
        Self {
            id: id.into(),
            step_type,
            params: HashMap::new(),
            outputs: HashMap::new(),
            retries: None,
            timeout_ms: None,
            enabled: true,
            then_steps: Vec::new(),
            else_steps: Vec::new(),
            steps: Vec::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_output(mut self, variable: impl Into<String>, binding: OutputBinding) -> Self {
        self.outputs.insert(variable.into(), binding);
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn with_steps(mut self, steps: Vec<Step>) -> Self {
        self.steps = steps;
        self
    }

    pub fn with_branches(mut self, then_steps: Vec<Step>, else_steps: Vec<Step>) -> Self {
        self.then_steps = then_steps;
        self.else_steps = else_steps;
        self
    }

    fn collect_ids<'a>(&'a self, seen: &mut HashSet<&'a str>) -> Result<(), WorkflowError> {
        if self.id.is_empty() {
            return Err(WorkflowError::Invalid("step with empty id".to_string()));
        }
        if !seen.insert(self.id.as_str()) {
            return Err(WorkflowError::DuplicateStepId(self.id.clone()));
        }
        for sub in self
            .then_steps
            .iter()
            .chain(self.else_steps.iter())
            .chain(self.steps.iter())
        {
            sub.collect_ids(seen)?;
        }
        Ok(())
    }
}

/// Complete workflow definition: an ordered step list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub steps: Vec<Step>,
}

impl Workflow {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            steps: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn add_step(&mut self, step: Step) -> &mut Self {
        self.steps.push(step);
        self
    }

    /// Step ids must be unique across the whole tree, including
    /// nested control-flow sub-steps.
    pub fn validate(&self) -> Result<(), WorkflowError> {
        if self.id.is_empty() {
            return Err(WorkflowError::Invalid("workflow with empty id".to_string()));
        }
        let mut seen = HashSet::new();
        for step in &self.steps {
            step.collect_ids(&mut seen)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_workflow_json() {
        let json = r#"{
            "id": "scrape-article",
            "name": "Scrape article",
            "steps": [
                {"id": "nav", "type": "navigate", "params": {"url": "https://example.com"}},
                {"id": "grab", "type": "extract",
                 "params": {"selector": "article"},
                 "outputs": {"body": "content", "raw": "$"},
                 "retries": 2, "timeout_ms": 5000},
                {"id": "maybe", "type": "conditional",
                 "params": {"condition": "len(body) > 0"},
                 "then": [{"id": "shot", "type": "screenshot", "params": {}}]}
            ]
        }"#;
        let wf: Workflow = serde_json::from_str(json).unwrap();
        wf.validate().unwrap();

        assert_eq!(wf.steps.len(), 3);
        assert_eq!(wf.steps[0].step_type, StepType::Navigate);
        assert!(wf.steps[0].enabled);
        assert_eq!(wf.steps[1].retries, Some(2));
        assert_eq!(wf.steps[1].timeout_ms, Some(5000));
        assert_eq!(
            wf.steps[1].outputs.get("body"),
            Some(&OutputBinding::Field("content".to_string()))
        );
        assert_eq!(wf.steps[1].outputs.get("raw"), Some(&OutputBinding::EntireResult));
        assert_eq!(wf.steps[2].then_steps.len(), 1);
        assert!(wf.steps[2].step_type.is_control_flow());
    }

    #[test]
    fn duplicate_ids_rejected_across_nesting() {
        let mut wf = Workflow::new("w", "w");
        wf.add_step(Step::new("a", StepType::Navigate));
        wf.add_step(
            Step::new("group", StepType::Loop)
                .with_steps(vec![Step::new("a", StepType::Click)]),
        );
        assert!(matches!(
            wf.validate(),
            Err(WorkflowError::DuplicateStepId(id)) if id == "a"
        ));
    }

    #[test]
    fn output_binding_round_trips() {
        let step = Step::new("s", StepType::Extract)
            .with_output("whole", OutputBinding::EntireResult)
            .with_output("part", OutputBinding::Field("title".to_string()));
        let json = serde_json::to_string(&step).unwrap();
        let back: Step = serde_json::from_str(&json).unwrap();
        assert_eq!(back.outputs.get("whole"), Some(&OutputBinding::EntireResult));
        assert_eq!(
            back.outputs.get("part"),
            Some(&OutputBinding::Field("title".to_string()))
        );
    }
}
