use crate::ExecutionStatus;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Step error: {0}")]
    Step(#[from] StepError),

    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("Context error: {0}")]
    Context(#[from] ContextError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Execution error: {0}")]
    Execution(String),
}

/// Failure raised by a single step attempt. Kinds mirror what the
/// page-automation surface reports plus engine-internal conditions.
#[derive(Error, Debug, Clone)]
pub enum StepError {
    #[error("Timeout after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Navigation failed: {0}")]
    Navigation(String),

    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Click intercepted: {0}")]
    ClickIntercepted(String),

    #[error("Detached element: {0}")]
    DetachedElement(String),

    #[error("Stale element: {0}")]
    StaleElement(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Security error: {0}")]
    Security(String),

    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Permission denied: {0}")]
    Permission(String),

    #[error("Script error: {0}")]
    Script(String),

    #[error("Action failed: {0}")]
    Action(String),

    #[error("Cancelled")]
    Cancelled,
}

impl StepError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StepError::Timeout { .. } => ErrorKind::Timeout,
            StepError::Network(_) => ErrorKind::Network,
            StepError::Navigation(_) => ErrorKind::Navigation,
            StepError::ElementNotFound(_) => ErrorKind::ElementNotFound,
            StepError::ClickIntercepted(_) => ErrorKind::ClickIntercepted,
            StepError::DetachedElement(_) => ErrorKind::DetachedElement,
            StepError::StaleElement(_) => ErrorKind::StaleElement,
            StepError::Validation(_) => ErrorKind::Validation,
            StepError::Configuration(_) => ErrorKind::Configuration,
            StepError::Security(_) => ErrorKind::Security,
            StepError::QuotaExceeded(_) => ErrorKind::QuotaExceeded,
            StepError::Permission(_) => ErrorKind::Permission,
            StepError::Script(_) => ErrorKind::Script,
            StepError::Action(_) => ErrorKind::Unknown,
            StepError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Build a StepError from a failed capability response. A known
    /// `code` selects the classified variant; anything else stays an
    /// unclassified action failure for the keyword heuristic.
    pub fn from_response(code: Option<&str>, message: String) -> StepError {
        match code {
            Some("timeout") => StepError::Timeout { ms: 0 },
            Some("network") => StepError::Network(message),
            Some("navigation") => StepError::Navigation(message),
            Some("element_not_found") => StepError::ElementNotFound(message),
            Some("click_intercepted") => StepError::ClickIntercepted(message),
            Some("detached_element") => StepError::DetachedElement(message),
            Some("stale_element") => StepError::StaleElement(message),
            Some("validation") => StepError::Validation(message),
            Some("configuration") => StepError::Configuration(message),
            Some("security") => StepError::Security(message),
            Some("quota_exceeded") => StepError::QuotaExceeded(message),
            Some("permission") => StepError::Permission(message),
            _ => StepError::Action(message),
        }
    }
}

/// Classification bucket used by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    Network,
    Navigation,
    ElementNotFound,
    ClickIntercepted,
    DetachedElement,
    StaleElement,
    Validation,
    Configuration,
    Security,
    QuotaExceeded,
    Permission,
    Script,
    Cancelled,
    Unknown,
}

impl ErrorKind {
    /// `Some(true)` for the retryable set, `Some(false)` for the
    /// fail-fast set, `None` when classification must fall back to
    /// the message heuristic.
    pub fn retryable(&self) -> Option<bool> {
        match self {
            ErrorKind::Timeout
            | ErrorKind::Network
            | ErrorKind::Navigation
            | ErrorKind::ElementNotFound
            | ErrorKind::ClickIntercepted
            | ErrorKind::DetachedElement
            | ErrorKind::StaleElement => Some(true),
            ErrorKind::Validation
            | ErrorKind::Configuration
            | ErrorKind::Security
            | ErrorKind::QuotaExceeded
            | ErrorKind::Permission => Some(false),
            ErrorKind::Script | ErrorKind::Cancelled | ErrorKind::Unknown => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("Workflow not found: {0}")]
    NotFound(String),

    #[error("Invalid workflow: {0}")]
    Invalid(String),

    #[error("Duplicate step id: {0}")]
    DuplicateStepId(String),
}

#[derive(Error, Debug)]
pub enum ContextError {
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition {
        from: ExecutionStatus,
        to: ExecutionStatus,
    },
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Execution not found: {0}")]
    NotFound(String),

    #[error("Invalid execution id: {0}")]
    InvalidId(String),

    #[error("Snapshot version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
}
