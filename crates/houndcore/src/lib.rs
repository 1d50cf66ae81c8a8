//! Core abstractions for the automation workflow engine
//!
//! This crate provides the fundamental types every other component
//! depends on: the dynamic value type, workflow/step definitions, the
//! execution context and its persisted snapshot form, the error
//! taxonomy, the event bus, the capability seams to the
//! page-automation and ingestion surfaces, and the restricted
//! expression language.

mod capability;
mod context;
mod error;
mod events;
pub mod expr;
mod step;
mod value;

pub use capability::{
    ActionRequest, ActionResponse, BackendIngest, IngestRequest, IngestResponse, PageAutomation,
};
pub use context::{
    EvidenceItem, ExecutionContext, ExecutionSnapshot, ExecutionStatus, ExecutionTiming,
    FailureRecord, LogEntry, LogLevel, SharedContext, StepResultRecord, LOG_CAPACITY,
    SNAPSHOT_VERSION,
};
pub use error::{ContextError, EngineError, ErrorKind, StepError, StoreError, WorkflowError};
pub use events::{EventBus, EventEmitter, ExecutionEvent, ExecutionId};
pub use step::{OutputBinding, Step, StepType, Workflow};
pub use value::Value;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
