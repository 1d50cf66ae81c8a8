//! Workflow execution runtime
//!
//! This crate provides the engine that runs workflow definitions:
//! the step executor, the retry/error handler, the orchestrating
//! driver loop with pause/resume/cancel controls, the workflow
//! registry and snapshot persistence.

mod executor;
mod manager;
mod orchestrator;
mod retry;
mod store;

pub use executor::{ExecutorConfig, StepExecutor};
pub use manager::WorkflowManager;
pub use orchestrator::{
    ControlSignal, EngineConfig, ExecutionControl, ExecutionSummary, Orchestrator,
};
pub use retry::{BackoffStrategy, ErrorHandler, RetryConfig, RetryDecision, RetryLogEntry};
pub use store::{ExecutionListing, ExecutionStore};
