use crate::{
    ErrorHandler, ExecutionStore, ExecutorConfig, RetryConfig, RetryLogEntry, StepExecutor,
    WorkflowManager,
};
use chrono::Utc;
use houndcore::{
    BackendIngest, EngineError, EventBus, ExecutionContext, ExecutionEvent, ExecutionId,
    ExecutionSnapshot, ExecutionStatus, PageAutomation, SharedContext, Value, Workflow,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub executor: ExecutorConfig,
    pub retry: RetryConfig,
    pub event_capacity: usize,
}

impl EngineConfig {
    fn event_capacity(&self) -> usize {
        if self.event_capacity == 0 {
            1024
        } else {
            self.event_capacity
        }
    }
}

/// User-visible outcome of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub execution_id: ExecutionId,
    pub workflow_id: String,
    pub status: ExecutionStatus,
    pub duration_ms: u64,
    pub completed_steps: usize,
    pub total_steps: usize,
    pub evidence_count: usize,
    pub error_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PauseState {
    Running,
    Paused,
}

/// Cooperative controls for an in-flight run. Pause and cancel are
/// honored at step boundaries only; a step already in flight is never
/// interrupted.
#[derive(Clone)]
pub struct ExecutionControl {
    pause_tx: watch::Sender<PauseState>,
    cancel: CancellationToken,
}

impl ExecutionControl {
    pub fn channel() -> (ExecutionControl, ControlSignal) {
        let (pause_tx, pause_rx) = watch::channel(PauseState::Running);
        let cancel = CancellationToken::new();
        (
            ExecutionControl {
                pause_tx,
                cancel: cancel.clone(),
            },
            ControlSignal { pause_rx, cancel },
        )
    }

    pub fn pause(&self) {
        let _ = self.pause_tx.send(PauseState::Paused);
    }

    pub fn resume(&self) {
        let _ = self.pause_tx.send(PauseState::Running);
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// Receiving half held by the driving loop.
pub struct ControlSignal {
    pause_rx: watch::Receiver<PauseState>,
    cancel: CancellationToken,
}

impl ControlSignal {
    fn pause_requested(&self) -> bool {
        *self.pause_rx.borrow() == PauseState::Paused
    }

    fn cancel_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// The driving loop: walks a workflow's ordered step list, delegates
/// each step to the executor, consults the error handler on failure
/// and advances or terminates the execution context.
pub struct Orchestrator {
    executor: StepExecutor,
    manager: Arc<WorkflowManager>,
    handler: Mutex<ErrorHandler>,
    store: Option<Arc<ExecutionStore>>,
    event_bus: Arc<EventBus>,
}

impl Orchestrator {
    pub fn new(automation: Arc<dyn PageAutomation>, config: EngineConfig) -> Self {
        Self {
            event_bus: Arc::new(EventBus::new(config.event_capacity())),
            executor: StepExecutor::new(automation, config.executor),
            handler: Mutex::new(ErrorHandler::new(config.retry)),
            manager: Arc::new(WorkflowManager::new()),
            store: None,
        }
    }

    pub fn with_ingest(mut self, ingest: Arc<dyn BackendIngest>) -> Self {
        self.executor = self.executor.with_ingest(ingest);
        self
    }

    pub fn with_store(mut self, store: Arc<ExecutionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn manager(&self) -> &Arc<WorkflowManager> {
        &self.manager
    }

    pub fn store(&self) -> Option<&Arc<ExecutionStore>> {
        self.store.as_ref()
    }

    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<ExecutionEvent> {
        self.event_bus.subscribe()
    }

    /// Per-step error/retry audit log, for inspection after runs.
    pub async fn retry_log(&self) -> Vec<RetryLogEntry> {
        self.handler.lock().await.retry_log().to_vec()
    }

    /// Run a registered workflow to completion without external
    /// control.
    pub async fn run_workflow(
        &self,
        workflow_id: &str,
        initial_variables: HashMap<String, Value>,
    ) -> Result<ExecutionSummary, EngineError> {
        let (_control, signal) = ExecutionControl::channel();
        self.run_workflow_with_control(workflow_id, initial_variables, signal)
            .await
    }

    /// Run a registered workflow under a pause/cancel control handle.
    pub async fn run_workflow_with_control(
        &self,
        workflow_id: &str,
        initial_variables: HashMap<String, Value>,
        signal: ControlSignal,
    ) -> Result<ExecutionSummary, EngineError> {
        let workflow = self.manager.get_workflow(workflow_id).await?;
        workflow.validate()?;

        let execution_id = Uuid::new_v4();
        let emitter = self.event_bus.create_emitter(execution_id);
        let mut context = ExecutionContext::new(&workflow.id, workflow.steps.len(), emitter);
        for (name, value) in initial_variables {
            context.set_variable(name, value);
        }
        context.start()?;

        tracing::info!(
            %execution_id,
            workflow_id = %workflow.id,
            steps = workflow.steps.len(),
            "starting workflow execution"
        );
        self.event_bus.emit(ExecutionEvent::ExecutionStarted {
            execution_id,
            workflow_id: workflow.id.clone(),
            timestamp: Utc::now(),
        });

        self.drive(&workflow, context.into_shared(), signal, 0).await
    }

    /// Reload an interrupted execution from the store and continue
    /// from its current step index.
    pub async fn resume_execution(
        &self,
        execution_id: ExecutionId,
    ) -> Result<ExecutionSummary, EngineError> {
        let (_control, signal) = ExecutionControl::channel();
        self.resume_execution_with_control(execution_id, signal).await
    }

    pub async fn resume_execution_with_control(
        &self,
        execution_id: ExecutionId,
        signal: ControlSignal,
    ) -> Result<ExecutionSummary, EngineError> {
        let store = self
            .store
            .as_ref()
            .ok_or_else(|| EngineError::Execution("no execution store configured".into()))?;
        let snapshot: ExecutionSnapshot = store.load(execution_id).await?;
        let workflow = self.manager.get_workflow(&snapshot.workflow_id).await?;

        let mut context = ExecutionContext::from_snapshot(snapshot);
        context.bind_events(self.event_bus.create_emitter(execution_id));
        match context.status() {
            // Interrupted mid-run; already in the running state.
            ExecutionStatus::Running => {}
            ExecutionStatus::Paused => context.resume()?,
            ExecutionStatus::Pending => context.start()?,
            terminal => {
                return Err(EngineError::Execution(format!(
                    "execution {execution_id} already {terminal}"
                )))
            }
        }
        let start_index = context.current_step_index;
        tracing::info!(%execution_id, start_index, "resuming workflow execution");

        self.drive(&workflow, context.into_shared(), signal, start_index)
            .await
    }

    async fn drive(
        &self,
        workflow: &Workflow,
        shared: SharedContext,
        mut signal: ControlSignal,
        start_index: usize,
    ) -> Result<ExecutionSummary, EngineError> {
        let total = workflow.steps.len();
        let mut index = start_index;

        while index < total {
            // Cooperative checkpoint between steps.
            if signal.cancel_requested() {
                return self.finish_cancelled(&shared).await;
            }
            if signal.pause_requested() {
                shared.write().await.pause()?;
                self.checkpoint(&shared).await;
                loop {
                    tokio::select! {
                        _ = signal.cancel.cancelled() => {
                            return self.finish_cancelled(&shared).await;
                        }
                        changed = signal.pause_rx.changed() => {
                            if changed.is_err() || !signal.pause_requested() {
                                break;
                            }
                        }
                    }
                }
                shared.write().await.resume()?;
            }

            let step = &workflow.steps[index];
            let execution_id = shared.read().await.execution_id;
            self.event_bus.emit(ExecutionEvent::StepStarted {
                execution_id,
                step_id: step.id.clone(),
                step_type: step.step_type,
                timestamp: Utc::now(),
            });

            // Retry loop: the same step is re-attempted until it
            // succeeds or the handler says stop.
            loop {
                let started = Instant::now();
                match self.executor.execute(step, &shared).await {
                    Ok(result) => {
                        {
                            let mut guard = shared.write().await;
                            guard.record_step_result(&step.id, result);
                            guard.current_step_index = index + 1;
                        }
                        self.handler
                            .lock()
                            .await
                            .reset_attempts(execution_id, &step.id);
                        self.event_bus.emit(ExecutionEvent::StepCompleted {
                            execution_id,
                            step_id: step.id.clone(),
                            duration_ms: started.elapsed().as_millis() as u64,
                            timestamp: Utc::now(),
                        });
                        self.checkpoint(&shared).await;
                        break;
                    }
                    Err(error) => {
                        self.event_bus.emit(ExecutionEvent::StepFailed {
                            execution_id,
                            step_id: step.id.clone(),
                            error: error.to_string(),
                            timestamp: Utc::now(),
                        });
                        let decision = {
                            let mut guard = shared.write().await;
                            let mut handler = self.handler.lock().await;
                            handler.handle_error(&error, &mut guard, step)
                        };
                        if decision.should_retry {
                            self.event_bus.emit(ExecutionEvent::RetryScheduled {
                                execution_id,
                                step_id: step.id.clone(),
                                attempt: decision.attempt + 1,
                                delay_ms: decision.delay.as_millis() as u64,
                                timestamp: Utc::now(),
                            });
                            tokio::time::sleep(decision.delay).await;
                            continue;
                        }
                        // Exhausted or non-retryable: terminate, no
                        // later step executes.
                        shared.write().await.fail(error.to_string())?;
                        self.checkpoint(&shared).await;
                        return self.finish(&shared).await;
                    }
                }
            }

            index += 1;
        }

        shared.write().await.complete()?;
        self.checkpoint(&shared).await;
        self.finish(&shared).await
    }

    async fn finish_cancelled(
        &self,
        shared: &SharedContext,
    ) -> Result<ExecutionSummary, EngineError> {
        shared.write().await.cancel()?;
        self.checkpoint(shared).await;
        self.finish(shared).await
    }

    async fn finish(&self, shared: &SharedContext) -> Result<ExecutionSummary, EngineError> {
        let summary = {
            let guard = shared.read().await;
            ExecutionSummary {
                execution_id: guard.execution_id,
                workflow_id: guard.workflow_id.clone(),
                status: guard.status(),
                duration_ms: guard.timing.duration_ms().unwrap_or(0),
                completed_steps: guard.step_results().len(),
                total_steps: guard.total_steps,
                evidence_count: guard.evidence().len(),
                error_count: guard.errors().len(),
            }
        };
        tracing::info!(
            execution_id = %summary.execution_id,
            status = %summary.status,
            duration_ms = summary.duration_ms,
            completed = summary.completed_steps,
            total = summary.total_steps,
            "workflow execution finished"
        );
        self.event_bus.emit(ExecutionEvent::ExecutionFinished {
            execution_id: summary.execution_id,
            status: summary.status,
            duration_ms: summary.duration_ms,
            timestamp: Utc::now(),
        });
        Ok(summary)
    }

    /// Snapshot checkpoints keep runs crash-resumable; a failed save
    /// is logged but never aborts the run.
    async fn checkpoint(&self, shared: &SharedContext) {
        if let Some(store) = &self.store {
            let snapshot = shared.read().await.snapshot();
            if let Err(error) = store.save(&snapshot).await {
                tracing::warn!(
                    execution_id = %snapshot.execution_id,
                    %error,
                    "failed to checkpoint execution snapshot"
                );
            }
        }
    }
}
