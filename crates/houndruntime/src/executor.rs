use futures::future::BoxFuture;
use futures::stream::{self, StreamExt, TryStreamExt};
use houndcore::{
    expr, ActionRequest, BackendIngest, IngestRequest, OutputBinding, PageAutomation,
    SharedContext, Step, StepError, StepType, Value,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::{timeout, Duration};

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Per-step wall-clock budget when the step declares none.
    pub default_timeout_ms: u64,
    /// Cap on `loop` iterations unless the step lowers it.
    pub max_loop_iterations: usize,
    /// Bound on in-flight branches of a `parallel` step.
    pub default_max_concurrent: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 30_000,
            max_loop_iterations: 100,
            default_max_concurrent: 3,
        }
    }
}

/// Executes one step against a shared context: substitutes variables
/// into parameters, races the handler against the step timeout,
/// dispatches by kind and binds declared outputs.
///
/// Retry decisions live in the orchestrator; failures propagate
/// upward untouched. During a `parallel` step concurrent branches
/// share the context and must bind disjoint output names.
pub struct StepExecutor {
    automation: Arc<dyn PageAutomation>,
    ingest: Option<Arc<dyn BackendIngest>>,
    config: ExecutorConfig,
}

impl StepExecutor {
    pub fn new(automation: Arc<dyn PageAutomation>, config: ExecutorConfig) -> Self {
        Self {
            automation,
            ingest: None,
            config,
        }
    }

    pub fn with_ingest(mut self, ingest: Arc<dyn BackendIngest>) -> Self {
        self.ingest = Some(ingest);
        self
    }

    /// Boxed so control-flow steps can recurse to arbitrary depth.
    pub fn execute<'a>(
        &'a self,
        step: &'a Step,
        ctx: &'a SharedContext,
    ) -> BoxFuture<'a, Result<Value, StepError>> {
        Box::pin(async move {
            if !step.enabled {
                tracing::debug!(step_id = %step.id, "step disabled, skipping");
                return Ok(Value::Object(HashMap::from([
                    ("skipped".to_string(), Value::Bool(true)),
                    ("success".to_string(), Value::Bool(true)),
                ])));
            }

            let params = {
                let guard = ctx.read().await;
                step.params
                    .iter()
                    .map(|(k, v)| (k.clone(), guard.substitute_variables(v)))
                    .collect::<HashMap<_, _>>()
            };

            let budget_ms = step.timeout_ms.unwrap_or(self.config.default_timeout_ms);
            let result = match timeout(
                Duration::from_millis(budget_ms),
                self.dispatch(step, params, ctx),
            )
            .await
            {
                Ok(result) => result?,
                Err(_) => return Err(StepError::Timeout { ms: budget_ms }),
            };

            if !step.outputs.is_empty() || result.get_path("outputs").is_some() {
                let mut guard = ctx.write().await;
                // Result-level outputs merge first; a declared
                // binding then wins any name collision.
                guard.merge_result_outputs(&result);
                for (variable, binding) in &step.outputs {
                    let bound = match binding {
                        OutputBinding::EntireResult => result.clone(),
                        OutputBinding::Field(key) => {
                            result.get_path(key).cloned().unwrap_or(Value::Null)
                        }
                    };
                    guard.set_variable(variable.clone(), bound);
                }
            }

            Ok(result)
        })
    }

    async fn dispatch(
        &self,
        step: &Step,
        params: HashMap<String, Value>,
        ctx: &SharedContext,
    ) -> Result<Value, StepError> {
        match step.step_type {
            StepType::Conditional => self.run_conditional(step, ctx).await,
            StepType::Loop => self.run_loop(step, ctx).await,
            StepType::Parallel => self.run_parallel(step, ctx).await,
            StepType::Script => self.run_script(params, ctx).await,
            StepType::Ingest => self.run_ingest(params).await,
            _ => self.run_action(step, params, ctx).await,
        }
    }

    /// Delegated action: wrap the parameters in the wire envelope and
    /// hand them to the page-automation surface.
    async fn run_action(
        &self,
        step: &Step,
        params: HashMap<String, Value>,
        ctx: &SharedContext,
    ) -> Result<Value, StepError> {
        let action = step.step_type.action_name();
        tracing::debug!(step_id = %step.id, action, "dispatching action");
        let response = self
            .automation
            .dispatch(ActionRequest::new(action, params))
            .await?;
        let fields = response.into_result()?;
        let result = Value::Object(fields);

        // Extracted content and screenshots are evidence.
        if matches!(step.step_type, StepType::Extract | StepType::Screenshot) {
            ctx.write().await.add_evidence(step.id.clone(), result.clone());
        }
        Ok(result)
    }

    async fn run_ingest(&self, params: HashMap<String, Value>) -> Result<Value, StepError> {
        let backend = self
            .ingest
            .as_ref()
            .ok_or_else(|| StepError::Configuration("no ingestion backend configured".into()))?;
        let entity_type = params
            .get("entity_type")
            .and_then(Value::as_str)
            .ok_or_else(|| StepError::Validation("ingest step needs 'entity_type'".into()))?
            .to_string();
        let data = params.get("data").cloned().unwrap_or(Value::Null);
        let case_id = params
            .get("case_id")
            .and_then(Value::as_str)
            .map(str::to_string);

        let response = backend
            .ingest(IngestRequest {
                entity_type,
                data,
                case_id,
            })
            .await?;
        if !response.success {
            return Err(StepError::Action(
                response.error.unwrap_or_else(|| "ingestion failed".into()),
            ));
        }
        let mut fields = HashMap::from([("success".to_string(), Value::Bool(true))]);
        if let Some(entity_id) = response.entity_id {
            fields.insert("entity_id".to_string(), Value::String(entity_id));
        }
        Ok(Value::Object(fields))
    }

    /// `script` evaluates a restricted expression against a snapshot
    /// of the variables; it cannot mutate engine state.
    async fn run_script(
        &self,
        params: HashMap<String, Value>,
        ctx: &SharedContext,
    ) -> Result<Value, StepError> {
        let expression = params
            .get("expression")
            .and_then(Value::as_str)
            .ok_or_else(|| StepError::Validation("script step needs 'expression'".into()))?;
        let snapshot = ctx.read().await.get_all_variables();
        let value = expr::evaluate(expression, &snapshot)?;
        Ok(Value::Object(HashMap::from([(
            "result".to_string(),
            value,
        )])))
    }

    async fn run_conditional(&self, step: &Step, ctx: &SharedContext) -> Result<Value, StepError> {
        let condition = step
            .params
            .get("condition")
            .and_then(Value::as_str)
            .ok_or_else(|| StepError::Validation("conditional step needs 'condition'".into()))?;
        let snapshot = ctx.read().await.get_all_variables();
        let fired = expr::evaluate_bool(condition, &snapshot)?;
        tracing::debug!(step_id = %step.id, condition, fired, "conditional evaluated");

        let (branch, sub_steps) = if fired {
            ("then", &step.then_steps)
        } else {
            ("else", &step.else_steps)
        };

        // An absent branch is a no-op, not an error.
        let mut results = Vec::with_capacity(sub_steps.len());
        for sub in sub_steps {
            let result = self.execute(sub, ctx).await?;
            results.push(sub_result(sub, result));
        }

        Ok(Value::Object(HashMap::from([
            ("branch".to_string(), Value::String(branch.to_string())),
            ("results".to_string(), Value::Array(results)),
        ])))
    }

    async fn run_loop(&self, step: &Step, ctx: &SharedContext) -> Result<Value, StepError> {
        let items = self.resolve_loop_items(step, ctx).await?;
        let var_name = step
            .params
            .get("as")
            .and_then(Value::as_str)
            .unwrap_or("item")
            .to_string();
        let cap = step
            .params
            .get("max_iterations")
            .and_then(Value::as_f64)
            .map(|n| n.max(0.0) as usize)
            .unwrap_or(self.config.max_loop_iterations);
        let count = items.len().min(cap);
        let index_name = format!("{var_name}_index");

        // Iterations are strictly sequential: iteration N+1 never
        // starts before N's sub-steps fully resolve.
        let mut iterations = Vec::with_capacity(count);
        for (index, item) in items.into_iter().take(count).enumerate() {
            {
                let mut guard = ctx.write().await;
                guard.set_variable(var_name.clone(), item);
                guard.set_variable(index_name.clone(), Value::Number(index as f64));
            }
            let mut results = Vec::with_capacity(step.steps.len());
            for sub in &step.steps {
                let result = self.execute(sub, ctx).await?;
                results.push(sub_result(sub, result));
            }
            iterations.push(Value::Object(HashMap::from([
                ("index".to_string(), Value::Number(index as f64)),
                ("results".to_string(), Value::Array(results)),
            ])));
        }

        Ok(Value::Object(HashMap::from([
            ("iterations".to_string(), Value::Number(count as f64)),
            ("results".to_string(), Value::Array(iterations)),
        ])))
    }

    /// `items` may be a literal array (substituted element-wise) or a
    /// reference to an array variable (`"${rows}"` or `"rows"`). The
    /// reference form stays typed instead of going through string
    /// substitution.
    async fn resolve_loop_items(
        &self,
        step: &Step,
        ctx: &SharedContext,
    ) -> Result<Vec<Value>, StepError> {
        let raw = step
            .params
            .get("items")
            .ok_or_else(|| StepError::Validation("loop step needs 'items'".into()))?;
        match raw {
            Value::Array(items) => {
                let guard = ctx.read().await;
                Ok(items.iter().map(|v| guard.substitute_variables(v)).collect())
            }
            Value::String(reference) => {
                let path = reference
                    .trim()
                    .strip_prefix("${")
                    .and_then(|p| p.strip_suffix('}'))
                    .unwrap_or(reference.trim());
                let guard = ctx.read().await;
                guard
                    .lookup_path(path)
                    .and_then(Value::as_array)
                    .map(<[Value]>::to_vec)
                    .ok_or_else(|| {
                        StepError::Validation(format!("loop items '{path}' is not an array"))
                    })
            }
            other => Err(StepError::Validation(format!(
                "loop items must be an array or variable reference, got {other:?}"
            ))),
        }
    }

    /// Bounded worker-pool over the branch list. `buffered` keeps at
    /// most `max_concurrent` branches in flight and yields results in
    /// original input order regardless of completion order.
    async fn run_parallel(&self, step: &Step, ctx: &SharedContext) -> Result<Value, StepError> {
        let max_concurrent = step
            .params
            .get("max_concurrent")
            .and_then(Value::as_f64)
            .map(|n| (n.max(1.0)) as usize)
            .unwrap_or(self.config.default_max_concurrent);

        let branches: Vec<BoxFuture<'_, Result<Value, StepError>>> = step
            .steps
            .iter()
            .map(|sub| {
                let fut = self.execute(sub, ctx);
                Box::pin(async move { Ok(sub_result(sub, fut.await?)) })
                    as BoxFuture<'_, Result<Value, StepError>>
            })
            .collect();

        let results: Vec<Value> = stream::iter(branches)
            .buffered(max_concurrent)
            .try_collect()
            .await?;

        Ok(Value::Object(HashMap::from([(
            "results".to_string(),
            Value::Array(results),
        )])))
    }
}

fn sub_result(step: &Step, result: Value) -> Value {
    Value::Object(HashMap::from([
        ("id".to_string(), Value::String(step.id.clone())),
        ("result".to_string(), result),
    ]))
}
