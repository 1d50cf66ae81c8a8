use async_trait::async_trait;
use houndactions::{MemoryIngest, SimulatedPage};
use houndcore::{
    ActionRequest, ActionResponse, EventEmitter, ExecutionContext, ExecutionStatus, OutputBinding,
    PageAutomation, Step, StepError, StepType, StoreError, Value, Workflow,
};
use houndruntime::{
    EngineConfig, ExecutionControl, ExecutionStore, ExecutorConfig, Orchestrator, RetryConfig,
    StepExecutor,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Test double with programmable failures and an in-flight gauge.
/// Each step tags itself via a `tag` param; failures are scheduled
/// per tag as (remaining count, error code).
struct ScriptedAutomation {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    calls: Mutex<Vec<String>>,
    failures: Mutex<HashMap<String, (usize, String)>>,
    delay_ms: u64,
}

impl ScriptedAutomation {
    fn new() -> Self {
        Self {
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
            delay_ms: 0,
        }
    }

    fn with_delay(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    fn fail_times(&self, tag: &str, times: usize, code: &str) {
        self.failures
            .lock()
            .unwrap()
            .insert(tag.to_string(), (times, code.to_string()));
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn max_observed(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PageAutomation for ScriptedAutomation {
    async fn dispatch(&self, request: ActionRequest) -> Result<ActionResponse, StepError> {
        let tag = request.param_str("tag").unwrap_or("").to_string();
        self.calls.lock().unwrap().push(tag.clone());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if self.delay_ms > 0 {
            tokio::time::sleep(tokio::time::Duration::from_millis(self.delay_ms)).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let planned = {
            let mut failures = self.failures.lock().unwrap();
            match failures.get_mut(&tag) {
                Some((remaining, code)) if *remaining > 0 => {
                    *remaining -= 1;
                    Some(code.clone())
                }
                _ => None,
            }
        };
        match planned {
            Some(code) => Ok(ActionResponse::failure(format!("scripted {code}"), Some(&code))),
            None => Ok(ActionResponse::ok(HashMap::from([(
                "tag".to_string(),
                Value::String(tag),
            )]))),
        }
    }
}

/// Answers every action with the same canned field map.
struct CannedAutomation {
    fields: HashMap<String, Value>,
}

#[async_trait]
impl PageAutomation for CannedAutomation {
    async fn dispatch(&self, _request: ActionRequest) -> Result<ActionResponse, StepError> {
        Ok(ActionResponse::ok(self.fields.clone()))
    }
}

fn fast_retry() -> RetryConfig {
    RetryConfig {
        base_delay_ms: 1,
        max_delay_ms: 5,
        ..RetryConfig::default()
    }
}

fn tagged(id: &str, step_type: StepType) -> Step {
    Step::new(id, step_type).with_param("tag", Value::String(id.to_string()))
}

#[tokio::test]
async fn happy_path_completes_with_evidence() {
    let page = Arc::new(SimulatedPage::new());
    page.stub_extraction("h1", Value::String("Front page".into()))
        .await;
    let orchestrator = Orchestrator::new(page, EngineConfig::default());

    let workflow = Workflow::new("wf-happy", "happy")
        .with_step(
            Step::new("open", StepType::Navigate)
                .with_param("url", Value::String("https://example.test".into())),
        )
        .with_step(
            Step::new("headline", StepType::Extract)
                .with_param("selector", Value::String("h1".into()))
                .with_output("headline", OutputBinding::Field("data".into())),
        )
        .with_step(Step::new("shot", StepType::Screenshot));
    orchestrator.manager().register(workflow).await.unwrap();

    let summary = orchestrator
        .run_workflow("wf-happy", HashMap::new())
        .await
        .unwrap();

    assert_eq!(summary.status, ExecutionStatus::Completed);
    assert_eq!(summary.completed_steps, 3);
    assert_eq!(summary.total_steps, 3);
    // Extract and screenshot both leave evidence.
    assert_eq!(summary.evidence_count, 2);
    assert_eq!(summary.error_count, 0);
}

#[tokio::test]
async fn variables_flow_between_steps() {
    let page = Arc::new(SimulatedPage::new());
    page.stub_extraction(".name", Value::String("Ada Lovelace".into()))
        .await;
    let ingest = Arc::new(MemoryIngest::new());
    let orchestrator = Orchestrator::new(page.clone(), EngineConfig::default())
        .with_ingest(ingest.clone());

    let workflow = Workflow::new("wf-vars", "vars")
        .with_step(
            Step::new("open", StepType::Navigate)
                .with_param("url", Value::String("${base}/people".into())),
        )
        .with_step(
            Step::new("grab", StepType::Extract)
                .with_param("selector", Value::String(".name".into()))
                .with_output("person", OutputBinding::Field("data".into())),
        )
        .with_step(
            Step::new("save", StepType::Ingest)
                .with_param("entity_type", Value::String("person".into()))
                .with_param("data", Value::String("${person}".into())),
        );
    orchestrator.manager().register(workflow).await.unwrap();

    let initial = HashMap::from([(
        "base".to_string(),
        Value::String("https://example.test".into()),
    )]);
    let summary = orchestrator.run_workflow("wf-vars", initial).await.unwrap();

    assert_eq!(summary.status, ExecutionStatus::Completed);
    assert_eq!(
        page.current_url().await.as_deref(),
        Some("https://example.test/people")
    );
    let received = ingest.received().await;
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].data, Value::String("Ada Lovelace".into()));
}

#[tokio::test]
async fn retryable_failure_exhausts_budget() {
    let automation = Arc::new(ScriptedAutomation::new());
    // More failures than the budget of 1 initial + 3 retries.
    automation.fail_times("flaky", 10, "network");
    let orchestrator = Orchestrator::new(
        automation.clone(),
        EngineConfig {
            retry: fast_retry(),
            ..EngineConfig::default()
        },
    );

    let workflow = Workflow::new("wf-flaky", "flaky")
        .with_step(tagged("flaky", StepType::Click))
        .with_step(tagged("never", StepType::Click));
    orchestrator.manager().register(workflow).await.unwrap();

    let summary = orchestrator
        .run_workflow("wf-flaky", HashMap::new())
        .await
        .unwrap();

    assert_eq!(summary.status, ExecutionStatus::Failed);
    assert_eq!(summary.completed_steps, 0);
    assert_eq!(summary.error_count, 1);
    // 1 initial attempt + 3 retries, and the next step never ran.
    assert_eq!(automation.calls().len(), 4);
    assert_eq!(orchestrator.retry_log().await.len(), 4);
}

#[tokio::test]
async fn transient_failure_recovers() {
    let automation = Arc::new(ScriptedAutomation::new());
    automation.fail_times("flaky", 2, "timeout");
    let orchestrator = Orchestrator::new(
        automation.clone(),
        EngineConfig {
            retry: fast_retry(),
            ..EngineConfig::default()
        },
    );

    let workflow =
        Workflow::new("wf-recover", "recover").with_step(tagged("flaky", StepType::Click));
    orchestrator.manager().register(workflow).await.unwrap();

    let summary = orchestrator
        .run_workflow("wf-recover", HashMap::new())
        .await
        .unwrap();

    assert_eq!(summary.status, ExecutionStatus::Completed);
    assert_eq!(automation.calls().len(), 3);
    assert_eq!(summary.error_count, 0);
}

#[tokio::test]
async fn non_retryable_fails_fast() {
    let automation = Arc::new(ScriptedAutomation::new());
    automation.fail_times("bad", 10, "validation");
    let orchestrator = Orchestrator::new(
        automation.clone(),
        EngineConfig {
            retry: fast_retry(),
            ..EngineConfig::default()
        },
    );

    let workflow = Workflow::new("wf-bad", "bad").with_step(tagged("bad", StepType::Fill));
    orchestrator.manager().register(workflow).await.unwrap();

    let summary = orchestrator
        .run_workflow("wf-bad", HashMap::new())
        .await
        .unwrap();

    assert_eq!(summary.status, ExecutionStatus::Failed);
    assert_eq!(automation.calls().len(), 1);
    assert_eq!(orchestrator.retry_log().await.len(), 1);
    assert!(!orchestrator.retry_log().await[0].retried);
}

#[tokio::test]
async fn conditional_takes_only_one_branch() {
    let page = Arc::new(SimulatedPage::new());
    let orchestrator = Orchestrator::new(page.clone(), EngineConfig::default());

    let workflow = Workflow::new("wf-cond", "cond").with_step(
        Step::new("branch", StepType::Conditional)
            .with_param("condition", Value::String("x > 5".into()))
            .with_branches(
                vec![Step::new("then-fill", StepType::Fill)
                    .with_param("selector", Value::String("#then".into()))
                    .with_param("value", Value::String("yes".into()))],
                vec![Step::new("else-fill", StepType::Fill)
                    .with_param("selector", Value::String("#else".into()))
                    .with_param("value", Value::String("no".into()))],
            ),
    );
    orchestrator.manager().register(workflow).await.unwrap();

    let initial = HashMap::from([("x".to_string(), Value::Number(10.0))]);
    let summary = orchestrator.run_workflow("wf-cond", initial).await.unwrap();

    assert_eq!(summary.status, ExecutionStatus::Completed);
    assert_eq!(page.filled("#then").await.as_deref(), Some("yes"));
    assert_eq!(page.filled("#else").await, None);
}

#[tokio::test]
async fn loop_binds_item_and_index() {
    let page = Arc::new(SimulatedPage::new());
    let orchestrator = Orchestrator::new(page.clone(), EngineConfig::default());

    let workflow = Workflow::new("wf-loop", "loop").with_step(
        Step::new("each", StepType::Loop)
            .with_param(
                "items",
                Value::Array(vec![
                    Value::String("alpha".into()),
                    Value::String("beta".into()),
                    Value::String("gamma".into()),
                ]),
            )
            .with_param("as", Value::String("word".into()))
            .with_steps(vec![Step::new("write", StepType::Fill)
                .with_param("selector", Value::String("#f${word_index}".into()))
                .with_param("value", Value::String("${word}".into()))]),
    );
    orchestrator.manager().register(workflow).await.unwrap();

    let summary = orchestrator
        .run_workflow("wf-loop", HashMap::new())
        .await
        .unwrap();

    assert_eq!(summary.status, ExecutionStatus::Completed);
    assert_eq!(page.filled("#f0").await.as_deref(), Some("alpha"));
    assert_eq!(page.filled("#f1").await.as_deref(), Some("beta"));
    assert_eq!(page.filled("#f2").await.as_deref(), Some("gamma"));
}

#[tokio::test]
async fn loop_iteration_cap_applies() {
    let automation = Arc::new(ScriptedAutomation::new());
    let orchestrator = Orchestrator::new(automation.clone(), EngineConfig::default());

    let items: Vec<Value> = (0..10).map(|n| Value::Number(n as f64)).collect();
    let workflow = Workflow::new("wf-cap", "cap").with_step(
        Step::new("each", StepType::Loop)
            .with_param("items", Value::Array(items))
            .with_param("max_iterations", Value::Number(4.0))
            .with_steps(vec![tagged("body", StepType::Click)]),
    );
    orchestrator.manager().register(workflow).await.unwrap();

    let summary = orchestrator
        .run_workflow("wf-cap", HashMap::new())
        .await
        .unwrap();

    assert_eq!(summary.status, ExecutionStatus::Completed);
    assert_eq!(automation.calls().len(), 4);
}

#[tokio::test]
async fn parallel_bounds_concurrency_and_keeps_order() {
    let automation = Arc::new(ScriptedAutomation::new().with_delay(15));
    let executor = StepExecutor::new(automation.clone(), ExecutorConfig::default());
    let ctx = ExecutionContext::new("wf", 1, EventEmitter::detached(Uuid::new_v4())).into_shared();

    let branches: Vec<Step> = (0..5)
        .map(|n| tagged(&format!("p{n}"), StepType::Click))
        .collect();
    let step = Step::new("fanout", StepType::Parallel)
        .with_param("max_concurrent", Value::Number(2.0))
        .with_steps(branches);

    let result = executor.execute(&step, &ctx).await.unwrap();

    assert!(automation.max_observed() <= 2);
    let results = result
        .get_path("results")
        .and_then(Value::as_array)
        .unwrap()
        .to_vec();
    assert_eq!(results.len(), 5);
    for (n, entry) in results.iter().enumerate() {
        assert_eq!(
            entry.get_path("id").and_then(Value::as_str),
            Some(format!("p{n}").as_str())
        );
    }
}

#[tokio::test]
async fn timeout_is_classified_and_retried() {
    let automation = Arc::new(ScriptedAutomation::new().with_delay(50));
    let orchestrator = Orchestrator::new(
        automation.clone(),
        EngineConfig {
            retry: RetryConfig {
                max_retries: 1,
                base_delay_ms: 1,
                max_delay_ms: 5,
                ..RetryConfig::default()
            },
            ..EngineConfig::default()
        },
    );

    let workflow = Workflow::new("wf-slow", "slow")
        .with_step(tagged("slow", StepType::Click).with_timeout_ms(10));
    orchestrator.manager().register(workflow).await.unwrap();

    let summary = orchestrator
        .run_workflow("wf-slow", HashMap::new())
        .await
        .unwrap();

    assert_eq!(summary.status, ExecutionStatus::Failed);
    // Initial attempt + one retry, both timed out.
    assert_eq!(automation.calls().len(), 2);
}

#[tokio::test]
async fn disabled_step_is_skipped() {
    let automation = Arc::new(ScriptedAutomation::new());
    let orchestrator = Orchestrator::new(automation.clone(), EngineConfig::default());

    let workflow = Workflow::new("wf-skip", "skip")
        .with_step(tagged("off", StepType::Click).disabled())
        .with_step(tagged("on", StepType::Click));
    orchestrator.manager().register(workflow).await.unwrap();

    let summary = orchestrator
        .run_workflow("wf-skip", HashMap::new())
        .await
        .unwrap();

    assert_eq!(summary.status, ExecutionStatus::Completed);
    assert_eq!(summary.completed_steps, 2);
    assert_eq!(automation.calls(), vec!["on".to_string()]);
}

#[tokio::test]
async fn script_step_computes_from_variables() {
    let page = Arc::new(SimulatedPage::new());
    let orchestrator = Orchestrator::new(page.clone(), EngineConfig::default());

    let workflow = Workflow::new("wf-script", "script")
        .with_step(
            Step::new("calc", StepType::Script)
                .with_param("expression", Value::String("len(names) * 10".into()))
                .with_output("total", OutputBinding::Field("result".into())),
        )
        .with_step(
            Step::new("write", StepType::Fill)
                .with_param("selector", Value::String("#total".into()))
                .with_param("value", Value::String("${total}".into())),
        );
    orchestrator.manager().register(workflow).await.unwrap();

    let initial = HashMap::from([(
        "names".to_string(),
        Value::Array(vec![Value::String("a".into()), Value::String("b".into())]),
    )]);
    let summary = orchestrator
        .run_workflow("wf-script", initial)
        .await
        .unwrap();

    assert_eq!(summary.status, ExecutionStatus::Completed);
    assert_eq!(page.filled("#total").await.as_deref(), Some("20"));
}

#[tokio::test]
async fn pause_gates_execution_and_resume_continues() {
    let automation = Arc::new(ScriptedAutomation::new());
    let orchestrator = Arc::new(Orchestrator::new(automation.clone(), EngineConfig::default()));

    let workflow = Workflow::new("wf-pause", "pause")
        .with_step(tagged("one", StepType::Click))
        .with_step(tagged("two", StepType::Click));
    orchestrator.manager().register(workflow).await.unwrap();

    let (control, signal) = ExecutionControl::channel();
    // Paused before the run starts: no step may execute until resume.
    control.pause();

    let task = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            orchestrator
                .run_workflow_with_control("wf-pause", HashMap::new(), signal)
                .await
        })
    };

    tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
    assert!(automation.calls().is_empty());

    control.resume();
    let summary = task.await.unwrap().unwrap();
    assert_eq!(summary.status, ExecutionStatus::Completed);
    assert_eq!(automation.calls().len(), 2);
}

#[tokio::test]
async fn cancel_terminates_without_running_steps() {
    let automation = Arc::new(ScriptedAutomation::new());
    let orchestrator = Orchestrator::new(automation.clone(), EngineConfig::default());

    let workflow = Workflow::new("wf-cancel", "cancel").with_step(tagged("one", StepType::Click));
    orchestrator.manager().register(workflow).await.unwrap();

    let (control, signal) = ExecutionControl::channel();
    control.cancel();

    let summary = orchestrator
        .run_workflow_with_control("wf-cancel", HashMap::new(), signal)
        .await
        .unwrap();

    assert_eq!(summary.status, ExecutionStatus::Cancelled);
    assert!(automation.calls().is_empty());
}

#[tokio::test]
async fn cancel_while_paused_terminates() {
    let automation = Arc::new(ScriptedAutomation::new());
    let orchestrator = Arc::new(Orchestrator::new(automation.clone(), EngineConfig::default()));

    let workflow = Workflow::new("wf-pc", "pc").with_step(tagged("one", StepType::Click));
    orchestrator.manager().register(workflow).await.unwrap();

    let (control, signal) = ExecutionControl::channel();
    control.pause();
    let task = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            orchestrator
                .run_workflow_with_control("wf-pc", HashMap::new(), signal)
                .await
        })
    };
    tokio::time::sleep(tokio::time::Duration::from_millis(20)).await;
    control.cancel();

    let summary = task.await.unwrap().unwrap();
    assert_eq!(summary.status, ExecutionStatus::Cancelled);
    assert!(automation.calls().is_empty());
}

#[tokio::test]
async fn wait_step_consumes_real_time() {
    let page = Arc::new(SimulatedPage::new());
    let orchestrator = Orchestrator::new(page, EngineConfig::default());

    let workflow = Workflow::new("wf-wait", "wait").with_step(
        Step::new("hold", StepType::Wait)
            .with_param("for", Value::String("time".into()))
            .with_param("time", Value::Number(30.0)),
    );
    orchestrator.manager().register(workflow).await.unwrap();

    let started = std::time::Instant::now();
    let summary = orchestrator
        .run_workflow("wf-wait", HashMap::new())
        .await
        .unwrap();

    assert_eq!(summary.status, ExecutionStatus::Completed);
    assert!(started.elapsed() >= std::time::Duration::from_millis(30));
}

#[tokio::test]
async fn checkpoints_land_in_store() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(ExecutionStore::open(dir.path()).await.unwrap());
    let page = Arc::new(SimulatedPage::new());
    let orchestrator = Orchestrator::new(page, EngineConfig::default()).with_store(store.clone());

    let workflow = Workflow::new("wf-store", "store").with_step(
        Step::new("open", StepType::Navigate)
            .with_param("url", Value::String("https://example.test".into())),
    );
    orchestrator.manager().register(workflow).await.unwrap();

    let summary = orchestrator
        .run_workflow("wf-store", HashMap::new())
        .await
        .unwrap();

    let listings = store.list().await.unwrap();
    assert_eq!(listings.len(), 1);
    assert_eq!(listings[0].execution_id, summary.execution_id);
    assert_eq!(listings[0].status, ExecutionStatus::Completed);

    let snapshot = store.load(summary.execution_id).await.unwrap();
    assert_eq!(snapshot.workflow_id, "wf-store");
    assert_eq!(snapshot.current_step_index, 1);
}

#[tokio::test]
async fn resume_skips_already_completed_steps() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(ExecutionStore::open(dir.path()).await.unwrap());
    let automation = Arc::new(ScriptedAutomation::new());
    let orchestrator =
        Orchestrator::new(automation.clone(), EngineConfig::default()).with_store(store.clone());

    let workflow = Workflow::new("wf-resume", "resume")
        .with_step(tagged("one", StepType::Click))
        .with_step(tagged("two", StepType::Click));
    orchestrator.manager().register(workflow).await.unwrap();

    // Fabricate an interrupted run that already finished step one.
    let mut context =
        ExecutionContext::new("wf-resume", 2, EventEmitter::detached(Uuid::new_v4()));
    context.start().unwrap();
    context.record_step_result("one", Value::Bool(true));
    context.current_step_index = 1;
    let execution_id = context.execution_id;
    store.save(&context.snapshot()).await.unwrap();

    let summary = orchestrator.resume_execution(execution_id).await.unwrap();

    assert_eq!(summary.status, ExecutionStatus::Completed);
    assert_eq!(summary.execution_id, execution_id);
    // Only step two actually ran.
    assert_eq!(automation.calls(), vec!["two".to_string()]);
    assert_eq!(summary.completed_steps, 2);
}

#[tokio::test]
async fn resume_of_finished_execution_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(ExecutionStore::open(dir.path()).await.unwrap());
    let orchestrator = Orchestrator::new(Arc::new(SimulatedPage::new()), EngineConfig::default())
        .with_store(store.clone());

    let workflow = Workflow::new("wf-done", "done");
    orchestrator.manager().register(workflow).await.unwrap();

    let mut context = ExecutionContext::new("wf-done", 0, EventEmitter::detached(Uuid::new_v4()));
    context.start().unwrap();
    context.complete().unwrap();
    let execution_id = context.execution_id;
    store.save(&context.snapshot()).await.unwrap();

    assert!(orchestrator.resume_execution(execution_id).await.is_err());
}

#[tokio::test]
async fn store_delete_and_cleanup() {
    let dir = tempfile::tempdir().unwrap();
    let store = ExecutionStore::open(dir.path()).await.unwrap();

    let mut old = ExecutionContext::new("wf-old", 0, EventEmitter::detached(Uuid::new_v4()));
    old.start().unwrap();
    old.complete().unwrap();
    let mut old_snapshot = old.snapshot();
    old_snapshot.saved_at = chrono::Utc::now() - chrono::Duration::days(30);
    store.save(&old_snapshot).await.unwrap();

    let mut fresh = ExecutionContext::new("wf-new", 0, EventEmitter::detached(Uuid::new_v4()));
    fresh.start().unwrap();
    let fresh_id = fresh.execution_id;
    store.save(&fresh.snapshot()).await.unwrap();

    // The running snapshot survives cleanup regardless of age.
    let removed = store.cleanup(chrono::Duration::days(7)).await.unwrap();
    assert_eq!(removed, 1);
    assert_eq!(store.list().await.unwrap().len(), 1);

    assert!(store.delete(fresh_id).await.unwrap());
    assert!(!store.delete(fresh_id).await.unwrap());
    assert!(store.load(fresh_id).await.is_err());
}

#[tokio::test]
async fn declared_binding_wins_over_result_outputs() {
    let fields = HashMap::from([
        ("field".to_string(), Value::String("from-binding".into())),
        (
            "outputs".to_string(),
            Value::Object(HashMap::from([
                ("x".to_string(), Value::String("from-result-outputs".into())),
                ("y".to_string(), Value::String("merged".into())),
            ])),
        ),
    ]);
    let automation = Arc::new(CannedAutomation { fields });
    let executor = StepExecutor::new(automation, ExecutorConfig::default());
    let ctx = ExecutionContext::new("wf", 1, EventEmitter::detached(Uuid::new_v4())).into_shared();

    let step = Step::new("emit", StepType::Click)
        .with_output("x", OutputBinding::Field("field".into()));
    executor.execute(&step, &ctx).await.unwrap();

    let guard = ctx.read().await;
    // On a name collision the step-level binding overrides the
    // result's outputs merge; non-colliding merged names survive.
    assert_eq!(
        guard.get_variable("x"),
        Some(&Value::String("from-binding".into()))
    );
    assert_eq!(guard.get_variable("y"), Some(&Value::String("merged".into())));
}

#[tokio::test]
async fn snapshot_version_mismatch_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let store = ExecutionStore::open(dir.path()).await.unwrap();

    let mut context = ExecutionContext::new("wf-v", 0, EventEmitter::detached(Uuid::new_v4()));
    context.start().unwrap();
    let mut snapshot = context.snapshot();
    snapshot.version = 99;
    store.save(&snapshot).await.unwrap();

    let err = store.load(snapshot.execution_id).await.unwrap_err();
    assert!(err.to_string().contains("version mismatch"));
}

#[tokio::test]
async fn output_binding_of_missing_field_is_null() {
    let automation = Arc::new(ScriptedAutomation::new());
    let executor = StepExecutor::new(automation, ExecutorConfig::default());
    let ctx = ExecutionContext::new("wf", 1, EventEmitter::detached(Uuid::new_v4())).into_shared();

    let step = tagged("probe", StepType::Click)
        .with_output("seen", OutputBinding::Field("tag".into()))
        .with_output("ghost", OutputBinding::Field("no_such_field".into()))
        .with_output("whole", OutputBinding::EntireResult);
    executor.execute(&step, &ctx).await.unwrap();

    let guard = ctx.read().await;
    assert_eq!(guard.get_variable("seen"), Some(&Value::String("probe".into())));
    assert_eq!(guard.get_variable("ghost"), Some(&Value::Null));
    assert!(matches!(guard.get_variable("whole"), Some(Value::Object(_))));
}

#[test]
fn malformed_execution_id_is_invalid() {
    assert!(matches!(
        ExecutionStore::parse_id("not-a-uuid"),
        Err(StoreError::InvalidId(_))
    ));
    assert!(ExecutionStore::parse_id(&Uuid::new_v4().to_string()).is_ok());
}

#[tokio::test]
async fn unknown_workflow_is_an_error() {
    let orchestrator = Orchestrator::new(Arc::new(SimulatedPage::new()), EngineConfig::default());
    assert!(orchestrator
        .run_workflow("missing", HashMap::new())
        .await
        .is_err());
}
