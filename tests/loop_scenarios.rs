//! End-to-end loop scenarios
//!
//! Drives the loop controller with a scripted model, the built-in
//! capabilities and real checkpoint stores.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use planloop::checkpoint::{CheckpointStore, MemoryCheckpointStore, SqliteCheckpointStore, cycle_batch};
use planloop::domain::{
    CycleRecord, ExecutionResult, Plan, ReflectionPayload, ReflectionRecord, Run, RunStatus, Step,
};
use planloop::error::PlanloopError;
use planloop::llm::ScriptedModel;
use planloop::memory::JsonlMemory;
use planloop::runner::{LoopController, LoopSettings};
use planloop::tools::{Capability, CapabilityError, CapabilityRegistry};
use serde_json::{Map, Value, json};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const COMPUTE_AND_SAVE: &str = r#"Here is the plan:
```json
{
  "steps": [
    {"step_number": 1, "capability": "calculator", "arguments": {"expression": "23*7+11"}, "description": "evaluate the expression"},
    {"step_number": 2, "capability": "write_file", "arguments": {"path": "result.txt", "content": "172"}, "description": "save the result", "citations": [1]}
  ],
  "rationale": "compute the value, then persist it"
}
```"#;

const ECHO_PLAN: &str = r#"{"steps": [{"step_number": 1, "capability": "echo", "arguments": {"text": "working"}, "description": "report progress"}], "rationale": "make progress"}"#;
const BAD_PLAN: &str = r#"{"steps": [{"step_number": 1, "capability": "teleport", "arguments": {}, "description": "go"}], "rationale": "use a capability that does not exist"}"#;
const GOAL_DONE: &str = r#"{"decision": "finish", "goal_satisfied": true, "summary": "172 written to result.txt"}"#;
const CONTINUE: &str = r#"{"decision": "continue", "summary": "more to do"}"#;

fn settings() -> LoopSettings {
    LoopSettings {
        human_checkpoint_enabled: false,
        ..Default::default()
    }
}

fn registry(dir: &TempDir) -> Arc<CapabilityRegistry> {
    Arc::new(CapabilityRegistry::with_builtins(dir.path(), 10_000))
}

fn controller(
    model: &Arc<ScriptedModel>,
    store: Arc<dyn CheckpointStore>,
    settings: LoopSettings,
    dir: &TempDir,
) -> LoopController {
    LoopController::new(model.clone(), registry(dir), store, settings).unwrap()
}

/// Scenario A: single cycle reaches the goal
#[tokio::test]
async fn test_compute_and_save_finishes_goal() {
    let dir = TempDir::new().unwrap();
    let model = Arc::new(ScriptedModel::new([COMPUTE_AND_SAVE, GOAL_DONE]));
    let store = Arc::new(MemoryCheckpointStore::new());

    let run = controller(&model, store.clone(), settings(), &dir)
        .start("compute 23*7+11 and save to result.txt")
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::FinishedGoal);
    assert_eq!(run.cycle, 1);
    assert_eq!(std::fs::read_to_string(dir.path().join("result.txt")).unwrap(), "172");

    let results = &run.history[0].results;
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].value, Some(json!(172)));
    assert!(results.iter().all(|r| r.success));

    let rows = store.load_rows(&run.id).unwrap();
    assert_eq!(rows.iter().map(|r| r.seq).collect::<Vec<_>>(), vec![1, 2]);
    assert_eq!(rows[1].payload.step.citations, Some(vec![1]));
    assert!(rows[1].payload.reflection.is_some());
}

/// Scenario B: repair budget of two is exhausted
#[tokio::test]
async fn test_repair_budget_exhausted() {
    let dir = TempDir::new().unwrap();
    let model = Arc::new(ScriptedModel::new([BAD_PLAN, BAD_PLAN, ECHO_PLAN, GOAL_DONE]));
    let store = Arc::new(MemoryCheckpointStore::new());
    let settings = LoopSettings {
        max_plan_attempts: 2,
        ..settings()
    };

    let run = controller(&model, store.clone(), settings, &dir).start("goal").await.unwrap();

    assert_eq!(run.status, RunStatus::FinishedError);
    assert_eq!(run.cycle, 0);
    assert_eq!(model.call_count(), 2);
    let detail = run.last_error.unwrap();
    assert!(detail.contains("after 2 attempt(s)"), "{}", detail);
    assert!(detail.contains("teleport"), "{}", detail);
    assert_eq!(store.row_count(), 0);
    assert_eq!(
        store.load_run(&run.id).unwrap().unwrap().status,
        RunStatus::FinishedError
    );
}

/// Scenario B: the same responses succeed with three attempts
#[tokio::test]
async fn test_repair_within_budget() {
    let dir = TempDir::new().unwrap();
    let model = Arc::new(ScriptedModel::new([BAD_PLAN, BAD_PLAN, ECHO_PLAN, GOAL_DONE]));
    let store = Arc::new(MemoryCheckpointStore::new());
    let settings = LoopSettings {
        max_plan_attempts: 3,
        ..settings()
    };

    let run = controller(&model, store, settings, &dir).start("goal").await.unwrap();

    assert_eq!(run.status, RunStatus::FinishedGoal);
    assert_eq!(run.repair_attempts, 2);
    let calls = model.calls();
    assert_eq!(calls.len(), 4);
    // Repair prompts carry the violations of the rejected output
    assert!(calls[1].prompt.contains("unknown capability 'teleport'"));
    assert!(calls[2].prompt.contains("unknown capability 'teleport'"));
}

/// Scenario C: iteration cap reached while the model keeps continuing
#[tokio::test]
async fn test_iteration_cap_reached() {
    let dir = TempDir::new().unwrap();
    let model = Arc::new(ScriptedModel::new([
        ECHO_PLAN, CONTINUE, ECHO_PLAN, CONTINUE, ECHO_PLAN, CONTINUE, ECHO_PLAN, CONTINUE,
    ]));
    let store = Arc::new(MemoryCheckpointStore::new());
    let settings = LoopSettings {
        max_iterations: 3,
        ..settings()
    };

    let run = controller(&model, store.clone(), settings, &dir).start("goal").await.unwrap();

    assert_eq!(run.status, RunStatus::FinishedLimit);
    assert_eq!(run.cycle, 3);
    assert_eq!(model.call_count(), 6);

    let state = store.load_latest(&run.id).unwrap().unwrap();
    assert_eq!(state.cycle, 3);
    assert_eq!(state.history.len(), 3);
    assert_eq!(state.next_seq, 4);
}

fn seeded_cycle(cycle: u32) -> CycleRecord {
    let steps = vec![
        Step::new(
            1,
            "calculator",
            json!({"expression": format!("{}*10", cycle)}).as_object().cloned().unwrap(),
            "compute",
        ),
        Step::new(2, "echo", json!({"text": "ok"}).as_object().cloned().unwrap(), "report"),
    ];
    CycleRecord {
        cycle,
        plan: Plan::new(steps, format!("cycle {} approach", cycle)),
        results: vec![
            ExecutionResult::success(1, "calculator", json!(cycle * 10), 1),
            ExecutionResult::success(2, "echo", json!("ok"), 1),
        ],
        reflection: Some(ReflectionRecord::parsed(
            cycle,
            ReflectionPayload {
                summary: Some(format!("finished cycle {}", cycle)),
                ..ReflectionPayload::fallback_continue()
            },
            0,
        )),
    }
}

/// Scenario D: a run interrupted after two cycles resumes at cycle three
#[tokio::test]
async fn test_resume_after_interruption() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("checkpoints.db");
    let run_id = "interrupted-run";

    {
        let store = SqliteCheckpointStore::open(&db_path).unwrap();
        let mut run = Run::new(run_id, "finish the report");
        let mut seq = 1;
        for cycle in 1..=2 {
            let record = seeded_cycle(cycle);
            let rows = cycle_batch(&record, seq);
            store.append_batch(run_id, &rows).unwrap();
            seq += rows.len() as u64;
            run.cycle = cycle;
            run.history.push(record);
        }
        store.save_run(&run.summary()).unwrap();
    }

    let store = Arc::new(SqliteCheckpointStore::open(&db_path).unwrap());
    let model = Arc::new(ScriptedModel::new([ECHO_PLAN, GOAL_DONE]));
    let run = controller(&model, store.clone(), settings(), &dir)
        .resume(run_id)
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::FinishedGoal);
    assert_eq!(run.cycle, 3);
    assert_eq!(run.goal, "finish the report");

    let plan_prompt = &model.calls()[0].prompt;
    assert!(plan_prompt.contains("This is cycle 3."), "{}", plan_prompt);
    assert!(plan_prompt.contains("finished cycle 2"));

    let rows = store.load_rows(run_id).unwrap();
    assert_eq!(rows.len(), 5);
    assert_eq!(rows[4].seq, 5);
    assert_eq!(rows[4].payload.cycle, 3);
    assert_eq!(
        store.load_run(run_id).unwrap().unwrap().status,
        RunStatus::FinishedGoal
    );
}

#[tokio::test]
async fn test_resume_ignores_partial_trailing_batch() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(SqliteCheckpointStore::open(dir.path().join("c.db")).unwrap());
    let run_id = "partial-run";

    let mut run = Run::new(run_id, "goal");
    let first = seeded_cycle(1);
    store.append_batch(run_id, &cycle_batch(&first, 1)).unwrap();
    // Only the first row of cycle 2 made it to disk
    let second = cycle_batch(&seeded_cycle(2), 3);
    store.append(run_id, second[0].0, &second[0].1).unwrap();
    run.cycle = 2;
    store.save_run(&run.summary()).unwrap();

    let model = Arc::new(ScriptedModel::new([ECHO_PLAN, GOAL_DONE]));
    let resumed = controller(&model, store.clone(), settings(), &dir)
        .resume(run_id)
        .await
        .unwrap();

    assert_eq!(resumed.status, RunStatus::FinishedGoal);
    assert_eq!(resumed.cycle, 2);
    assert!(model.calls()[0].prompt.contains("This is cycle 2."));

    let state = store.load_latest(run_id).unwrap().unwrap();
    assert_eq!(state.cycle, 2);
    assert_eq!(state.history[1].plan.steps[0].capability, "echo");
}

/// Cancels the run from inside a step
struct Interrupt(CancellationToken);

#[async_trait]
impl Capability for Interrupt {
    fn name(&self) -> &str {
        "interrupt"
    }
    fn description(&self) -> &str {
        "simulates the operator pressing Ctrl+C"
    }
    fn argument_schema(&self) -> Value {
        json!({"type": "object"})
    }
    async fn invoke(&self, _args: &Map<String, Value>) -> Result<Value, CapabilityError> {
        self.0.cancel();
        Ok(Value::Null)
    }
}

#[tokio::test]
async fn test_cancellation_mid_cycle() {
    let dir = TempDir::new().unwrap();
    let cancel = CancellationToken::new();
    let registry = CapabilityRegistry::with_builtins(dir.path(), 10_000)
        .with(Arc::new(Interrupt(cancel.clone())))
        .unwrap();
    let plan = r#"{"steps": [
        {"step_number": 1, "capability": "interrupt", "arguments": {}, "description": "stop"},
        {"step_number": 2, "capability": "write_file", "arguments": {"path": "late.txt", "content": "x"}, "description": "too late"}
    ], "rationale": "interrupted"}"#;
    let model = Arc::new(ScriptedModel::new([plan, GOAL_DONE]));
    let store = Arc::new(MemoryCheckpointStore::new());

    let run = LoopController::new(model.clone(), Arc::new(registry), store.clone(), settings())
        .unwrap()
        .with_cancellation(cancel)
        .start("goal")
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::AbortedByOperator);
    assert_eq!(model.call_count(), 1);
    assert!(!dir.path().join("late.txt").exists());
    assert_eq!(store.row_count(), 0);
    assert_eq!(
        store.load_run(&run.id).unwrap().unwrap().status,
        RunStatus::AbortedByOperator
    );
}

#[tokio::test]
async fn test_aborted_run_can_be_resumed() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryCheckpointStore::new());
    let model = Arc::new(ScriptedModel::new([ECHO_PLAN, GOAL_DONE]));

    let first = controller(&model, store.clone(), settings(), &dir);
    first.cancellation().cancel();
    let aborted = first.start_with_id("run-abort", "goal").await.unwrap();
    assert_eq!(aborted.status, RunStatus::AbortedByOperator);

    let resumed = controller(&model, store, settings(), &dir)
        .resume("run-abort")
        .await
        .unwrap();
    assert_eq!(resumed.status, RunStatus::FinishedGoal);
    assert_eq!(resumed.cycle, 1);
}

#[tokio::test]
async fn test_second_writer_rejected() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryCheckpointStore::new());
    store.claim_writer("busy-run").unwrap();

    let model = Arc::new(ScriptedModel::new([ECHO_PLAN, GOAL_DONE]));
    let err = controller(&model, store.clone(), settings(), &dir)
        .start_with_id("busy-run", "goal")
        .await
        .unwrap_err();
    assert!(matches!(err, PlanloopError::InvalidState(_)));
    assert_eq!(model.call_count(), 0);

    store.release_writer("busy-run");
    let run = controller(&model, store, settings(), &dir)
        .start_with_id("busy-run", "goal")
        .await
        .unwrap();
    assert_eq!(run.status, RunStatus::FinishedGoal);
}

#[tokio::test]
async fn test_concurrent_runs_share_store() {
    let dir = TempDir::new().unwrap();
    let store: Arc<dyn CheckpointStore> = Arc::new(SqliteCheckpointStore::open(dir.path().join("c.db")).unwrap());
    let model_a = Arc::new(ScriptedModel::new([ECHO_PLAN, CONTINUE, ECHO_PLAN, GOAL_DONE]));
    let model_b = Arc::new(ScriptedModel::new([COMPUTE_AND_SAVE, GOAL_DONE]));
    let a = controller(&model_a, store.clone(), settings(), &dir);
    let b = controller(&model_b, store.clone(), settings(), &dir);

    let (run_a, run_b) = tokio::join!(a.start_with_id("run-a", "goal a"), b.start_with_id("run-b", "goal b"));
    let (run_a, run_b) = (run_a.unwrap(), run_b.unwrap());

    assert_eq!(run_a.status, RunStatus::FinishedGoal);
    assert_eq!(run_b.status, RunStatus::FinishedGoal);
    assert_eq!(store.load_rows("run-a").unwrap().len(), 2);
    assert_eq!(store.load_rows("run-b").unwrap().len(), 2);
    assert_eq!(store.list_runs().unwrap().len(), 2);
}

#[tokio::test]
async fn test_reflection_failures_end_run() {
    let dir = TempDir::new().unwrap();
    let model = Arc::new(ScriptedModel::new([
        ECHO_PLAN,
        "not json at all",
        ECHO_PLAN,
        r#"{"decision": "maybe"}"#,
        ECHO_PLAN,
        r#"{"decision": "continue", "mood": "great"}"#,
    ]));
    let store = Arc::new(MemoryCheckpointStore::new());

    let run = controller(&model, store.clone(), settings(), &dir).start("goal").await.unwrap();

    assert_eq!(run.status, RunStatus::FinishedError);
    assert_eq!(run.cycle, 3);
    assert_eq!(run.reflection_failures, 3);
    assert_eq!(run.failure_log.len(), 3);
    assert!(run.history.iter().all(|c| c.reflection.as_ref().is_some_and(|r| r.is_parse_failure())));

    let state = store.load_latest(&run.id).unwrap().unwrap();
    assert_eq!(state.reflection_failures, 3);
}

#[tokio::test]
async fn test_time_limit_zero_finishes_immediately() {
    let dir = TempDir::new().unwrap();
    let model = Arc::new(ScriptedModel::new([ECHO_PLAN, GOAL_DONE]));
    let store = Arc::new(MemoryCheckpointStore::new());
    let settings = LoopSettings {
        time_limit: Duration::ZERO,
        ..settings()
    };

    let run = controller(&model, store.clone(), settings, &dir).start("goal").await.unwrap();

    assert_eq!(run.status, RunStatus::FinishedLimit);
    assert_eq!(model.call_count(), 0);
    assert_eq!(store.row_count(), 0);
}

#[tokio::test]
async fn test_memory_carries_across_runs() {
    let dir = TempDir::new().unwrap();
    let memory = Arc::new(JsonlMemory::new(dir.path().join("memory.jsonl")));
    let store = Arc::new(MemoryCheckpointStore::new());

    let model = Arc::new(ScriptedModel::new([COMPUTE_AND_SAVE, GOAL_DONE]));
    let first = controller(&model, store.clone(), settings(), &dir)
        .with_memory(memory.clone())
        .start("compute arithmetic and save result")
        .await
        .unwrap();
    assert_eq!(first.status, RunStatus::FinishedGoal);

    let model = Arc::new(ScriptedModel::new([ECHO_PLAN, GOAL_DONE]));
    controller(&model, store, settings(), &dir)
        .with_memory(memory)
        .start("compute more arithmetic")
        .await
        .unwrap();

    let context = &model.calls()[0].context;
    assert!(context.contains("compute arithmetic and save result"), "{}", context);
    assert!(context.contains("172 written to result.txt"), "{}", context);
}
