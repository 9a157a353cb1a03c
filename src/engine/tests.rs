//! End-to-end tests across the engine components

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use super::scheduler::WorkItem;
use super::test_support::Harness;
use super::workflow::{EngineConfig, HumanDecision};
use crate::llm::SimulatedBackend;
use crate::models::{
    AgentId, ExecutionCreate, ExecutionStatus, Parameters, StepRunStatus, StepType, TaskCreate,
    TaskStatus, WorkflowCreate, WorkflowStep, WorkflowType, CANCELLATION_MESSAGE,
};
use crate::platform::Platform;
use crate::settings::Settings;
use crate::MachineError;

fn params(value: Value) -> Parameters {
    value.as_object().cloned().unwrap()
}

fn workflow(name: &str, steps: Vec<WorkflowStep>) -> WorkflowCreate {
    WorkflowCreate {
        name: name.to_string(),
        description: format!("{} workflow", name),
        workflow_type: WorkflowType::Custom,
        steps,
        parameters: None,
        metadata: None,
    }
}

fn input(value: Value) -> ExecutionCreate {
    ExecutionCreate {
        input_data: Some(params(value)),
        parameters: None,
    }
}

fn sink(id: &str) -> WorkflowStep {
    WorkflowStep::new(id, StepType::Condition, id)
}

fn assert_cost(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "cost {} != expected {}",
        actual,
        expected
    );
}

// 100 prompt + 50 completion tokens at (1e-5, 3e-5) per token
const CHEAP_STEP: f64 = 0.0025;
// 100 prompt + 50 completion tokens at (2e-5, 4e-5) per token
const PRICEY_STEP: f64 = 0.004;

#[tokio::test]
async fn test_review_workflow_waits_for_approval_then_completes() {
    let mut h = Harness::new(SimulatedBackend::with_usage(100, 50));
    let (_, analyst) = h.agent("Analyst", 0.00001, 0.00003).await;
    let (_, auditor) = h.agent("Auditor", 0.00002, 0.00004).await;

    let wf = h
        .engine
        .create_workflow(workflow(
            "Review",
            vec![
                WorkflowStep::agent("analysis", "Code Analysis", analyst.id.clone())
                    .with_next(&["security"]),
                WorkflowStep::agent("security", "Security Check", auditor.id.clone())
                    .with_next(&["review"]),
                WorkflowStep::new("review", StepType::Human, "Human Review"),
            ],
        ))
        .await
        .unwrap();

    let execution = h
        .engine
        .start_execution(&wf.id, input(json!({"file": "auth.rs"})))
        .await
        .unwrap();
    assert_eq!(execution.status, ExecutionStatus::InProgress);
    assert_eq!(execution.current_step_id.as_deref(), Some("analysis"));

    assert_eq!(h.drain().await, 3);
    let parked = h.engine.get_execution(&execution.id).await.unwrap();
    assert_eq!(parked.status, ExecutionStatus::InProgress);
    assert!(parked.awaiting_signal.contains_key("review"));
    assert_eq!(parked.current_step_id.as_deref(), Some("review"));
    assert_cost(parked.cost, CHEAP_STEP + PRICEY_STEP);

    let approved = h
        .engine
        .resolve_human_step(&execution.id, "review", HumanDecision::approve().with_comment("ship it"))
        .await
        .unwrap();
    assert_eq!(approved.status, ExecutionStatus::Completed);
    assert!(approved.completed_at.is_some());
    assert_eq!(approved.output_data["approved"], json!(true));
    assert_eq!(approved.output_data["comment"], json!("ship it"));
    assert_eq!(approved.output_data["agent_id"], json!(auditor.id.as_str()));
    assert_cost(approved.cost, CHEAP_STEP + PRICEY_STEP);
    assert_eq!(approved.steps_executed, 3);
    assert_eq!(h.backend.calls(), 2);
    assert_eq!(h.drain().await, 0);
}

#[tokio::test]
async fn test_agent_chain_completes_with_sink_output() {
    let mut h = Harness::new(SimulatedBackend::with_usage(100, 50));
    let (model, agent) = h.agent("Writer", 0.00001, 0.00003).await;

    let wf = h
        .engine
        .create_workflow(workflow(
            "Chain",
            vec![
                WorkflowStep::agent("draft", "Draft", agent.id.clone()).with_next(&["polish"]),
                WorkflowStep::agent("polish", "Polish", agent.id.clone()),
            ],
        ))
        .await
        .unwrap();

    let execution = h
        .engine
        .start_execution(&wf.id, ExecutionCreate::default())
        .await
        .unwrap();
    h.drain().await;

    let done = h.engine.get_execution(&execution.id).await.unwrap();
    assert_eq!(done.status, ExecutionStatus::Completed);
    assert_cost(done.cost, 2.0 * CHEAP_STEP);
    assert_eq!(done.output_data["model_id"], json!(model.id.as_str()));
    assert_eq!(done.output_data["prompt_tokens"], json!(100));
    assert!(done
        .step_history
        .iter()
        .all(|r| r.status == StepRunStatus::Completed && r.agent_id.as_ref() == Some(&agent.id)));
    assert_cost(h.costs.spent_today(), 2.0 * CHEAP_STEP);
}

#[tokio::test]
async fn test_fan_out_branches_join_before_completion() {
    let mut h = Harness::new(SimulatedBackend::with_usage(100, 50));
    let (_, agent) = h.agent("Planner", 0.00001, 0.00003).await;

    let wf = h
        .engine
        .create_workflow(workflow(
            "Fan out",
            vec![
                WorkflowStep::agent("plan", "Plan", agent.id.clone()).with_next(&["left", "right"]),
                WorkflowStep::agent("left", "Left", agent.id.clone()).with_next(&["merge"]),
                WorkflowStep::agent("right", "Right", agent.id.clone()).with_next(&["merge"]),
                sink("merge"),
            ],
        ))
        .await
        .unwrap();
    let execution = h
        .engine
        .start_execution(&wf.id, ExecutionCreate::default())
        .await
        .unwrap();

    let entry = match h.next_item() {
        Some(WorkItem::Step(work)) => work,
        other => panic!("expected the entry step, got {:?}", other),
    };
    assert_eq!(entry.step_id, "plan");
    assert!(h.next_item().is_none());
    h.engine.dispatch_step(entry).await.unwrap();

    let forked = h.engine.get_execution(&execution.id).await.unwrap();
    assert_eq!(forked.active_branches, 2);
    assert_eq!(forked.status, ExecutionStatus::InProgress);

    h.drain().await;
    let done = h.engine.get_execution(&execution.id).await.unwrap();
    assert_eq!(done.status, ExecutionStatus::Completed);
    assert_eq!(done.active_branches, 0);
    assert_eq!(h.backend.calls(), 3);
    assert_cost(done.cost, 3.0 * CHEAP_STEP);
    let merges = done
        .step_history
        .iter()
        .filter(|r| r.step_id == "merge")
        .count();
    assert_eq!(merges, 2);
}

#[tokio::test]
async fn test_branches_converging_on_human_step_each_need_a_signal() {
    let mut h = Harness::new(SimulatedBackend::with_usage(100, 50));
    let (_, agent) = h.agent("Planner", 0.00001, 0.00003).await;

    let wf = h
        .engine
        .create_workflow(workflow(
            "Converging review",
            vec![
                WorkflowStep::agent("plan", "Plan", agent.id.clone()).with_next(&["left", "right"]),
                WorkflowStep::agent("left", "Left", agent.id.clone()).with_next(&["review"]),
                WorkflowStep::agent("right", "Right", agent.id.clone()).with_next(&["review"]),
                WorkflowStep::new("review", StepType::Human, "Review"),
            ],
        ))
        .await
        .unwrap();
    let execution = h
        .engine
        .start_execution(&wf.id, ExecutionCreate::default())
        .await
        .unwrap();
    assert_eq!(h.drain().await, 5);

    let parked = h
        .engine
        .wait_for_execution(&execution.id, Duration::from_millis(100))
        .await
        .unwrap();
    assert_eq!(parked.status, ExecutionStatus::InProgress);
    assert_eq!(parked.active_branches, 2);
    assert_eq!(parked.awaiting_signal["review"].len(), 2);

    let first = h
        .engine
        .resolve_human_step(&execution.id, "review", HumanDecision::approve())
        .await
        .unwrap();
    assert_eq!(first.status, ExecutionStatus::InProgress);
    assert_eq!(first.active_branches, 1);

    let second = h
        .engine
        .resolve_human_step(&execution.id, "review", HumanDecision::approve())
        .await
        .unwrap();
    assert_eq!(second.status, ExecutionStatus::Completed);
    assert_eq!(second.active_branches, 0);
    assert!(second.awaiting_signal.is_empty());
    assert_eq!(
        second
            .step_history
            .iter()
            .filter(|r| r.step_id == "review" && r.status == StepRunStatus::Completed)
            .count(),
        2
    );

    assert!(matches!(
        h.engine
            .resolve_human_step(&execution.id, "review", HumanDecision::approve())
            .await,
        Err(MachineError::InvalidStateTransition(_))
    ));
}

#[tokio::test]
async fn test_condition_step_follows_chosen_branch() {
    let mut h = Harness::new(SimulatedBackend::new());

    let wf = h
        .engine
        .create_workflow(workflow(
            "Gate",
            vec![
                WorkflowStep::new("gate", StepType::Condition, "Gate")
                    .with_condition(r#"{"type": "FieldGreaterThan", "field": "score", "value": 0.8}"#)
                    .with_next(&["publish", "revise"]),
                sink("publish"),
                sink("revise"),
            ],
        ))
        .await
        .unwrap();

    let high = h
        .engine
        .start_execution(&wf.id, input(json!({"score": 0.9})))
        .await
        .unwrap();
    let low = h
        .engine
        .start_execution(&wf.id, input(json!({"score": 0.2})))
        .await
        .unwrap();
    h.drain().await;

    let high = h.engine.get_execution(&high.id).await.unwrap();
    assert_eq!(high.status, ExecutionStatus::Completed);
    assert!(high.sink_outputs.contains_key("publish"));
    assert!(!high.step_history.iter().any(|r| r.step_id == "revise"));
    assert_eq!(high.output_data["score"], json!(0.9));

    let low = h.engine.get_execution(&low.id).await.unwrap();
    assert_eq!(low.status, ExecutionStatus::Completed);
    assert!(low.sink_outputs.contains_key("revise"));
    assert_eq!(h.backend.calls(), 0);
}

fn looping_workflow(agent_id: &AgentId, max_iterations: Option<u64>) -> WorkflowCreate {
    let mut looper = WorkflowStep::new("loop", StepType::Loop, "Refine")
        .with_condition(r#"{"type": "FieldExists", "field": "loop_iteration"}"#)
        .with_next(&["body", "done"]);
    if let Some(max) = max_iterations {
        looper = looper.with_parameters(params(json!({"max_iterations": max})));
    }
    workflow(
        "Loop",
        vec![
            looper,
            WorkflowStep::agent("body", "Improve", agent_id.clone()).with_next(&["loop"]),
            sink("done"),
        ],
    )
}

#[tokio::test]
async fn test_loop_exits_at_iteration_cap() {
    let mut h = Harness::new(SimulatedBackend::with_usage(100, 50));
    let (_, agent) = h.agent("Refiner", 0.00001, 0.00003).await;

    let wf = h
        .engine
        .create_workflow(looping_workflow(&agent.id, Some(3)))
        .await
        .unwrap();
    let execution = h
        .engine
        .start_execution(&wf.id, ExecutionCreate::default())
        .await
        .unwrap();
    h.drain().await;

    let done = h.engine.get_execution(&execution.id).await.unwrap();
    assert_eq!(done.status, ExecutionStatus::Completed);
    assert_eq!(h.backend.calls(), 3);
    assert_eq!(
        done.step_history.iter().filter(|r| r.step_id == "loop").count(),
        4
    );
    assert!(!done.loop_iterations.contains_key("loop"));
    assert!(done.sink_outputs.contains_key("done"));
    assert_cost(done.cost, 3.0 * CHEAP_STEP);
}

#[tokio::test]
async fn test_inner_loop_counts_again_when_re_entered() {
    let mut h = Harness::new(SimulatedBackend::with_usage(100, 50));
    let (_, agent) = h.agent("Refiner", 0.00001, 0.00003).await;

    let wf = h
        .engine
        .create_workflow(workflow(
            "Nested loops",
            vec![
                WorkflowStep::new("outer", StepType::Loop, "Rounds")
                    .with_condition(
                        r#"{"type": "FieldLessThan", "field": "loop_iteration", "value": 3}"#,
                    )
                    .with_next(&["inner", "done"]),
                WorkflowStep::new("inner", StepType::Loop, "Passes")
                    .with_condition(r#"{"type": "FieldExists", "field": "loop_iteration"}"#)
                    .with_parameters(params(json!({"max_iterations": 2})))
                    .with_next(&["body", "outer"]),
                WorkflowStep::agent("body", "Improve", agent.id.clone()).with_next(&["inner"]),
                sink("done"),
            ],
        ))
        .await
        .unwrap();
    let execution = h
        .engine
        .start_execution(&wf.id, ExecutionCreate::default())
        .await
        .unwrap();
    h.drain().await;

    let done = h.engine.get_execution(&execution.id).await.unwrap();
    assert_eq!(done.status, ExecutionStatus::Completed);
    // Two outer rounds with two inner passes each
    assert_eq!(h.backend.calls(), 4);
    assert!(done.loop_iterations.is_empty());
    assert!(done.sink_outputs.contains_key("done"));
}

#[tokio::test]
async fn test_step_budget_fails_runaway_execution() {
    let config = EngineConfig {
        max_steps_per_execution: 5,
        max_loop_iterations: 25,
    };
    let mut h = Harness::with_config(SimulatedBackend::with_usage(100, 50), config);
    let (_, agent) = h.agent("Refiner", 0.00001, 0.00003).await;

    let wf = h
        .engine
        .create_workflow(looping_workflow(&agent.id, None))
        .await
        .unwrap();
    let execution = h
        .engine
        .start_execution(&wf.id, ExecutionCreate::default())
        .await
        .unwrap();
    h.drain().await;

    let failed = h.engine.get_execution(&execution.id).await.unwrap();
    assert_eq!(failed.status, ExecutionStatus::Failed);
    assert_eq!(failed.steps_executed, 5);
    let error = failed.error.unwrap();
    assert!(error.contains("budget of 5 steps"), "{}", error);
    assert_eq!(h.backend.calls(), 2);
}

#[tokio::test]
async fn test_human_rejection_fails_execution() {
    let mut h = Harness::new(SimulatedBackend::with_usage(100, 50));
    let (_, agent) = h.agent("Writer", 0.00001, 0.00003).await;

    let wf = h
        .engine
        .create_workflow(workflow(
            "Approval",
            vec![
                WorkflowStep::agent("draft", "Draft", agent.id.clone()).with_next(&["review"]),
                WorkflowStep::new("review", StepType::Human, "Review"),
            ],
        ))
        .await
        .unwrap();
    let execution = h
        .engine
        .start_execution(&wf.id, ExecutionCreate::default())
        .await
        .unwrap();
    h.drain().await;

    let err = h
        .engine
        .resolve_human_step(&execution.id, "draft", HumanDecision::approve())
        .await
        .unwrap_err();
    assert!(matches!(err, MachineError::InvalidStateTransition(_)));

    let rejected = h
        .engine
        .resolve_human_step(&execution.id, "review", HumanDecision::reject("needs work"))
        .await
        .unwrap();
    assert_eq!(rejected.status, ExecutionStatus::Failed);
    assert!(rejected.error.unwrap().contains("needs work"));
    assert!(rejected.awaiting_signal.is_empty());

    let again = h
        .engine
        .resolve_human_step(&execution.id, "review", HumanDecision::approve())
        .await
        .unwrap_err();
    assert!(matches!(again, MachineError::InvalidStateTransition(_)));
}

#[tokio::test]
async fn test_upstream_failure_fails_execution() {
    let mut h = Harness::new(SimulatedBackend::failing("provider unavailable"));
    let (_, agent) = h.agent("Writer", 0.00001, 0.00003).await;

    let wf = h
        .engine
        .create_workflow(workflow(
            "Single",
            vec![WorkflowStep::agent("only", "Only", agent.id.clone())],
        ))
        .await
        .unwrap();
    let execution = h
        .engine
        .start_execution(&wf.id, ExecutionCreate::default())
        .await
        .unwrap();
    h.drain().await;

    let failed = h.engine.get_execution(&execution.id).await.unwrap();
    assert_eq!(failed.status, ExecutionStatus::Failed);
    assert!(failed.error.unwrap().contains("provider unavailable"));
    assert_eq!(failed.step_history[0].status, StepRunStatus::Failed);
    assert_cost(failed.cost, 0.0);
}

#[tokio::test]
async fn test_failed_step_leaves_engine_usable() {
    let mut h = Harness::new(SimulatedBackend::with_usage(100, 50));
    let (_, agent) = h.agent("Writer", 0.00001, 0.00003).await;

    let wf = h
        .engine
        .create_workflow(workflow(
            "Single",
            vec![WorkflowStep::agent("only", "Only", agent.id.clone())],
        ))
        .await
        .unwrap();

    let broken = h
        .engine
        .start_execution(
            &wf.id,
            ExecutionCreate {
                input_data: None,
                parameters: Some(params(json!({"model_id": "missing-model"}))),
            },
        )
        .await
        .unwrap();
    let healthy = h
        .engine
        .start_execution(&wf.id, ExecutionCreate::default())
        .await
        .unwrap();
    h.drain().await;

    let broken = h.engine.get_execution(&broken.id).await.unwrap();
    assert_eq!(broken.status, ExecutionStatus::Failed);
    assert!(broken.error.unwrap().contains("missing-model"));

    let healthy = h.engine.get_execution(&healthy.id).await.unwrap();
    assert_eq!(healthy.status, ExecutionStatus::Completed);
}

#[tokio::test]
async fn test_cancel_twice_is_rejected() {
    let h = Harness::new(SimulatedBackend::new());
    let (_, agent) = h.agent("Writer", 0.00001, 0.00003).await;
    let wf = h
        .engine
        .create_workflow(workflow(
            "Single",
            vec![WorkflowStep::agent("only", "Only", agent.id.clone())],
        ))
        .await
        .unwrap();
    let execution = h
        .engine
        .start_execution(&wf.id, ExecutionCreate::default())
        .await
        .unwrap();

    let cancelled = h.engine.cancel_execution(&execution.id).await.unwrap();
    assert_eq!(cancelled.status, ExecutionStatus::Failed);
    assert_eq!(cancelled.error.as_deref(), Some(CANCELLATION_MESSAGE));

    let err = h.engine.cancel_execution(&execution.id).await.unwrap_err();
    assert!(matches!(err, MachineError::InvalidStateTransition(_)));
}

#[tokio::test]
async fn test_cancelled_execution_runs_no_further_steps() {
    let mut h = Harness::new(SimulatedBackend::with_usage(100, 50));
    let (_, agent) = h.agent("Writer", 0.00001, 0.00003).await;
    let wf = h
        .engine
        .create_workflow(workflow(
            "Chain",
            vec![
                WorkflowStep::agent("first", "First", agent.id.clone()).with_next(&["second"]),
                WorkflowStep::agent("second", "Second", agent.id.clone()),
            ],
        ))
        .await
        .unwrap();
    let execution = h
        .engine
        .start_execution(&wf.id, ExecutionCreate::default())
        .await
        .unwrap();

    h.engine.cancel_execution(&execution.id).await.unwrap();
    assert_eq!(h.drain().await, 1);

    let after = h.engine.get_execution(&execution.id).await.unwrap();
    assert_eq!(after.status, ExecutionStatus::Failed);
    assert_eq!(after.error.as_deref(), Some(CANCELLATION_MESSAGE));
    assert_eq!(after.steps_executed, 0);
    assert_eq!(h.backend.calls(), 0);
}

#[tokio::test]
async fn test_delete_workflow_refused_while_execution_is_live() {
    let mut h = Harness::new(SimulatedBackend::new());
    let wf = h
        .engine
        .create_workflow(workflow(
            "Approval",
            vec![WorkflowStep::new("review", StepType::Human, "Review")],
        ))
        .await
        .unwrap();
    let execution = h
        .engine
        .start_execution(&wf.id, ExecutionCreate::default())
        .await
        .unwrap();
    h.drain().await;

    let err = h.engine.delete_workflow(&wf.id).await.unwrap_err();
    assert!(matches!(err, MachineError::InUse { .. }));

    h.engine.cancel_execution(&execution.id).await.unwrap();
    h.engine.delete_workflow(&wf.id).await.unwrap();
    assert!(matches!(
        h.engine.get_workflow(&wf.id).await.unwrap_err(),
        MachineError::NotFound { .. }
    ));
}

#[tokio::test]
async fn test_inactive_workflow_cannot_start() {
    let h = Harness::new(SimulatedBackend::new());
    let wf = h
        .engine
        .create_workflow(workflow(
            "Approval",
            vec![WorkflowStep::new("review", StepType::Human, "Review")],
        ))
        .await
        .unwrap();
    h.engine
        .update_workflow(
            &wf.id,
            crate::models::WorkflowUpdate {
                is_active: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let err = h
        .engine
        .start_execution(&wf.id, ExecutionCreate::default())
        .await
        .unwrap_err();
    assert!(matches!(err, MachineError::InactiveEntity { .. }));

    let missing = h
        .engine
        .start_execution("no-such-workflow", ExecutionCreate::default())
        .await
        .unwrap_err();
    assert!(matches!(missing, MachineError::NotFound { .. }));
}

fn platform(backend: SimulatedBackend) -> Platform {
    let settings = Settings {
        worker_count: 2,
        ..Settings::default()
    };
    Platform::builder(settings)
        .with_backend(Arc::new(backend))
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_platform_runs_seeded_review_workflow() {
    let platform = platform(SimulatedBackend::with_usage(100, 50));
    let summary = crate::seed::seed_catalog(&platform).await.unwrap();

    let execution = platform
        .start_execution(&summary.workflow_id, input(json!({"code": "fn main() {}"})))
        .await
        .unwrap();

    let parked = platform
        .wait_for_execution(&execution.id, Duration::from_secs(5))
        .await
        .unwrap();
    assert!(parked.awaiting_signal.contains_key("step3"));
    assert!(parked.cost > 0.0);

    platform
        .resolve_human_step(&execution.id, "step3", HumanDecision::approve())
        .await
        .unwrap();
    let done = platform
        .wait_for_execution(&execution.id, Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(done.status, ExecutionStatus::Completed);

    let stats = platform.stats().await.unwrap();
    assert_eq!(stats.workflows, 1);
    assert_eq!(stats.executions_completed, 1);
    assert_cost(stats.spent_today, done.cost);

    platform.shutdown().await;
    platform.shutdown().await;
}

#[tokio::test]
async fn test_platform_runs_fan_out_branches_concurrently() {
    let backend = Arc::new(
        SimulatedBackend::with_usage(100, 50).with_latency(Duration::from_millis(100)),
    );
    let settings = Settings {
        worker_count: 4,
        seed_catalog: false,
        ..Settings::default()
    };
    let platform = Platform::builder(settings)
        .with_backend(backend.clone())
        .build()
        .unwrap();

    let model = platform
        .register_model(crate::engine::test_support::model_create("Fast", 0.00001, 0.00003))
        .await
        .unwrap();
    let agent = platform
        .register_agent(crate::engine::test_support::agent_create("Worker", &model.id))
        .await
        .unwrap();
    let wf = platform
        .create_workflow(workflow(
            "Wide",
            vec![
                WorkflowStep::agent("plan", "Plan", agent.id.clone())
                    .with_next(&["a", "b", "c"]),
                WorkflowStep::agent("a", "A", agent.id.clone()),
                WorkflowStep::agent("b", "B", agent.id.clone()),
                WorkflowStep::agent("c", "C", agent.id.clone()),
            ],
        ))
        .await
        .unwrap();

    let execution = platform
        .start_execution(&wf.id, ExecutionCreate::default())
        .await
        .unwrap();
    let done = platform
        .wait_for_execution(&execution.id, Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(done.status, ExecutionStatus::Completed);
    assert_eq!(backend.calls(), 4);
    assert!(backend.peak_concurrency() >= 2);
    assert_cost(done.cost, 4.0 * CHEAP_STEP);

    platform.shutdown().await;
}

#[tokio::test]
async fn test_platform_refuses_deleting_agent_bound_to_workflow() {
    let platform = platform(SimulatedBackend::new());
    let summary = crate::seed::seed_catalog(&platform).await.unwrap();

    let code_agent = &summary.agents[0];
    let err = platform.delete_agent(code_agent).await.unwrap_err();
    assert!(matches!(err, MachineError::InUse { .. }));

    // The design agent is not part of any workflow
    platform.delete_agent(&summary.agents[1]).await.unwrap();
    assert!(matches!(
        platform.get_agent(&summary.agents[1]).await.unwrap_err(),
        MachineError::NotFound { .. }
    ));

    platform.shutdown().await;
}

#[tokio::test]
async fn test_platform_processes_agent_bound_task() {
    let platform = platform(SimulatedBackend::with_usage(100, 50));
    let summary = crate::seed::seed_catalog(&platform).await.unwrap();

    let task = platform
        .create_task(TaskCreate {
            task_type: crate::models::TaskType::Code,
            title: "Write a parser".to_string(),
            description: "Parse key=value lines".to_string(),
            priority: None,
            context: None,
            agent_id: Some(summary.agents[0].clone()),
            model_id: None,
            parameters: None,
        })
        .await
        .unwrap();

    let mut status = task.status;
    for _ in 0..100 {
        status = platform.get_task(&task.id).await.unwrap().status;
        if status.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(status, TaskStatus::Completed);

    let done = platform.get_task(&task.id).await.unwrap();
    assert_eq!(done.progress, 1.0);
    assert!(done.cost > 0.0);
    assert!(done.result.unwrap().contains_key("result"));

    platform.shutdown().await;
}
