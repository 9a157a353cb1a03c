// Step evaluation for condition and loop steps

//! # Step Evaluator
//!
//! Condition and loop steps carry an opaque condition string. Interpreting it
//! is delegated to a [`StepEvaluator`], so deployments can plug in their own
//! expression language (or a model call) without touching the engine.
//!
//! ## Default: [`RuleEvaluator`]
//!
//! The default evaluator parses the condition as a JSON [`RuleCondition`] and
//! evaluates it against the step input, with the execution parameters as
//! fallback for field lookups.
//!
//! - **Condition step**: a passing condition takes the first successor, a
//!   failing one takes the second successor, or ends the branch when there is
//!   none.
//! - **Loop step**: a passing condition continues into the loop body (the first
//!   successor); a failing one exits through the remaining successors. The
//!   current pass number is visible to the rule as the `loop_iteration` field.

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::models::{Parameters, RuleCondition, WorkflowStep};
use crate::{MachineError, Result};

/// What the evaluator sees when deciding a step
#[derive(Debug, Clone, Copy)]
pub struct EvaluationContext<'a> {
    pub execution_id: Uuid,
    pub step: &'a WorkflowStep,
    /// Output of the predecessor step
    pub input: &'a Value,
    pub parameters: &'a Parameters,
    /// Pass number for loop steps, 1 for everything else
    pub iteration: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopDecision {
    Continue,
    Exit,
}

/// Decides branches for condition steps and continuation for loop steps
#[async_trait]
pub trait StepEvaluator: Send + Sync {
    /// Successor to follow, or `None` to end the branch here
    ///
    /// The engine refuses a successor that is not in the step's `next_steps`.
    async fn choose_branch(&self, ctx: EvaluationContext<'_>) -> Result<Option<String>>;

    async fn loop_decision(&self, ctx: EvaluationContext<'_>) -> Result<LoopDecision>;
}

/// Evaluates JSON rule conditions
#[derive(Debug, Default, Clone)]
pub struct RuleEvaluator;

impl RuleEvaluator {
    pub fn new() -> Self {
        Self
    }

    fn condition_of(step: &WorkflowStep) -> Result<RuleCondition> {
        let expression = step.condition.as_deref().ok_or_else(|| {
            MachineError::validation(format!("step '{}' has no condition", step.id))
        })?;
        RuleCondition::parse(expression)
    }
}

#[async_trait]
impl StepEvaluator for RuleEvaluator {
    async fn choose_branch(&self, ctx: EvaluationContext<'_>) -> Result<Option<String>> {
        let condition = Self::condition_of(ctx.step)?;
        let passed = condition.evaluate(ctx.input, ctx.parameters);
        debug!(
            execution_id = %ctx.execution_id,
            step_id = %ctx.step.id,
            passed,
            explanation = %condition.explain(ctx.input, ctx.parameters),
            "Condition evaluated"
        );

        let index = if passed { 0 } else { 1 };
        Ok(ctx.step.successors().get(index).cloned())
    }

    async fn loop_decision(&self, ctx: EvaluationContext<'_>) -> Result<LoopDecision> {
        let condition = Self::condition_of(ctx.step)?;
        let mut parameters = ctx.parameters.clone();
        parameters.insert("loop_iteration".to_string(), Value::from(ctx.iteration));

        let passed = condition.evaluate(ctx.input, &parameters);
        debug!(
            execution_id = %ctx.execution_id,
            step_id = %ctx.step.id,
            iteration = ctx.iteration,
            passed,
            "Loop condition evaluated"
        );

        Ok(if passed {
            LoopDecision::Continue
        } else {
            LoopDecision::Exit
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StepType;
    use serde_json::json;

    fn ctx<'a>(step: &'a WorkflowStep, input: &'a Value, params: &'a Parameters, iteration: u32) -> EvaluationContext<'a> {
        EvaluationContext {
            execution_id: Uuid::nil(),
            step,
            input,
            parameters: params,
            iteration,
        }
    }

    #[tokio::test]
    async fn test_condition_picks_branch_by_rule() {
        let step = WorkflowStep::new("gate", StepType::Condition, "Gate")
            .with_condition(r#"{"type": "FieldGreaterThan", "field": "score", "value": 0.8}"#)
            .with_next(&["publish", "revise"]);
        let params = Parameters::new();
        let evaluator = RuleEvaluator::new();

        let high = json!({"score": 0.9});
        assert_eq!(
            evaluator.choose_branch(ctx(&step, &high, &params, 1)).await.unwrap(),
            Some("publish".to_string())
        );

        let low = json!({"score": 0.2});
        assert_eq!(
            evaluator.choose_branch(ctx(&step, &low, &params, 1)).await.unwrap(),
            Some("revise".to_string())
        );
    }

    #[tokio::test]
    async fn test_failing_condition_without_else_ends_branch() {
        let step = WorkflowStep::new("gate", StepType::Condition, "Gate")
            .with_condition("false")
            .with_next(&["only"]);
        let params = Parameters::new();
        let input = json!({});
        assert_eq!(
            RuleEvaluator.choose_branch(ctx(&step, &input, &params, 1)).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_parameters_are_the_lookup_fallback() {
        let step = WorkflowStep::new("gate", StepType::Condition, "Gate")
            .with_condition(r#"{"type": "FieldEquals", "field": "mode", "value": "strict"}"#)
            .with_next(&["strict", "lenient"]);
        let params = json!({"mode": "strict"}).as_object().cloned().unwrap();
        let input = json!({"result": "text"});
        assert_eq!(
            RuleEvaluator.choose_branch(ctx(&step, &input, &params, 1)).await.unwrap(),
            Some("strict".to_string())
        );
    }

    #[tokio::test]
    async fn test_loop_sees_iteration_number() {
        let step = WorkflowStep::new("repeat", StepType::Loop, "Repeat")
            .with_condition(r#"{"type": "FieldLessThan", "field": "loop_iteration", "value": 3}"#)
            .with_next(&["body", "done"]);
        let params = Parameters::new();
        let input = json!({});

        assert_eq!(
            RuleEvaluator.loop_decision(ctx(&step, &input, &params, 2)).await.unwrap(),
            LoopDecision::Continue
        );
        assert_eq!(
            RuleEvaluator.loop_decision(ctx(&step, &input, &params, 3)).await.unwrap(),
            LoopDecision::Exit
        );
    }

    #[tokio::test]
    async fn test_unparseable_condition_is_an_error() {
        let step = WorkflowStep::new("gate", StepType::Condition, "Gate")
            .with_condition("score > 3")
            .with_next(&["a"]);
        let params = Parameters::new();
        let input = json!({});
        assert!(matches!(
            RuleEvaluator.choose_branch(ctx(&step, &input, &params, 1)).await,
            Err(MachineError::Validation(_))
        ));
    }
}
