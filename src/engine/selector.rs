//! # Model Selection
//!
//! Picks the model that serves a piece of work. Selection is a filter
//! followed by a ranking:
//!
//! 1. drop inactive models
//! 2. drop models missing a required capability
//! 3. drop models whose context window is smaller than the requested context
//!    (a hard rejection, never a ranking penalty)
//! 4. score the survivors and sort, best first
//!
//! ## Scoring
//!
//! With `s` the cost sensitivity in `[0, 1]`:
//!
//! ```text
//! score = s · cheapness + (1 − s) · (0.7 · breadth + 0.3 · provider_match)
//! ```
//!
//! - `cheapness` is the blended per-token rate min-max normalised over the
//!   survivors, cheapest = 1 (all equal = 1)
//! - `breadth` is the number of distinct capabilities over the size of the
//!   capability set
//! - `provider_match` is 1 for the preferred provider, 0 otherwise
//!
//! Equal scores are ordered by model id, so identical inputs against an
//! unchanged catalog always produce the same choice and the same ranking.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use super::registry::Registry;
use crate::models::{AgentType, Model, ModelCapability, ModelId, ModelProvider};
use crate::{MachineError, Result};

const BREADTH_WEIGHT: f64 = 0.7;
const PROVIDER_WEIGHT: f64 = 0.3;
const DEFAULT_ESTIMATE_TOKENS: u32 = 1000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionCriteria {
    #[serde(default)]
    pub required_capabilities: Vec<ModelCapability>,
    #[serde(default)]
    pub context_size: Option<u32>,
    #[serde(default = "default_cost_sensitivity")]
    pub cost_sensitivity: f64,
    #[serde(default)]
    pub preferred_provider: Option<ModelProvider>,
    /// Informational; recorded in the reasoning
    #[serde(default)]
    pub task_type: Option<AgentType>,
}

fn default_cost_sensitivity() -> f64 {
    0.5
}

impl Default for SelectionCriteria {
    fn default() -> Self {
        Self {
            required_capabilities: Vec::new(),
            context_size: None,
            cost_sensitivity: default_cost_sensitivity(),
            preferred_provider: None,
            task_type: None,
        }
    }
}

impl SelectionCriteria {
    pub fn new(required_capabilities: Vec<ModelCapability>) -> Self {
        Self {
            required_capabilities,
            ..Default::default()
        }
    }

    pub fn with_context_size(mut self, context_size: u32) -> Self {
        self.context_size = Some(context_size);
        self
    }

    pub fn with_cost_sensitivity(mut self, cost_sensitivity: f64) -> Self {
        self.cost_sensitivity = cost_sensitivity;
        self
    }

    pub fn with_preferred_provider(mut self, provider: ModelProvider) -> Self {
        self.preferred_provider = Some(provider);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.cost_sensitivity.is_finite() || !(0.0..=1.0).contains(&self.cost_sensitivity) {
            return Err(MachineError::validation(
                "cost_sensitivity must be between 0 and 1",
            ));
        }
        Ok(())
    }
}

/// Why a model never made it to the ranking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectionReason {
    Inactive,
    MissingCapabilities { missing: Vec<ModelCapability> },
    ContextWindowExceeded { required: u32, available: u32 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedModel {
    pub model_id: ModelId,
    pub reason: RejectionReason,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedModel {
    pub model: Model,
    pub score: f64,
    pub reason_not_selected: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSelection {
    pub model: Model,
    pub score: f64,
    /// Remaining survivors, best first
    pub alternatives: Vec<RankedModel>,
    pub rejected: Vec<RejectedModel>,
    pub estimated_tokens: u32,
    pub estimated_cost: f64,
    pub reasoning: String,
}

/// Outcome of checking one specific model against a context size
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextValidation {
    pub model: Model,
    pub context_size: Option<u32>,
    pub remaining_tokens: u32,
    /// Prompt cost of filling the requested context
    pub estimated_cost: f64,
}

pub struct ModelSelector {
    registry: Arc<Registry>,
}

impl ModelSelector {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// Best-fit search over the whole catalog
    pub async fn select(&self, criteria: &SelectionCriteria) -> Result<ModelSelection> {
        criteria.validate()?;
        let models = self.registry.all_models().await?;
        let selection = rank(models, criteria)?;
        debug!(
            model_id = %selection.model.id,
            score = selection.score,
            alternatives = selection.alternatives.len(),
            rejected = selection.rejected.len(),
            "Model selected"
        );
        Ok(selection)
    }

    /// Does this specific model accept a context of `context_size` tokens?
    pub async fn validate_model_for_context(
        &self,
        model_id: &ModelId,
        context_size: Option<u32>,
    ) -> Result<ContextValidation> {
        let model = self.registry.get_model(model_id).await?;
        Self::check_model(&model, &[], context_size)?;

        let used = context_size.unwrap_or(0);
        Ok(ContextValidation {
            remaining_tokens: model.context_window.saturating_sub(used),
            estimated_cost: used as f64 * model.cost_per_prompt_token,
            context_size,
            model,
        })
    }

    /// Check one model against capability and context requirements
    pub fn check_model(
        model: &Model,
        required: &[ModelCapability],
        context_size: Option<u32>,
    ) -> Result<()> {
        if !model.is_active {
            return Err(MachineError::inactive("Model", &model.id));
        }
        let missing = model.missing_capabilities(required);
        if !missing.is_empty() {
            return Err(MachineError::NoEligibleModel(format!(
                "model {} lacks capabilities: {}",
                model.id,
                join(&missing)
            )));
        }
        if let Some(required) = context_size {
            if !model.fits_context(required) {
                return Err(MachineError::ContextWindowExceeded {
                    model_id: model.id.to_string(),
                    required,
                    available: model.context_window,
                });
            }
        }
        Ok(())
    }
}

/// Filter and rank `models` against `criteria`
pub fn rank(mut models: Vec<Model>, criteria: &SelectionCriteria) -> Result<ModelSelection> {
    models.sort_by(|a, b| a.id.cmp(&b.id));

    let mut rejected = Vec::new();
    let mut context_rejected: Vec<&Model> = Vec::new();
    let mut survivors: Vec<&Model> = Vec::new();

    for model in &models {
        if !model.is_active {
            rejected.push(RejectedModel {
                model_id: model.id.clone(),
                reason: RejectionReason::Inactive,
            });
            continue;
        }
        let missing = model.missing_capabilities(&criteria.required_capabilities);
        if !missing.is_empty() {
            rejected.push(RejectedModel {
                model_id: model.id.clone(),
                reason: RejectionReason::MissingCapabilities { missing },
            });
            continue;
        }
        if let Some(required) = criteria.context_size {
            if !model.fits_context(required) {
                rejected.push(RejectedModel {
                    model_id: model.id.clone(),
                    reason: RejectionReason::ContextWindowExceeded {
                        required,
                        available: model.context_window,
                    },
                });
                context_rejected.push(model);
                continue;
            }
        }
        survivors.push(model);
    }

    if survivors.is_empty() {
        if let (Some(required), Some(largest)) = (
            criteria.context_size,
            context_rejected.iter().max_by_key(|m| m.context_window),
        ) {
            return Err(MachineError::ContextWindowExceeded {
                model_id: largest.id.to_string(),
                required,
                available: largest.context_window,
            });
        }
        return Err(MachineError::NoEligibleModel(format!(
            "no active model offers [{}]",
            join(&criteria.required_capabilities)
        )));
    }

    let rates: Vec<f64> = survivors.iter().map(|m| m.blended_cost_per_token()).collect();
    let min_rate = rates.iter().copied().fold(f64::INFINITY, f64::min);
    let max_rate = rates.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let spread = max_rate - min_rate;
    let s = criteria.cost_sensitivity;

    let mut scored: Vec<(f64, &Model)> = survivors
        .iter()
        .map(|model| {
            let cheapness = if spread <= f64::EPSILON {
                1.0
            } else {
                (max_rate - model.blended_cost_per_token()) / spread
            };
            let breadth = model.capability_breadth() as f64 / ModelCapability::ALL.len() as f64;
            let provider_match = match criteria.preferred_provider {
                Some(p) if model.provider == p => 1.0,
                _ => 0.0,
            };
            let score =
                s * cheapness + (1.0 - s) * (BREADTH_WEIGHT * breadth + PROVIDER_WEIGHT * provider_match);
            (score, *model)
        })
        .collect();

    scored.sort_by(|(sa, a), (sb, b)| sb.total_cmp(sa).then_with(|| a.id.cmp(&b.id)));

    let (best_score, best) = scored[0];
    let alternatives = scored[1..]
        .iter()
        .map(|(score, model)| RankedModel {
            reason_not_selected: reason_not_selected(model, best, criteria),
            model: (*model).clone(),
            score: *score,
        })
        .collect();

    let estimated_tokens = criteria.context_size.unwrap_or(DEFAULT_ESTIMATE_TOKENS);
    let estimated_cost = estimated_tokens as f64 * best.blended_cost_per_token();

    let reasoning = format!(
        "Selected {} ({}) with score {:.3} out of {} eligible model(s){}; cost sensitivity {:.2}",
        best.name,
        best.id,
        best_score,
        scored.len(),
        criteria
            .task_type
            .map(|t| format!(" for a {} task", t))
            .unwrap_or_default(),
        s
    );

    Ok(ModelSelection {
        model: best.clone(),
        score: best_score,
        alternatives,
        rejected,
        estimated_tokens,
        estimated_cost,
        reasoning,
    })
}

fn reason_not_selected(model: &Model, best: &Model, criteria: &SelectionCriteria) -> String {
    if model.blended_cost_per_token() > best.blended_cost_per_token() {
        "Higher cost".to_string()
    } else if model.capability_breadth() < best.capability_breadth() {
        "Fewer capabilities".to_string()
    } else if matches!(criteria.preferred_provider, Some(p) if best.provider == p && model.provider != p)
    {
        "Not the preferred provider".to_string()
    } else {
        "Lower overall score".to_string()
    }
}

fn join(capabilities: &[ModelCapability]) -> String {
    capabilities
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ModelCreate;

    fn model(
        id: &str,
        provider: ModelProvider,
        capabilities: &[ModelCapability],
        context_window: u32,
        rates: (f64, f64),
    ) -> Model {
        Model::from_create(
            ModelId::from(id),
            ModelCreate {
                name: id.to_string(),
                provider,
                provider_model_id: id.to_string(),
                capabilities: capabilities.to_vec(),
                context_window,
                cost_per_prompt_token: rates.0,
                cost_per_completion_token: rates.1,
                max_tokens: Some(4096),
                description: None,
                metadata: None,
            },
        )
    }

    fn catalog() -> Vec<Model> {
        use ModelCapability::*;
        vec![
            model(
                "gpt-4o",
                ModelProvider::OpenAI,
                &[Text, Code, Reasoning, Planning, Vision],
                128000,
                (0.00001, 0.00003),
            ),
            model(
                "gpt-4o-mini",
                ModelProvider::OpenAI,
                &[Text, Code, Reasoning, Planning],
                128000,
                (0.000005, 0.000015),
            ),
            model(
                "claude-3-opus",
                ModelProvider::Anthropic,
                &[Text, Code, Reasoning, Planning, Vision],
                200000,
                (0.000015, 0.000075),
            ),
        ]
    }

    #[test]
    fn test_cost_sensitive_picks_cheapest() {
        let criteria = SelectionCriteria::new(vec![ModelCapability::Code]).with_cost_sensitivity(1.0);
        let selection = rank(catalog(), &criteria).unwrap();
        assert_eq!(selection.model.id.as_str(), "gpt-4o-mini");
        assert_eq!(selection.alternatives.len(), 2);
        assert!(selection
            .alternatives
            .iter()
            .all(|a| a.reason_not_selected == "Higher cost"));
        assert_eq!(selection.estimated_tokens, 1000);
        assert!((selection.estimated_cost - 1000.0 * 0.00001).abs() < 1e-12);
    }

    #[test]
    fn test_capability_weighted_prefers_breadth_and_provider() {
        let criteria = SelectionCriteria::new(vec![ModelCapability::Text])
            .with_cost_sensitivity(0.0)
            .with_preferred_provider(ModelProvider::Anthropic);
        let selection = rank(catalog(), &criteria).unwrap();
        assert_eq!(selection.model.id.as_str(), "claude-3-opus");

        let gpt_4o = selection
            .alternatives
            .iter()
            .find(|a| a.model.id.as_str() == "gpt-4o")
            .unwrap();
        assert_eq!(gpt_4o.reason_not_selected, "Not the preferred provider");
    }

    #[test]
    fn test_equal_scores_break_ties_by_id() {
        let criteria = SelectionCriteria::new(vec![ModelCapability::Vision]).with_cost_sensitivity(0.0);
        let selection = rank(catalog(), &criteria).unwrap();
        // gpt-4o and claude-3-opus have the same breadth and no provider preference
        assert_eq!(selection.model.id.as_str(), "claude-3-opus");
        assert_eq!(selection.alternatives[0].model.id.as_str(), "gpt-4o");
        assert_eq!(selection.alternatives[0].reason_not_selected, "Lower overall score");
    }

    #[test]
    fn test_selection_is_deterministic() {
        let criteria = SelectionCriteria::new(vec![ModelCapability::Reasoning])
            .with_context_size(50000)
            .with_cost_sensitivity(0.5);

        let mut shuffled = catalog();
        shuffled.reverse();

        let first = rank(catalog(), &criteria).unwrap();
        let second = rank(shuffled, &criteria).unwrap();
        assert_eq!(first.model.id, second.model.id);
        let order = |s: &ModelSelection| {
            s.alternatives.iter().map(|a| a.model.id.clone()).collect::<Vec<_>>()
        };
        assert_eq!(order(&first), order(&second));
    }

    #[test]
    fn test_missing_capability_is_no_eligible_model() {
        let criteria = SelectionCriteria::new(vec![ModelCapability::Audio]);
        let err = rank(catalog(), &criteria).unwrap_err();
        assert!(matches!(err, MachineError::NoEligibleModel(_)));
        assert!(err.to_string().contains("audio"));
    }

    #[test]
    fn test_context_is_a_hard_filter() {
        let criteria = SelectionCriteria::new(vec![ModelCapability::Text]).with_context_size(150000);
        let selection = rank(catalog(), &criteria).unwrap();
        assert_eq!(selection.model.id.as_str(), "claude-3-opus");
        assert!(selection.alternatives.is_empty());
        assert_eq!(
            selection
                .rejected
                .iter()
                .filter(|r| matches!(r.reason, RejectionReason::ContextWindowExceeded { .. }))
                .count(),
            2
        );

        let too_big = SelectionCriteria::new(vec![ModelCapability::Text]).with_context_size(500000);
        assert!(matches!(
            rank(catalog(), &too_big),
            Err(MachineError::ContextWindowExceeded { required: 500000, available: 200000, .. })
        ));
    }

    #[test]
    fn test_inactive_models_are_rejected() {
        let mut models = catalog();
        for m in models.iter_mut() {
            m.is_active = false;
        }
        let err = rank(models, &SelectionCriteria::default()).unwrap_err();
        assert!(matches!(err, MachineError::NoEligibleModel(_)));
    }

    #[test]
    fn test_check_model() {
        let gpt = &catalog()[0];
        assert!(ModelSelector::check_model(gpt, &[ModelCapability::Code], Some(1000)).is_ok());
        assert!(matches!(
            ModelSelector::check_model(gpt, &[ModelCapability::Audio], None),
            Err(MachineError::NoEligibleModel(_))
        ));
        assert!(matches!(
            ModelSelector::check_model(gpt, &[], Some(128001)),
            Err(MachineError::ContextWindowExceeded { .. })
        ));

        let mut inactive = gpt.clone();
        inactive.is_active = false;
        assert!(matches!(
            ModelSelector::check_model(&inactive, &[], None),
            Err(MachineError::InactiveEntity { .. })
        ));

        assert!(SelectionCriteria::default().with_cost_sensitivity(1.5).validate().is_err());
    }
}
