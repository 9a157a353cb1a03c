//! Cost accounting
//!
//! Cost of one invocation is
//! `prompt_tokens × cost_per_prompt_token + completion_tokens × cost_per_completion_token`
//! using the rates of the model that served it. [`CostTracker`] keeps a
//! per-day ledger of that spend and enforces the daily limit.

use chrono::{NaiveDate, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::TokenUsage;
use crate::models::Model;
use crate::{MachineError, Result};

/// Cost breakdown structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub input_cost: f64,
    pub output_cost: f64,
    pub total_cost: f64,
    pub currency: String,
}

impl CostBreakdown {
    pub fn compute(model: &Model, usage: &TokenUsage) -> Self {
        let input_cost = usage.prompt_tokens as f64 * model.cost_per_prompt_token;
        let output_cost = usage.completion_tokens as f64 * model.cost_per_completion_token;
        Self {
            input_cost,
            output_cost,
            total_cost: input_cost + output_cost,
            currency: "USD".to_string(),
        }
    }
}

/// Rough token count: one token per four characters, rounded up
pub fn estimate_tokens(text: &str) -> u32 {
    let chars = text.chars().count();
    let tokens = (chars + 3) / 4;
    tokens.min(u32::MAX as usize) as u32
}

/// Daily spend ledger
pub struct CostTracker {
    daily_limit: Option<f64>,
    spend: DashMap<NaiveDate, f64>,
}

impl CostTracker {
    pub fn new(daily_limit: Option<f64>) -> Self {
        Self {
            daily_limit,
            spend: DashMap::new(),
        }
    }

    pub fn daily_limit(&self) -> Option<f64> {
        self.daily_limit
    }

    pub fn spent_today(&self) -> f64 {
        self.spent_on(Utc::now().date_naive())
    }

    pub fn spent_on(&self, day: NaiveDate) -> f64 {
        self.spend.get(&day).map(|v| *v).unwrap_or(0.0)
    }

    /// Refuse new work once today's spend has reached the limit
    pub fn check_budget(&self) -> Result<()> {
        if let Some(limit) = self.daily_limit {
            let spent = self.spent_today();
            if spent >= limit {
                warn!(spent, limit, "Daily cost limit reached");
                return Err(MachineError::QuotaExceeded(format!(
                    "daily cost limit of ${:.2} reached (spent ${:.4})",
                    limit, spent
                )));
            }
        }
        Ok(())
    }

    /// Add spend to today's total and return the new total
    pub fn record(&self, cost: f64) -> f64 {
        if !cost.is_finite() || cost <= 0.0 {
            return self.spent_today();
        }
        let mut entry = self.spend.entry(Utc::now().date_naive()).or_insert(0.0);
        *entry += cost;
        *entry
    }
}
