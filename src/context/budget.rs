//! Available-budget computation for one outgoing request.
//!
//! The optimizable budget is what remains of the model's context window
//! after the fixed overhead (system instruction, tool schemas, current user
//! message) and a safety margin that shrinks as headroom tightens.

use serde::Serialize;
use tracing::info;

use crate::message::ModelRequest;
use crate::utils::ratio_to_percent;

use super::tokens::TokenCounter;

/// Budget computation result, reported alongside the budget for
/// observability consumers.
#[derive(Debug, Clone, Serialize)]
pub struct BudgetBreakdown {
    pub system_instruction: usize,
    pub tools: usize,
    pub user_message: usize,
    pub conversation_history: usize,
    /// Fixed overhead: system instruction + tools + current user message.
    pub base_tokens: usize,
    pub safety_margin: usize,
    pub max_limit: usize,
    pub available_budget: usize,
    /// Fixed overhead as a percentage of the context limit.
    pub utilization_pct: f32,
}

impl BudgetBreakdown {
    pub fn summary(&self) -> String {
        format!(
            "Base: {}k/{}k ({:.1}%) | History: {}k | Margin: {} | Available: {}k",
            self.base_tokens / 1000,
            self.max_limit / 1000,
            self.utilization_pct,
            self.conversation_history / 1000,
            self.safety_margin,
            self.available_budget / 1000,
        )
    }
}

/// Computes the token budget available for optimizable context.
#[derive(Debug, Clone)]
pub struct ContextBudgetManager {
    max_limit: usize,
}

impl Default for ContextBudgetManager {
    fn default() -> Self {
        Self::new(200_000)
    }
}

impl ContextBudgetManager {
    pub fn new(max_limit: usize) -> Self {
        Self { max_limit }
    }

    pub fn max_limit(&self) -> usize {
        self.max_limit
    }

    /// Safety margin as a step function of remaining headroom: wide headroom
    /// reserves a larger fixed margin, tight headroom a smaller one so
    /// optimization still has room to operate.
    pub fn determine_safety_margin(&self, base_tokens: usize) -> usize {
        let remaining = self.max_limit.saturating_sub(base_tokens);
        match remaining {
            r if r > 100_000 => 2000,
            r if r > 50_000 => 1000,
            r if r > 10_000 => 500,
            r if r > 1_000 => 200,
            _ => 50,
        }
    }

    /// Compute the budget available for conversation history, clamped to
    /// zero when the fixed overhead plus margin exceeds the limit.
    pub fn calculate_available_context_budget(
        &self,
        request: &ModelRequest,
        counter: &TokenCounter,
    ) -> (usize, BudgetBreakdown) {
        let tokens = counter.count_request(request);
        let base_tokens = tokens.system_instruction + tokens.tools + tokens.user_message;
        let safety_margin = self.determine_safety_margin(base_tokens);
        let available_budget = self.max_limit.saturating_sub(base_tokens + safety_margin);

        let utilization_pct = if self.max_limit > 0 {
            ratio_to_percent(base_tokens as f32 / self.max_limit as f32)
        } else {
            0.0
        };

        let breakdown = BudgetBreakdown {
            system_instruction: tokens.system_instruction,
            tools: tokens.tools,
            user_message: tokens.user_message,
            conversation_history: tokens.conversation_history,
            base_tokens,
            safety_margin,
            max_limit: self.max_limit,
            available_budget,
            utilization_pct,
        };

        info!(
            base_tokens,
            safety_margin,
            available_budget,
            utilization_pct,
            "Context budget computed"
        );

        (available_budget, breakdown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;

    #[test]
    fn test_safety_margin_steps() {
        let manager = ContextBudgetManager::new(200_000);
        assert_eq!(manager.determine_safety_margin(0), 2000);
        assert_eq!(manager.determine_safety_margin(99_000), 2000);
        assert_eq!(manager.determine_safety_margin(120_000), 1000);
        assert_eq!(manager.determine_safety_margin(160_000), 500);
        assert_eq!(manager.determine_safety_margin(195_000), 200);
        assert_eq!(manager.determine_safety_margin(199_500), 50);
        assert_eq!(manager.determine_safety_margin(300_000), 50);
    }

    #[test]
    fn test_budget_never_negative() {
        let manager = ContextBudgetManager::new(10);
        let counter = TokenCounter::heuristic();
        let request = ModelRequest::new(vec![Message::user(
            "a very long user message that by itself exceeds the tiny limit",
        )]);
        let (budget, breakdown) = manager.calculate_available_context_budget(&request, &counter);
        assert_eq!(budget, 0);
        assert_eq!(breakdown.available_budget, 0);
    }

    #[test]
    fn test_budget_subtracts_base_and_margin() {
        let manager = ContextBudgetManager::new(200_000);
        let counter = TokenCounter::heuristic();
        // 400 chars -> 100 tokens of user message.
        let request = ModelRequest::new(vec![Message::user("x".repeat(400))]);
        let (budget, breakdown) = manager.calculate_available_context_budget(&request, &counter);
        assert_eq!(breakdown.base_tokens, 100);
        assert_eq!(breakdown.safety_margin, 2000);
        assert_eq!(budget, 200_000 - 100 - 2000);
        assert!(breakdown.summary().contains("Available"));
    }
}
