//! Strategy-based conversation filtering.
//!
//! Reduces an over-budget conversation by dropping whole messages and
//! segments, honoring a must-preserve set (system messages, context
//! injections, tool-chain spans, the current turn). Removal is tracked by
//! stable message index, so duplicate-content messages are never confused.

use std::collections::BTreeSet;

use serde::Serialize;
use tracing::{debug, info};

use crate::config::{FilterPolicy, FilterStrategy};
use crate::message::Message;

use super::analyzer::{
    ConversationAnalysis, ConversationAnalyzer, ConversationSegment, message_reports_tool_error,
};
use super::tokens::TokenCounter;

/// Output of one filtering pass. Constructed once, consumed by the caller,
/// then discarded.
#[derive(Debug, Clone, Serialize)]
pub struct FilterResult {
    /// Kept messages in original order, cloned from their original
    /// positions.
    pub filtered_messages: Vec<Message>,
    pub kept_indices: Vec<usize>,
    pub removed_indices: Vec<usize>,
    pub original_message_count: usize,
    /// Token statistics; absent when no counter is attached.
    pub original_tokens: Option<usize>,
    pub filtered_tokens: Option<usize>,
    pub tokens_saved: Option<usize>,
    /// Tool chains whose full span survived filtering.
    pub preserved_tool_chains: usize,
    pub preserved_context_injections: usize,
    pub strategy_used: FilterStrategy,
    pub filtering_applied: bool,
}

impl FilterResult {
    /// Fraction of messages removed.
    pub fn reduction_ratio(&self) -> f32 {
        if self.original_message_count == 0 {
            return 0.0;
        }
        self.removed_indices.len() as f32 / self.original_message_count as f32
    }

    /// Whether the pass hit the policy's reduction goal.
    pub fn met_reduction_target(&self, target_pct: f32) -> bool {
        self.reduction_ratio() >= target_pct
    }

    pub fn summary(&self) -> String {
        format!(
            "Filtered {} -> {} messages ({} removed) | strategy: {}",
            self.original_message_count,
            self.filtered_messages.len(),
            self.removed_indices.len(),
            self.strategy_used,
        )
    }
}

/// Drops whole messages/segments to fit a conversation under budget.
#[derive(Debug, Clone)]
pub struct ConversationFilter {
    analyzer: ConversationAnalyzer,
    counter: Option<TokenCounter>,
    policy: FilterPolicy,
}

impl ConversationFilter {
    pub fn new(policy: FilterPolicy) -> Self {
        Self {
            analyzer: ConversationAnalyzer::new(),
            counter: None,
            policy,
        }
    }

    /// Attach a token counter, enabling the fits-already fast path and
    /// budget-driven reduction loops.
    pub fn with_counter(policy: FilterPolicy, counter: TokenCounter) -> Self {
        Self {
            analyzer: ConversationAnalyzer::new(),
            counter: Some(counter),
            policy,
        }
    }

    pub fn update_config(&mut self, policy: FilterPolicy) {
        self.policy = policy;
    }

    /// Defensive copy of the active policy.
    pub fn config(&self) -> FilterPolicy {
        self.policy.clone()
    }

    /// Filter `messages` down toward `target_budget` tokens using the
    /// configured strategy. A conversation already under budget is returned
    /// unchanged without any structural analysis.
    pub fn filter_conversation(&self, messages: &[Message], target_budget: usize) -> FilterResult {
        let original_count = messages.len();
        let original_tokens = self
            .counter
            .as_ref()
            .map(|counter| messages.iter().map(|m| counter.count_message(m)).sum::<usize>());

        if let Some(total) = original_tokens {
            if total <= target_budget {
                debug!(total, target_budget, "Conversation fits, no filtering");
                return FilterResult {
                    filtered_messages: messages.to_vec(),
                    kept_indices: (0..original_count).collect(),
                    removed_indices: Vec::new(),
                    original_message_count: original_count,
                    original_tokens: Some(total),
                    filtered_tokens: Some(total),
                    tokens_saved: Some(0),
                    preserved_tool_chains: 0,
                    preserved_context_injections: 0,
                    strategy_used: self.policy.strategy,
                    filtering_applied: false,
                };
            }
        }

        let analysis = self.analyzer.analyze_conversation_structure(messages);
        let must_preserve = self.must_preserve_indices(&analysis);
        let ranked = self.prioritize_segments(messages, &analysis);

        let kept = match self.policy.strategy {
            FilterStrategy::Conservative => {
                self.apply_conservative(&analysis, &ranked, &must_preserve)
            }
            FilterStrategy::Moderate => {
                self.apply_moderate(messages, &analysis, &ranked, &must_preserve, target_budget)
            }
            FilterStrategy::Aggressive => {
                self.apply_aggressive(messages, &analysis, &ranked, &must_preserve, target_budget)
            }
        };

        let kept_indices: Vec<usize> = kept.iter().copied().collect();
        let removed_indices: Vec<usize> =
            (0..original_count).filter(|i| !kept.contains(i)).collect();
        let filtered_messages: Vec<Message> =
            kept_indices.iter().map(|&i| messages[i].clone()).collect();

        let filtered_tokens = self.counter.as_ref().map(|counter| {
            kept_indices
                .iter()
                .map(|&i| counter.count_message(&messages[i]))
                .sum::<usize>()
        });
        let tokens_saved = match (original_tokens, filtered_tokens) {
            (Some(original), Some(filtered)) => Some(original.saturating_sub(filtered)),
            _ => None,
        };

        let preserved_tool_chains = analysis
            .tool_chains
            .iter()
            .filter(|chain| chain.span().all(|i| kept.contains(&i)))
            .count();
        let preserved_context_injections = analysis
            .context_injections
            .iter()
            .filter(|i| kept.contains(i))
            .count();

        info!(
            original = original_count,
            kept = kept_indices.len(),
            removed = removed_indices.len(),
            strategy = %self.policy.strategy,
            "Conversation filtered"
        );

        FilterResult {
            filtered_messages,
            kept_indices,
            removed_indices: removed_indices.clone(),
            original_message_count: original_count,
            original_tokens,
            filtered_tokens,
            tokens_saved,
            preserved_tool_chains,
            preserved_context_injections,
            strategy_used: self.policy.strategy,
            filtering_applied: !removed_indices.is_empty(),
        }
    }

    /// Indices that no strategy may remove, each class gated by its policy
    /// flag.
    fn must_preserve_indices(&self, analysis: &ConversationAnalysis) -> BTreeSet<usize> {
        let mut preserve = BTreeSet::new();
        if self.policy.preserve_system_messages {
            preserve.extend(analysis.system_messages.iter().copied());
        }
        if self.policy.preserve_context_injections {
            preserve.extend(analysis.context_injections.iter().copied());
        }
        if self.policy.preserve_tool_chains {
            for chain in &analysis.tool_chains {
                preserve.extend(chain.span());
            }
        }
        if self.policy.preserve_current_turn {
            if let Some(current) = analysis.current_user_message {
                preserve.extend(current..analysis.total_messages);
            }
        }
        preserve
    }

    /// Rank segments best-first. Recency, tool activity, errors, length and
    /// containing the current turn all raise a segment's priority.
    fn prioritize_segments(
        &self,
        messages: &[Message],
        analysis: &ConversationAnalysis,
    ) -> Vec<(usize, f32)> {
        let total = analysis.segments.len();
        let mut ranked: Vec<(usize, f32)> = analysis
            .segments
            .iter()
            .enumerate()
            .map(|(position, segment)| {
                (
                    position,
                    self.segment_priority(segment, position, total, messages, analysis),
                )
            })
            .collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        ranked
    }

    fn segment_priority(
        &self,
        segment: &ConversationSegment,
        position_from_oldest: usize,
        segment_count: usize,
        messages: &[Message],
        analysis: &ConversationAnalysis,
    ) -> f32 {
        let mut score = (position_from_oldest + 1) as f32 / segment_count.max(1) as f32 * 100.0;

        if segment.has_tool_activity {
            score += 50.0;
        }
        let has_error = segment
            .message_indices
            .iter()
            .any(|&i| message_reports_tool_error(&messages[i]));
        if has_error {
            score += 25.0;
            if self.policy.emphasize_error_preservation {
                score += 20.0;
            }
        }
        score += (segment.len() as f32 / 10.0).min(1.0) * 10.0;
        if analysis
            .current_user_message
            .is_some_and(|current| segment.contains(current))
        {
            score += 75.0;
        }
        score
    }

    /// Keep all but the two lowest-priority segments. Never fits to tokens.
    fn apply_conservative(
        &self,
        analysis: &ConversationAnalysis,
        ranked: &[(usize, f32)],
        must_preserve: &BTreeSet<usize>,
    ) -> BTreeSet<usize> {
        let keep_count = ranked
            .len()
            .saturating_sub(2)
            .max(self.policy.min_conversations_to_keep);
        self.collect_kept(
            analysis,
            ranked.iter().take(keep_count).map(|(i, _)| *i),
            must_preserve,
        )
    }

    /// Keep half the allowed maximum, then shed whole unprotected segments
    /// until the budget fits. The minimum-segment floor is absolute.
    fn apply_moderate(
        &self,
        messages: &[Message],
        analysis: &ConversationAnalysis,
        ranked: &[(usize, f32)],
        must_preserve: &BTreeSet<usize>,
        target_budget: usize,
    ) -> BTreeSet<usize> {
        let start_count = (self.policy.max_conversations_to_keep / 2)
            .max(self.policy.min_conversations_to_keep);
        let mut kept_segments: Vec<usize> =
            ranked.iter().take(start_count).map(|(i, _)| *i).collect();

        let Some(counter) = self.counter.as_ref() else {
            return self.collect_kept(analysis, kept_segments.into_iter(), must_preserve);
        };

        loop {
            let kept = self.collect_kept(
                analysis,
                kept_segments.iter().copied(),
                must_preserve,
            );
            let total: usize = kept.iter().map(|&i| counter.count_message(&messages[i])).sum();
            if total <= target_budget || kept_segments.len() <= self.policy.min_conversations_to_keep
            {
                return kept;
            }

            // Lowest-priority kept segment that holds nothing protected.
            let droppable = ranked
                .iter()
                .rev()
                .map(|(i, _)| *i)
                .find(|segment_index| {
                    kept_segments.contains(segment_index)
                        && analysis.segments[*segment_index]
                            .message_indices
                            .iter()
                            .all(|i| !must_preserve.contains(i))
                });
            match droppable {
                Some(segment_index) => kept_segments.retain(|&i| i != segment_index),
                None => return kept,
            }
        }
    }

    /// Keep only the minimum segments, then remove individual unprotected
    /// messages from the middle of the remaining range, preserving head and
    /// tail for continuity.
    fn apply_aggressive(
        &self,
        messages: &[Message],
        analysis: &ConversationAnalysis,
        ranked: &[(usize, f32)],
        must_preserve: &BTreeSet<usize>,
        target_budget: usize,
    ) -> BTreeSet<usize> {
        let mut kept = self.collect_kept(
            analysis,
            ranked
                .iter()
                .take(self.policy.min_conversations_to_keep)
                .map(|(i, _)| *i),
            must_preserve,
        );

        let Some(counter) = self.counter.as_ref() else {
            return kept;
        };

        loop {
            let total: usize = kept.iter().map(|&i| counter.count_message(&messages[i])).sum();
            if total <= target_budget || kept.len() <= 2 {
                return kept;
            }

            let ordered: Vec<usize> = kept.iter().copied().collect();
            let head = ordered[0];
            let tail = *ordered.last().expect("kept is non-empty");
            let middle = (head + tail) / 2;
            let removable = ordered[1..ordered.len() - 1]
                .iter()
                .copied()
                .filter(|i| !must_preserve.contains(i))
                .min_by_key(|i| i.abs_diff(middle));
            match removable {
                Some(index) => {
                    kept.remove(&index);
                }
                None => return kept,
            }
        }
    }

    fn collect_kept(
        &self,
        analysis: &ConversationAnalysis,
        segment_indices: impl Iterator<Item = usize>,
        must_preserve: &BTreeSet<usize>,
    ) -> BTreeSet<usize> {
        let mut kept: BTreeSet<usize> = must_preserve.clone();
        for segment_index in segment_indices {
            kept.extend(analysis.segments[segment_index].message_indices.iter().copied());
        }
        kept
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Part;

    fn tool_call(text: &str) -> Message {
        Message::assistant(text).with_part(Part::ToolCall {
            name: "shell".to_string(),
            arguments: serde_json::json!({"cmd": "cargo check"}),
        })
    }

    fn sample_conversation() -> Vec<Message> {
        vec![
            Message::system("You are a careful coding assistant with many rules to follow."),
            Message::user("Tell me about the repository layout in detail please."),
            Message::assistant("It is a single crate with modules for parsing and output."),
            Message::user("Now explain the error handling conventions used throughout."),
            Message::assistant("Errors are propagated with explicit result types everywhere."),
            Message::user("Run the test suite and report what happens."),
            tool_call("Running the tests now."),
            Message::tool_result("shell", "test result: ok. 42 passed; 0 failed", false),
        ]
    }

    #[test]
    fn test_no_op_when_under_budget() {
        let filter = ConversationFilter::with_counter(
            FilterPolicy::default(),
            TokenCounter::heuristic(),
        );
        let messages = sample_conversation();
        let result = filter.filter_conversation(&messages, 1_000_000);
        assert!(!result.filtering_applied);
        assert_eq!(result.filtered_messages.len(), messages.len());
        assert_eq!(result.tokens_saved, Some(0));
    }

    #[test]
    fn test_conservative_never_counts_tokens() {
        let mut policy = FilterPolicy::default();
        policy.strategy = FilterStrategy::Conservative;
        policy.min_conversations_to_keep = 1;
        let filter = ConversationFilter::new(policy);
        let result = filter.filter_conversation(&sample_conversation(), 10);
        assert!(result.original_tokens.is_none());
        // Two lowest-priority segments go; protected indices stay.
        assert!(result.filtered_messages.len() < 8);
    }

    #[test]
    fn test_must_preserve_system_survives_aggressive() {
        let mut policy = FilterPolicy::default();
        policy.strategy = FilterStrategy::Aggressive;
        policy.min_conversations_to_keep = 1;
        let filter = ConversationFilter::with_counter(policy, TokenCounter::heuristic());
        let result = filter.filter_conversation(&sample_conversation(), 50);
        assert!(result.kept_indices.contains(&0), "system message dropped");
    }
}
