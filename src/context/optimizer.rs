//! Pipeline wiring for one optimization pass.
//!
//! Per outgoing request: compute the available budget, analyze the
//! conversation, score its content, then either filter whole messages or
//! run tiered assembly, and substitute the reduced sequence back into the
//! request. Synchronous and allocation-only; the request's messages are
//! never mutated, only replaced.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::info;

use crate::config::{OptimizationMode, PipelineConfig};
use crate::message::{Message, MessageId, ModelRequest};
use crate::utils::truncate_chars;

use super::analyzer::{
    ConversationAnalysis, ConversationAnalyzer, MessageKind, message_reports_tool_error,
};
use super::assembler::{AssemblyResult, ContextAssembler};
use super::budget::{BudgetBreakdown, ContextBudgetManager};
use super::filter::{ConversationFilter, FilterResult};
use super::prioritizer::{ContentItem, ContentPrioritizer, ScoringContext};
use super::tokens::{NativeTokenCounter, TokenCounter};

/// Which reduction path an optimization pass took.
#[derive(Debug, Clone)]
pub enum OptimizationResult {
    /// The conversation already fit; the request was left untouched.
    Unchanged,
    Filtered(FilterResult),
    Assembled(AssemblyResult),
}

impl OptimizationResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unchanged => "unchanged",
            Self::Filtered(_) => "filtered",
            Self::Assembled(_) => "assembled",
        }
    }
}

/// Observability record for one pass.
#[derive(Debug, Clone)]
pub struct OptimizationOutcome {
    pub available_budget: usize,
    pub breakdown: BudgetBreakdown,
    pub result: OptimizationResult,
}

/// Facade owning one instance of every pipeline component. Separate
/// conversations should use separate optimizers; nothing is shared.
#[derive(Debug, Clone)]
pub struct ContextOptimizer {
    config: PipelineConfig,
    counter: TokenCounter,
    budget_manager: ContextBudgetManager,
    analyzer: ConversationAnalyzer,
    prioritizer: ContentPrioritizer,
    assembler: ContextAssembler,
    filter: ConversationFilter,
}

impl Default for ContextOptimizer {
    fn default() -> Self {
        Self::with_config(PipelineConfig::default())
    }
}

impl ContextOptimizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: PipelineConfig) -> Self {
        let counter = TokenCounter::with_config(&config.tokenizer);
        Self::build(config, counter)
    }

    /// Use a provider-native token counting API, probed before acceptance.
    pub fn with_native_counter(config: PipelineConfig, api: Arc<dyn NativeTokenCounter>) -> Self {
        let counter = TokenCounter::with_native(api, &config.tokenizer);
        Self::build(config, counter)
    }

    fn build(config: PipelineConfig, counter: TokenCounter) -> Self {
        let budget_manager = ContextBudgetManager::new(config.max_context_tokens);
        let assembler = ContextAssembler::with_config(counter.clone(), config.assembler.clone());
        let filter = ConversationFilter::with_counter(config.filter.clone(), counter.clone());
        let prioritizer = ContentPrioritizer::with_config(config.prioritizer.clone());
        Self {
            config,
            counter,
            budget_manager,
            analyzer: ConversationAnalyzer::new(),
            prioritizer,
            assembler,
            filter,
        }
    }

    pub fn counter(&self) -> &TokenCounter {
        &self.counter
    }

    /// Optimize `request.contents` in place and report what happened.
    pub fn optimize_request(
        &self,
        request: &mut ModelRequest,
        user_query: &str,
    ) -> OptimizationOutcome {
        let (available_budget, breakdown) = self
            .budget_manager
            .calculate_available_context_budget(request, &self.counter);

        if breakdown.conversation_history <= available_budget {
            info!(
                history = breakdown.conversation_history,
                available_budget, "Conversation within budget, request unchanged"
            );
            return OptimizationOutcome {
                available_budget,
                breakdown,
                result: OptimizationResult::Unchanged,
            };
        }

        let result = match self.select_path(available_budget, breakdown.conversation_history) {
            ReductionPath::Filter => {
                let filtered = self.filter.filter_conversation(&request.contents, available_budget);
                request.contents = filtered.filtered_messages.clone();
                OptimizationResult::Filtered(filtered)
            }
            ReductionPath::Assemble { emergency } => {
                let analysis = self
                    .analyzer
                    .analyze_conversation_structure(&request.contents);
                let items = self.build_content_items(&request.contents, &analysis);
                let context = ScoringContext::new(user_query);
                let items = self.prioritizer.prioritize_content_list(items, &context);
                let assembled = if emergency {
                    self.assembler.create_emergency_context(items, available_budget)
                } else {
                    self.assembler
                        .assemble_prioritized_context(items, available_budget)
                };
                request.contents = rebuild_contents(&request.contents, &assembled);
                OptimizationResult::Assembled(assembled)
            }
        };

        info!(
            path = result.as_str(),
            available_budget,
            messages = request.contents.len(),
            query = %truncate_chars(user_query, 80),
            "Context optimization pass complete"
        );

        OptimizationOutcome {
            available_budget,
            breakdown,
            result,
        }
    }

    fn select_path(&self, available_budget: usize, history_tokens: usize) -> ReductionPath {
        match self.config.mode {
            OptimizationMode::Filter => ReductionPath::Filter,
            OptimizationMode::Assemble => ReductionPath::Assemble {
                emergency: available_budget < self.config.assembler.min_critical_tokens,
            },
            OptimizationMode::Auto => {
                if available_budget < self.config.assembler.min_critical_tokens {
                    ReductionPath::Assemble { emergency: true }
                } else if history_tokens as f32
                    > available_budget as f32 * self.config.assembly_pressure_ratio
                {
                    ReductionPath::Assemble { emergency: false }
                } else {
                    ReductionPath::Filter
                }
            }
        }
    }

    /// Project every message into a scored item, carrying the structural
    /// flags the analysis established.
    fn build_content_items(
        &self,
        messages: &[Message],
        analysis: &ConversationAnalysis,
    ) -> Vec<ContentItem> {
        let current_turn: HashSet<usize> = analysis
            .current_user_message
            .map(|current| (current..messages.len()).collect())
            .unwrap_or_default();

        // Recent-error signal: the final segment contains a tool error.
        let last_segment = analysis.segments.last();
        let recent_errors = last_segment.is_some_and(|segment| {
            segment
                .message_indices
                .iter()
                .any(|&i| message_reports_tool_error(&messages[i]))
        });

        messages
            .iter()
            .enumerate()
            .map(|(index, message)| {
                let mut item = ContentItem::from_message(MessageId(index), message);
                item.is_system_message =
                    self.analyzer.classify_message(message) == MessageKind::System;
                item.is_current_turn = current_turn.contains(&index);
                item.in_incomplete_tool_chain = analysis
                    .current_tool_chains
                    .iter()
                    .any(|chain| chain.contains(index));
                if let Some(segment) = analysis.segments.iter().find(|s| s.contains(index)) {
                    item.message_count = segment.len();
                }
                item.has_recent_errors =
                    recent_errors && last_segment.is_some_and(|s| s.contains(index));
                item
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy)]
enum ReductionPath {
    Filter,
    Assemble { emergency: bool },
}

/// Map assembled items back to messages in original order. Partially
/// included items become fresh text-only copies; everything else is cloned
/// from its original position by stable id.
fn rebuild_contents(original: &[Message], assembled: &AssemblyResult) -> Vec<Message> {
    let mut selected: Vec<&ContentItem> = assembled.content.iter().collect();
    selected.sort_by_key(|item| item.id);

    selected
        .into_iter()
        .map(|item| {
            let source = &original[item.id.0];
            if item.partial {
                Message {
                    role: source.role,
                    text: Some(item.text.clone()),
                    parts: Vec::new(),
                    timestamp: source.timestamp,
                }
            } else {
                source.clone()
            }
        })
        .collect()
}
