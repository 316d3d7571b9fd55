//! Budget-constrained context assembly.
//!
//! The target budget is split across five priority tiers, each filled
//! greedily from its own quota. Items that would overflow a tier may be
//! partially included by sentence-aware truncation; pathologically small
//! budgets degrade allocation granularity instead of failing.

use std::collections::HashMap;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::AssemblerConfig;
use crate::utils::truncate_at_sentence;

use super::prioritizer::ContentItem;
use super::tokens::TokenCounter;

/// Marker appended to partially included content.
const TRUNCATION_SUFFIX: &str = "... [truncated]";

/// Heuristic chars-per-token used to size truncation windows.
const TRUNCATION_CHARS_PER_TOKEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentPriority {
    Critical,
    High,
    Medium,
    Low,
    Minimal,
}

impl ContentPriority {
    /// All tiers, highest first. Assembly processes them in this order.
    pub const ALL: [Self; 5] = [
        Self::Critical,
        Self::High,
        Self::Medium,
        Self::Low,
        Self::Minimal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::Minimal => "minimal",
        }
    }
}

impl std::fmt::Display for ContentPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A total budget split into per-tier quotas plus an emergency reserve.
///
/// The sub-quota sum never exceeds the total; violating that at
/// construction is a programming error and panics.
#[derive(Debug, Clone, Serialize)]
pub struct BudgetAllocation {
    pub total_budget: usize,
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub minimal: usize,
    pub reserved_emergency: usize,
}

impl BudgetAllocation {
    pub fn new(
        total_budget: usize,
        critical: usize,
        high: usize,
        medium: usize,
        low: usize,
        minimal: usize,
        reserved_emergency: usize,
    ) -> Self {
        let allocated = critical + high + medium + low + minimal + reserved_emergency;
        assert!(
            allocated <= total_budget,
            "budget allocation exceeds total: {allocated} > {total_budget}"
        );
        Self {
            total_budget,
            critical,
            high,
            medium,
            low,
            minimal,
            reserved_emergency,
        }
    }

    pub fn for_tier(&self, tier: ContentPriority) -> usize {
        match tier {
            ContentPriority::Critical => self.critical,
            ContentPriority::High => self.high,
            ContentPriority::Medium => self.medium,
            ContentPriority::Low => self.low,
            ContentPriority::Minimal => self.minimal,
        }
    }

    pub fn total_allocated(&self) -> usize {
        self.critical + self.high + self.medium + self.low + self.minimal + self.reserved_emergency
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AssemblyStrategy {
    Standard,
    Truncated,
    Emergency,
    Empty,
}

impl AssemblyStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Truncated => "truncated",
            Self::Emergency => "emergency",
            Self::Empty => "empty",
        }
    }
}

impl std::fmt::Display for AssemblyStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PriorityLevelStats {
    pub items: usize,
    pub tokens: usize,
    pub dropped: usize,
}

/// Output of one assembly pass. Constructed once, consumed by the caller,
/// then discarded.
#[derive(Debug, Clone, Serialize)]
pub struct AssemblyResult {
    pub content: Vec<ContentItem>,
    pub total_tokens_used: usize,
    pub budget_utilization: f32,
    pub priority_breakdown: HashMap<ContentPriority, PriorityLevelStats>,
    pub assembly_strategy: AssemblyStrategy,
    pub emergency_mode_used: bool,
    pub truncation_applied: bool,
    pub preserved_critical_content: bool,
}

impl AssemblyResult {
    pub fn summary(&self) -> String {
        format!(
            "Assembled {} items | {} tokens ({:.1}% of budget) | strategy: {}",
            self.content.len(),
            self.total_tokens_used,
            self.budget_utilization * 100.0,
            self.assembly_strategy,
        )
    }
}

/// Assembles prioritized content under a hard token budget.
#[derive(Debug, Clone)]
pub struct ContextAssembler {
    config: AssemblerConfig,
    counter: TokenCounter,
}

impl ContextAssembler {
    pub fn new(counter: TokenCounter) -> Self {
        Self::with_config(counter, AssemblerConfig::default())
    }

    pub fn with_config(counter: TokenCounter, config: AssemblerConfig) -> Self {
        Self { config, counter }
    }

    pub fn update_config(&mut self, config: AssemblerConfig) {
        self.config = config;
    }

    /// Defensive copy of the active configuration.
    pub fn config(&self) -> AssemblerConfig {
        self.config.clone()
    }

    /// Split `total_budget` into tier quotas. The critical tier is floored
    /// at `min_critical_tokens` (capped at what exists); when the floor
    /// squeezes the other tiers they shrink proportionally, and when
    /// nothing sensible remains the leftover splits evenly as a last
    /// resort. Degrades granularity, never panics on valid input.
    pub fn calculate_budget_allocation(&self, total_budget: usize) -> BudgetAllocation {
        let c = &self.config;
        let reserved = (total_budget as f32 * c.emergency_reserve_pct) as usize;
        let remainder = total_budget.saturating_sub(reserved);

        let critical = ((remainder as f32 * c.critical_pct) as usize)
            .max(c.min_critical_tokens)
            .min(remainder);
        let mut high = (remainder as f32 * c.high_pct) as usize;
        let mut medium = (remainder as f32 * c.medium_pct) as usize;
        let mut low = (remainder as f32 * c.low_pct) as usize;
        let mut minimal = (remainder as f32 * c.minimal_pct) as usize;

        let others = high + medium + low + minimal;
        let available = remainder - critical;
        if others > available {
            if others > 0 && available > 0 {
                let ratio = available as f32 / others as f32;
                high = (high as f32 * ratio) as usize;
                medium = (medium as f32 * ratio) as usize;
                low = (low as f32 * ratio) as usize;
                minimal = (minimal as f32 * ratio) as usize;
            } else {
                high = 0;
                medium = 0;
                low = 0;
                minimal = 0;
            }
            if high + medium + low + minimal == 0 && available >= 4 {
                let each = available / 4;
                high = each;
                medium = each;
                low = each;
                minimal = each;
            }
        }

        BudgetAllocation::new(total_budget, critical, high, medium, low, minimal, reserved)
    }

    /// Tier classification. Structural signals outrank the composite score:
    /// a borderline-scored system message still lands critical. Kept
    /// deliberately separate from composite scoring.
    pub fn classify_content_priority(&self, item: &ContentItem) -> ContentPriority {
        if item.is_system_message
            || item.is_current_turn
            || item.in_incomplete_tool_chain
            || item.priority_score >= 0.9
        {
            ContentPriority::Critical
        } else if item.has_error_indicators()
            || item.has_recent_errors
            || (item.tool_count > 0 && item.priority_score >= 0.7)
        {
            ContentPriority::High
        } else if item.tool_count > 0 || item.priority_score >= 0.5 {
            ContentPriority::Medium
        } else if item.priority_score >= 0.2 {
            ContentPriority::Low
        } else {
            ContentPriority::Minimal
        }
    }

    /// Greedy fill of one tier. Items are taken in descending score order
    /// while they fit; the first item that does not fit may be partially
    /// included, after which the tier stops; later, smaller items are
    /// dropped rather than reordered.
    fn assemble_priority_level(
        &self,
        mut items: Vec<ContentItem>,
        budget: usize,
        tier: ContentPriority,
    ) -> (Vec<ContentItem>, usize, usize) {
        items.sort_by(|a, b| {
            b.priority_score
                .partial_cmp(&a.priority_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let total_count = items.len();
        let mut selected = Vec::new();
        let mut tokens_used = 0;
        let mut dropped = 0;

        for (position, item) in items.into_iter().enumerate() {
            let cost = self.counter.count_tokens(&item.text);
            if tokens_used + cost <= budget {
                tokens_used += cost;
                selected.push(item);
                continue;
            }

            let remaining = budget - tokens_used;
            let mut included_partial = false;
            if self.config.allow_partial_inclusion && remaining >= self.config.min_partial_budget {
                if let Some(partial) = self.try_partial_inclusion(&item, remaining, cost) {
                    let partial_cost = self.counter.count_tokens(&partial.text);
                    if partial_cost <= remaining {
                        tokens_used += partial_cost;
                        selected.push(partial);
                        included_partial = true;
                    }
                }
            }

            dropped = total_count - position - usize::from(included_partial);
            debug!(
                tier = %tier,
                dropped,
                included_partial,
                "Tier budget exhausted"
            );
            break;
        }

        (selected, tokens_used, dropped)
    }

    /// Partial inclusion: refused for system and current-turn messages
    /// (all-or-nothing), and only worthwhile when the full item costs at
    /// least twice the remaining budget.
    fn try_partial_inclusion(
        &self,
        item: &ContentItem,
        remaining_budget: usize,
        full_cost: usize,
    ) -> Option<ContentItem> {
        if item.is_system_message || item.is_current_turn {
            return None;
        }
        if full_cost < remaining_budget * 2 {
            return None;
        }

        let target_chars = remaining_budget * TRUNCATION_CHARS_PER_TOKEN;
        if item.text.len() <= target_chars {
            return None;
        }
        let cut = truncate_at_sentence(&item.text, target_chars);
        if cut.is_empty() {
            return None;
        }

        let mut partial = item.clone();
        partial.original_length = Some(item.text.len());
        partial.text = format!("{cut}{TRUNCATION_SUFFIX}");
        partial.partial = true;
        Some(partial)
    }

    /// Assemble items against `target_budget`, processing tiers from
    /// critical to minimal with their own quotas.
    pub fn assemble_prioritized_context(
        &self,
        mut items: Vec<ContentItem>,
        target_budget: usize,
    ) -> AssemblyResult {
        if items.len() > self.config.max_assembly_items {
            items.sort_by(|a, b| {
                b.priority_score
                    .partial_cmp(&a.priority_score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            let overflow = items.len() - self.config.max_assembly_items;
            items.truncate(self.config.max_assembly_items);
            warn!(
                overflow,
                cap = self.config.max_assembly_items,
                "Assembly item cap reached, processing the highest-priority prefix"
            );
        }

        let mut buckets: HashMap<ContentPriority, Vec<ContentItem>> = HashMap::new();
        for item in items {
            let tier = self.classify_content_priority(&item);
            buckets.entry(tier).or_default().push(item);
        }

        let allocation = self.calculate_budget_allocation(target_budget);
        let mut content = Vec::new();
        let mut total_tokens_used = 0;
        let mut any_dropped = false;
        let mut any_partial = false;
        let mut priority_breakdown = HashMap::new();

        for tier in ContentPriority::ALL {
            let bucket = buckets.remove(&tier).unwrap_or_default();
            if bucket.is_empty() {
                priority_breakdown.insert(tier, PriorityLevelStats::default());
                continue;
            }
            let (selected, tokens, dropped) =
                self.assemble_priority_level(bucket, allocation.for_tier(tier), tier);
            any_partial |= selected.iter().any(|item| item.partial);
            any_dropped |= dropped > 0;
            priority_breakdown.insert(
                tier,
                PriorityLevelStats {
                    items: selected.len(),
                    tokens,
                    dropped,
                },
            );
            total_tokens_used += tokens;
            content.extend(selected);
        }

        let budget_utilization = if target_budget > 0 {
            total_tokens_used as f32 / target_budget as f32
        } else {
            0.0
        };
        let emergency_mode_used = budget_utilization > self.config.emergency_threshold;
        let truncation_applied = any_dropped || any_partial;
        let preserved_critical_content = content.iter().any(|item| {
            item.is_system_message || item.is_current_turn || item.in_incomplete_tool_chain
        });

        let assembly_strategy = if content.is_empty() {
            AssemblyStrategy::Empty
        } else if emergency_mode_used {
            AssemblyStrategy::Emergency
        } else if truncation_applied {
            AssemblyStrategy::Truncated
        } else {
            AssemblyStrategy::Standard
        };

        info!(
            items = content.len(),
            total_tokens_used,
            budget_utilization,
            strategy = assembly_strategy.as_str(),
            "Context assembly complete"
        );

        AssemblyResult {
            content,
            total_tokens_used,
            budget_utilization,
            priority_breakdown,
            assembly_strategy,
            emergency_mode_used,
            truncation_applied,
            preserved_critical_content,
        }
    }

    /// Degraded path for tiny budgets: skip tiered allocation and keep only
    /// critical-flagged or top-scored items against the whole budget.
    pub fn create_emergency_context(
        &self,
        items: Vec<ContentItem>,
        budget: usize,
    ) -> AssemblyResult {
        let mut critical: Vec<ContentItem> = items
            .iter()
            .filter(|item| {
                item.is_system_message || item.is_current_turn || item.priority_score >= 0.9
            })
            .cloned()
            .collect();

        if critical.is_empty() {
            let mut sorted = items;
            sorted.sort_by(|a, b| {
                b.priority_score
                    .partial_cmp(&a.priority_score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            sorted.truncate(3);
            critical = sorted;
        }

        warn!(
            candidates = critical.len(),
            budget, "Emergency context assembly"
        );

        let (content, tokens_used, dropped) =
            self.assemble_priority_level(critical, budget, ContentPriority::Critical);

        let preserved_critical_content = content.iter().any(|item| {
            item.is_system_message || item.is_current_turn || item.in_incomplete_tool_chain
        });

        let mut priority_breakdown = HashMap::new();
        priority_breakdown.insert(
            ContentPriority::Critical,
            PriorityLevelStats {
                items: content.len(),
                tokens: tokens_used,
                dropped,
            },
        );

        AssemblyResult {
            total_tokens_used: tokens_used,
            budget_utilization: if budget > 0 {
                tokens_used as f32 / budget as f32
            } else {
                0.0
            },
            content,
            priority_breakdown,
            assembly_strategy: AssemblyStrategy::Emergency,
            emergency_mode_used: true,
            truncation_applied: true,
            preserved_critical_content,
        }
    }
}
