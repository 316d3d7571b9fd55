//! Composite content scoring.
//!
//! Each candidate item receives four sub-scores (content relevance against
//! the current query, recency decay, tool-activity density, error priority)
//! blended by configurable weights and topped with structural bonuses.
//! Scores live on a copyable projection of the message (`ContentItem`);
//! originals are never touched.

use std::cmp::Ordering;
use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::PrioritizerConfig;
use crate::message::{Message, MessageId, Role};

use super::analyzer::detect_error_indicators;

/// Severity per recognized error keyword; unrecognized labels score 0.4.
const ERROR_SEVERITY: &[(&str, f32)] = &[
    ("critical", 1.0),
    ("exception", 0.9),
    ("error", 0.8),
    ("permission", 0.8),
    ("failure", 0.7),
    ("timeout", 0.6),
    ("not found", 0.5),
    ("warning", 0.3),
];

const UNRECOGNIZED_SEVERITY: f32 = 0.4;

const CODE_FILE_EXTENSIONS: &[&str] = &[
    ".rs", ".py", ".js", ".ts", ".go", ".java", ".c", ".h", ".cpp", ".rb", ".toml", ".json",
    ".yaml", ".yml", ".md",
];

fn severity_for(label: &str) -> f32 {
    ERROR_SEVERITY
        .iter()
        .find(|(known, _)| *known == label)
        .map(|(_, severity)| *severity)
        .unwrap_or(UNRECOGNIZED_SEVERITY)
}

/// A query word that names code: dotted/underscored identifiers, file
/// extensions, or definition keywords.
fn looks_like_code_reference(word: &str) -> bool {
    word.contains('.')
        || word.contains('_')
        || CODE_FILE_EXTENSIONS.iter().any(|ext| word.ends_with(ext))
        || word == "def"
        || word == "class"
        || word.starts_with("function")
}

/// Scored projection of one message. Carries the stable id, the structural
/// flags assigned during analysis, and the score attached by
/// prioritization.
#[derive(Debug, Clone, Serialize)]
pub struct ContentItem {
    pub id: MessageId,
    pub role: Role,
    /// Text-bearing content, joined. Token costs are computed against this.
    pub text: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub is_system_message: bool,
    pub is_current_turn: bool,
    pub in_incomplete_tool_chain: bool,
    pub has_tool_call: bool,
    pub has_tool_response: bool,
    /// Tool interactions carried by this message.
    pub tool_count: usize,
    /// Messages in the item's segment, for activity-density scoring.
    pub message_count: usize,
    pub error_indicators: Vec<String>,
    pub has_recent_errors: bool,
    pub priority_score: f32,
    /// True when the text was truncated to fit a budget.
    pub partial: bool,
    pub original_length: Option<usize>,
}

impl ContentItem {
    /// Basic projection of a message; structural flags default to false and
    /// are assigned by the pipeline from its analysis.
    pub fn from_message(id: MessageId, message: &Message) -> Self {
        let text = message
            .text_bearing_content()
            .collect::<Vec<_>>()
            .join("\n");
        let mut error_indicators: Vec<String> = detect_error_indicators(&text)
            .into_iter()
            .map(str::to_string)
            .collect();
        let has_flagged_error = message.parts.iter().any(|part| {
            matches!(
                part,
                crate::message::Part::ToolResponse { is_error: true, .. }
            )
        });
        if has_flagged_error && error_indicators.is_empty() {
            error_indicators.push("error".to_string());
        }

        Self {
            id,
            role: message.role,
            text,
            timestamp: message.timestamp,
            is_system_message: false,
            is_current_turn: false,
            in_incomplete_tool_chain: false,
            has_tool_call: message.has_tool_call(),
            has_tool_response: message.has_tool_response(),
            tool_count: message.tool_part_count(),
            message_count: 1,
            error_indicators,
            has_recent_errors: false,
            priority_score: 0.0,
            partial: false,
            original_length: None,
        }
    }

    pub fn has_error_indicators(&self) -> bool {
        !self.error_indicators.is_empty()
    }

    pub fn error_count(&self) -> usize {
        self.error_indicators.len()
    }
}

/// Scoring anchor for one optimization pass.
#[derive(Debug, Clone)]
pub struct ScoringContext {
    pub user_query: String,
    pub now: DateTime<Utc>,
}

impl ScoringContext {
    pub fn new(user_query: impl Into<String>) -> Self {
        Self {
            user_query: user_query.into(),
            now: Utc::now(),
        }
    }
}

/// Computes composite relevance scores for content items.
#[derive(Debug, Clone, Default)]
pub struct ContentPrioritizer {
    config: PrioritizerConfig,
}

impl ContentPrioritizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: PrioritizerConfig) -> Self {
        Self { config }
    }

    pub fn update_config(&mut self, config: PrioritizerConfig) {
        self.config = config;
    }

    /// Defensive copy of the active configuration.
    pub fn config(&self) -> PrioritizerConfig {
        self.config.clone()
    }

    /// Word-overlap relevance of `content` against `user_query`, with a
    /// phrase bonus for literal query matches and a per-word bonus for code
    /// references the content mentions.
    pub fn calculate_relevance_score(&self, content: &str, user_query: &str) -> f32 {
        if content.is_empty() || user_query.is_empty() {
            return 0.0;
        }
        let content_lower = content.to_lowercase();
        let query_lower = user_query.to_lowercase();
        let query_words: HashSet<&str> = query_lower.split_whitespace().collect();
        if query_words.is_empty() {
            return 0.0;
        }
        let content_words: HashSet<&str> = content_lower.split_whitespace().collect();

        let overlap = query_words.intersection(&content_words).count();
        let mut score = overlap as f32 / query_words.len() as f32;

        if user_query.len() > 10 && content_lower.contains(&query_lower) {
            score += 0.3;
        }

        for word in &query_words {
            if looks_like_code_reference(word) && content_lower.contains(word) {
                score += 0.1;
            }
        }

        score.min(1.0)
    }

    /// Exponential decay over message age in hours, capped at
    /// `max_recency_hours`. The floor is the decayed value at the cap, never
    /// zero; missing timestamps score as current.
    pub fn calculate_recency_score(&self, timestamp: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f32 {
        let Some(timestamp) = timestamp else {
            return 1.0;
        };
        let age_secs = (now - timestamp).num_seconds().max(0) as f32;
        let age_hours = (age_secs / 3600.0).min(self.config.max_recency_hours);
        (-self.config.recency_decay_factor * age_hours).exp()
    }

    /// Tool-activity score: presence base, count bonus, density bonus,
    /// error penalty.
    pub fn calculate_tool_activity_score(&self, item: &ContentItem) -> f32 {
        let mut score = 0.0;
        if item.has_tool_call || item.has_tool_response {
            score += 0.4;
        }
        score += (item.tool_count as f32 * 0.1).min(0.3);
        let density = item.tool_count as f32 / item.message_count.max(1) as f32;
        score += (density * 0.5).min(0.3);
        score -= (item.error_count() as f32 * 0.05).min(0.2);
        score.clamp(0.0, 1.0)
    }

    /// Highest severity among the item's error indicators, with a bonus for
    /// recent errors.
    pub fn calculate_error_priority_score(&self, item: &ContentItem) -> f32 {
        if item.error_indicators.is_empty() {
            return 0.0;
        }
        let mut score = item
            .error_indicators
            .iter()
            .map(|label| severity_for(label))
            .fold(0.0, f32::max);
        if item.has_recent_errors {
            score += 0.2;
        }
        score.min(1.0)
    }

    /// Weighted blend of the four sub-scores plus structural bonuses,
    /// clamped to [0, 1].
    pub fn calculate_composite_score(&self, item: &ContentItem, context: &ScoringContext) -> f32 {
        let relevance = self.calculate_relevance_score(&item.text, &context.user_query);
        let recency = self.calculate_recency_score(item.timestamp, context.now);
        let tool_activity = self.calculate_tool_activity_score(item);
        let error_priority = self.calculate_error_priority_score(item);

        let mut score = relevance * self.config.relevance_weight
            + recency * self.config.recency_weight
            + tool_activity * self.config.tool_activity_weight
            + error_priority * self.config.error_priority_weight;

        if item.is_system_message {
            score += 0.1;
        }
        if item.is_current_turn {
            score += 0.2;
        }
        if item.in_incomplete_tool_chain {
            score += 0.15;
        }

        score.clamp(0.0, 1.0)
    }

    /// Attach composite scores and sort descending. The sort is stable, so
    /// ties keep their original order.
    pub fn prioritize_content_list(
        &self,
        mut items: Vec<ContentItem>,
        context: &ScoringContext,
    ) -> Vec<ContentItem> {
        for item in &mut items {
            item.priority_score = self.calculate_composite_score(item, context);
        }
        items.sort_by(|a, b| {
            b.priority_score
                .partial_cmp(&a.priority_score)
                .unwrap_or(Ordering::Equal)
        });
        items
    }
}
