use serde::{Deserialize, Serialize};

use crate::error::{ContextError, Result};

/// Top-level configuration for one context optimization pipeline.
///
/// Every component owns its own section; separate pipeline instances never
/// share configuration state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Maximum context window of the target model, in tokens.
    pub max_context_tokens: usize,
    /// How the pipeline reduces an over-budget conversation.
    pub mode: OptimizationMode,
    /// In `Auto` mode, overflows beyond this multiple of the available
    /// budget switch from whole-message filtering to tiered assembly.
    pub assembly_pressure_ratio: f32,
    pub tokenizer: TokenizerConfig,
    pub prioritizer: PrioritizerConfig,
    pub assembler: AssemblerConfig,
    pub filter: FilterPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_context_tokens: 200_000,
            mode: OptimizationMode::Auto,
            assembly_pressure_ratio: 2.0,
            tokenizer: TokenizerConfig::default(),
            prioritizer: PrioritizerConfig::default(),
            assembler: AssemblerConfig::default(),
            filter: FilterPolicy::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        self.validate()?;
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validate configuration values for consistency and safety.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.max_context_tokens == 0 {
            errors.push("max_context_tokens must be greater than 0".to_string());
        }
        if self.assembly_pressure_ratio < 1.0 {
            errors.push("assembly_pressure_ratio must be at least 1.0".to_string());
        }
        if self.tokenizer.heuristic_chars_per_token == 0 {
            errors.push("tokenizer.heuristic_chars_per_token must be greater than 0".to_string());
        }

        // Prioritizer validation
        let p = &self.prioritizer;
        for (name, weight) in [
            ("relevance_weight", p.relevance_weight),
            ("recency_weight", p.recency_weight),
            ("tool_activity_weight", p.tool_activity_weight),
            ("error_priority_weight", p.error_priority_weight),
        ] {
            if !(0.0..=1.0).contains(&weight) {
                errors.push(format!("prioritizer.{name} must be between 0.0 and 1.0"));
            }
        }
        if p.recency_decay_factor <= 0.0 {
            errors.push("prioritizer.recency_decay_factor must be positive".to_string());
        }
        if p.max_recency_hours <= 0.0 {
            errors.push("prioritizer.max_recency_hours must be positive".to_string());
        }

        // Assembler validation
        let a = &self.assembler;
        let tier_sum = a.critical_pct + a.high_pct + a.medium_pct + a.low_pct + a.minimal_pct;
        if tier_sum > 1.0 + 1e-4 {
            errors.push(format!(
                "assembler tier percentages must not exceed 1.0 (sum is {tier_sum:.3})"
            ));
        }
        if !(0.0..1.0).contains(&a.emergency_reserve_pct) {
            errors.push("assembler.emergency_reserve_pct must be in [0.0, 1.0)".to_string());
        }
        if !(0.0..=1.0).contains(&a.emergency_threshold) {
            errors.push("assembler.emergency_threshold must be between 0.0 and 1.0".to_string());
        }
        if a.max_assembly_items == 0 {
            errors.push("assembler.max_assembly_items must be greater than 0".to_string());
        }

        // Filter validation
        let f = &self.filter;
        if f.min_conversations_to_keep == 0 {
            errors.push("filter.min_conversations_to_keep must be greater than 0".to_string());
        }
        if f.min_conversations_to_keep > f.max_conversations_to_keep {
            errors.push(
                "filter.min_conversations_to_keep must not exceed max_conversations_to_keep"
                    .to_string(),
            );
        }
        if !(0.0..=1.0).contains(&f.target_reduction_pct) {
            errors.push("filter.target_reduction_pct must be between 0.0 and 1.0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ContextError::Config(errors.join("; ")))
        }
    }
}

/// How the pipeline reduces an over-budget conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationMode {
    /// Filter for mild overflows, assemble under heavy pressure.
    #[default]
    Auto,
    /// Always drop whole messages/segments.
    Filter,
    /// Always run tiered budget assembly.
    Assemble,
}

/// Token counting strategy selection.
///
/// Claude-family models use a proprietary tokenizer; these OpenAI-based
/// encodings are approximations suitable for budget planning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TokenEncoding {
    #[default]
    Cl100kBase,
    O200kBase,
    P50kBase,
    Heuristic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenizerConfig {
    pub encoding: TokenEncoding,
    /// Chars per token for the heuristic fallback.
    pub heuristic_chars_per_token: usize,
}

impl Default for TokenizerConfig {
    fn default() -> Self {
        Self {
            encoding: TokenEncoding::Cl100kBase,
            heuristic_chars_per_token: 4,
        }
    }
}

/// Weights and decay parameters for composite content scoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrioritizerConfig {
    pub relevance_weight: f32,
    pub recency_weight: f32,
    pub tool_activity_weight: f32,
    pub error_priority_weight: f32,
    /// Exponential decay rate per hour of message age.
    pub recency_decay_factor: f32,
    /// Age cap; older messages all receive the floor recency score.
    pub max_recency_hours: f32,
}

impl Default for PrioritizerConfig {
    fn default() -> Self {
        Self {
            relevance_weight: 0.3,
            recency_weight: 0.25,
            tool_activity_weight: 0.25,
            error_priority_weight: 0.2,
            recency_decay_factor: 0.1,
            max_recency_hours: 24.0,
        }
    }
}

/// Budget percentages and limits for tiered context assembly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssemblerConfig {
    pub critical_pct: f32,
    pub high_pct: f32,
    pub medium_pct: f32,
    pub low_pct: f32,
    pub minimal_pct: f32,
    /// Fraction of the total budget held back as an emergency reserve.
    pub emergency_reserve_pct: f32,
    /// Floor for the critical tier: guaranteed even on small budgets.
    pub min_critical_tokens: usize,
    /// Budget utilization above which emergency mode is reported.
    pub emergency_threshold: f32,
    pub allow_partial_inclusion: bool,
    /// Minimum leftover tier budget worth attempting a partial inclusion.
    pub min_partial_budget: usize,
    /// Cap on items processed per assembly pass.
    pub max_assembly_items: usize,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            critical_pct: 0.40,
            high_pct: 0.25,
            medium_pct: 0.20,
            low_pct: 0.10,
            minimal_pct: 0.05,
            emergency_reserve_pct: 0.05,
            min_critical_tokens: 500,
            emergency_threshold: 0.90,
            allow_partial_inclusion: true,
            min_partial_budget: 100,
            max_assembly_items: 1000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FilterStrategy {
    Conservative,
    #[default]
    Moderate,
    Aggressive,
}

impl std::fmt::Display for FilterStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Conservative => write!(f, "conservative"),
            Self::Moderate => write!(f, "moderate"),
            Self::Aggressive => write!(f, "aggressive"),
        }
    }
}

/// Policy for strategy-based conversation filtering.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterPolicy {
    pub strategy: FilterStrategy,
    pub preserve_system_messages: bool,
    pub preserve_context_injections: bool,
    pub preserve_tool_chains: bool,
    pub preserve_current_turn: bool,
    /// Extra ranking weight for segments containing tool errors.
    pub emphasize_error_preservation: bool,
    pub min_conversations_to_keep: usize,
    pub max_conversations_to_keep: usize,
    /// Reduction goal reported against in `FilterResult`.
    pub target_reduction_pct: f32,
}

impl Default for FilterPolicy {
    fn default() -> Self {
        Self {
            strategy: FilterStrategy::Moderate,
            preserve_system_messages: true,
            preserve_context_injections: true,
            preserve_tool_chains: true,
            preserve_current_turn: true,
            emphasize_error_preservation: false,
            min_conversations_to_keep: 2,
            max_conversations_to_keep: 10,
            target_reduction_pct: 0.3,
        }
    }
}
