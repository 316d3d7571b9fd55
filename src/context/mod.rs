//! Context assembly and conversation filtering for LLM requests.
//!
//! This module handles:
//! - Token counting with a probed strategy chain and heuristic fallback
//! - Available-budget computation per outgoing request
//! - Conversation structure analysis (classification, tool chains,
//!   segmentation)
//! - Composite content scoring and tiered budget assembly
//! - Strategy-based conversation filtering
//! - Pipeline wiring that substitutes the reduced sequence into the request

mod analyzer;
mod assembler;
mod budget;
mod filter;
mod optimizer;
mod prioritizer;
mod tokens;

pub use analyzer::{
    ConversationAnalysis, ConversationAnalyzer, ConversationSegment, ERROR_INDICATORS,
    MessageKind, SYSTEM_TEXT_INDICATOR, SegmentType, TOOL_RESULT_INDICATORS, ToolChain,
    detect_error_indicators, message_reports_tool_error,
};
pub use assembler::{
    AssemblyResult, AssemblyStrategy, BudgetAllocation, ContentPriority, ContextAssembler,
    PriorityLevelStats,
};
pub use budget::{BudgetBreakdown, ContextBudgetManager};
pub use filter::{ConversationFilter, FilterResult};
pub use optimizer::{ContextOptimizer, OptimizationOutcome, OptimizationResult};
pub use prioritizer::{ContentItem, ContentPrioritizer, ScoringContext};
pub use tokens::{NativeTokenCounter, RequestTokenBreakdown, TokenCounter};
