//! Token-budget context management for LLM requests.
//!
//! Decides, for every outgoing model call, which slice of a potentially
//! huge conversation history is sent under a hard token ceiling while
//! preserving tool-call/response pairing, current-turn primacy, and
//! system-message presence. Every reduction path degrades gracefully: the
//! worst observable symptom of an internal failure is less-optimized
//! context, never a crashed request.
//!
//! The pipeline per call: [`context::ContextBudgetManager`] computes the
//! available budget, [`context::ConversationAnalyzer`] structures the
//! history, [`context::ContentPrioritizer`] scores each item, and either
//! [`context::ContextAssembler`] (tiered budget allocation) or
//! [`context::ConversationFilter`] (strategy-based segment dropping)
//! reduces the conversation to fit. [`context::ContextOptimizer`] wires the
//! whole flow for one request.

pub mod config;
pub mod context;
pub mod error;
pub mod message;
pub mod utils;

pub use config::{
    AssemblerConfig, FilterPolicy, FilterStrategy, OptimizationMode, PipelineConfig,
    PrioritizerConfig, TokenEncoding, TokenizerConfig,
};
pub use context::{
    AssemblyResult, AssemblyStrategy, BudgetAllocation, BudgetBreakdown, ContentItem,
    ContentPrioritizer, ContentPriority, ContextAssembler, ContextBudgetManager, ContextOptimizer,
    ConversationAnalysis, ConversationAnalyzer, ConversationFilter, ConversationSegment,
    FilterResult, MessageKind, NativeTokenCounter, OptimizationOutcome, OptimizationResult,
    RequestTokenBreakdown, ScoringContext, SegmentType, TokenCounter, ToolChain,
};
pub use error::{ContextError, Result};
pub use message::{
    CONTEXT_INJECTION_MARKER, Message, MessageId, ModelRequest, Part, Role, ToolSchema,
};
