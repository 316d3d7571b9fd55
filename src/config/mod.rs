//! Configuration types for the context pipeline.
//!
//! Provides all configuration structures:
//! - `PipelineConfig`: Top-level configuration with validation
//! - Per-component configs: prioritizer weights, assembler budget
//!   percentages, filter policy, tokenizer selection

mod settings;

pub use settings::{
    AssemblerConfig, FilterPolicy, FilterStrategy, OptimizationMode, PipelineConfig,
    PrioritizerConfig, TokenEncoding, TokenizerConfig,
};
