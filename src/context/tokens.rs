//! Token counting with a probed strategy chain.
//!
//! Counting never fails: a native provider API is preferred when supplied
//! and verified, BPE encodings approximate otherwise, and a chars-per-token
//! heuristic absorbs every failure path. Claude-family models use a
//! proprietary tokenizer, so the BPE counts are approximations suitable for
//! budget planning rather than exact billing.

use std::fmt;
use std::sync::{Arc, OnceLock};

use serde::Serialize;
use tiktoken_rs::tokenizer::{Tokenizer, get_tokenizer};
use tiktoken_rs::{CoreBPE, cl100k_base, o200k_base, p50k_base};
use tracing::{debug, warn};

use crate::config::{TokenEncoding, TokenizerConfig};
use crate::error::Result;
use crate::message::{CONTEXT_INJECTION_MARKER, ModelRequest, Role};

static CL100K: OnceLock<Option<CoreBPE>> = OnceLock::new();
static O200K: OnceLock<Option<CoreBPE>> = OnceLock::new();
static P50K: OnceLock<Option<CoreBPE>> = OnceLock::new();

fn get_cl100k() -> Option<&'static CoreBPE> {
    CL100K.get_or_init(|| cl100k_base().ok()).as_ref()
}

fn get_o200k() -> Option<&'static CoreBPE> {
    O200K.get_or_init(|| o200k_base().ok()).as_ref()
}

fn get_p50k() -> Option<&'static CoreBPE> {
    P50K.get_or_init(|| p50k_base().ok()).as_ref()
}

/// A provider-native token counting API supplied by the caller.
pub trait NativeTokenCounter: Send + Sync {
    fn count(&self, text: &str) -> Result<usize>;
}

#[derive(Clone)]
enum CountStrategy {
    Native(Arc<dyn NativeTokenCounter>),
    Encoding(&'static CoreBPE),
    Heuristic,
}

impl CountStrategy {
    fn name(&self) -> &'static str {
        match self {
            Self::Native(_) => "native",
            Self::Encoding(_) => "encoding",
            Self::Heuristic => "heuristic",
        }
    }
}

impl fmt::Debug for CountStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-request token accounting, split by prompt component.
///
/// The current user message is counted inside `conversation_history` and
/// reported again under `user_message`; `total` sums the four components.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RequestTokenBreakdown {
    pub system_instruction: usize,
    pub tools: usize,
    pub user_message: usize,
    pub conversation_history: usize,
    pub total: usize,
}

/// Counts tokens in text via the strategy selected at construction.
#[derive(Debug, Clone)]
pub struct TokenCounter {
    strategy: CountStrategy,
    chars_per_token: usize,
}

impl Default for TokenCounter {
    fn default() -> Self {
        Self::with_config(&TokenizerConfig::default())
    }
}

impl TokenCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a counter using the configured encoding, probing it before
    /// acceptance. A failed probe degrades to the heuristic.
    pub fn with_config(config: &TokenizerConfig) -> Self {
        let encoder = match config.encoding {
            TokenEncoding::Cl100kBase => get_cl100k(),
            TokenEncoding::O200kBase => get_o200k(),
            TokenEncoding::P50kBase => get_p50k(),
            TokenEncoding::Heuristic => None,
        };
        let strategy = match encoder {
            Some(bpe) if probe_encoder(bpe) => CountStrategy::Encoding(bpe),
            Some(_) => {
                warn!("token encoder failed probe, using heuristic counting");
                CountStrategy::Heuristic
            }
            None => CountStrategy::Heuristic,
        };
        debug!(strategy = strategy.name(), "token counter ready");
        Self {
            strategy,
            chars_per_token: config.heuristic_chars_per_token.max(1),
        }
    }

    /// Build a counter for a specific model: model-specific encoding table
    /// first, universal cl100k on lookup failure.
    pub fn for_model(model: &str, config: &TokenizerConfig) -> Self {
        let encoder = match get_tokenizer(model) {
            Some(Tokenizer::O200kBase) => get_o200k(),
            Some(Tokenizer::Cl100kBase) => get_cl100k(),
            Some(_) => get_p50k(),
            None => {
                debug!(model, "no encoding table for model, using cl100k_base");
                get_cl100k()
            }
        }
        .or_else(get_cl100k);
        let strategy = match encoder {
            Some(bpe) if probe_encoder(bpe) => CountStrategy::Encoding(bpe),
            _ => CountStrategy::Heuristic,
        };
        Self {
            strategy,
            chars_per_token: config.heuristic_chars_per_token.max(1),
        }
    }

    /// Build a counter backed by a provider-native API. The API is accepted
    /// only when a probe call succeeds with a positive count; otherwise the
    /// configured encoding chain applies.
    pub fn with_native(api: Arc<dyn NativeTokenCounter>, config: &TokenizerConfig) -> Self {
        match api.count("probe") {
            Ok(count) if count > 0 => {
                debug!("native token counting API verified");
                Self {
                    strategy: CountStrategy::Native(api),
                    chars_per_token: config.heuristic_chars_per_token.max(1),
                }
            }
            Ok(_) => {
                warn!("native token API returned a non-positive probe count, falling back");
                Self::with_config(config)
            }
            Err(error) => {
                warn!(%error, "native token API probe failed, falling back");
                Self::with_config(config)
            }
        }
    }

    /// A counter that only uses the chars-per-token heuristic. Deterministic
    /// and table-free.
    pub fn heuristic() -> Self {
        Self {
            strategy: CountStrategy::Heuristic,
            chars_per_token: TokenizerConfig::default().heuristic_chars_per_token,
        }
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    /// Count tokens in `text`. Total: never fails, empty input yields 0,
    /// and any runtime counting error degrades to the character heuristic.
    pub fn count_tokens(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        match &self.strategy {
            CountStrategy::Native(api) => match api.count(text) {
                Ok(count) => count,
                Err(error) => {
                    debug!(%error, "native count failed, using heuristic");
                    self.heuristic_count(text)
                }
            },
            CountStrategy::Encoding(bpe) => bpe.encode_with_special_tokens(text).len(),
            CountStrategy::Heuristic => self.heuristic_count(text),
        }
    }

    /// Token cost of one message: the sum over its text-bearing content.
    pub fn count_message(&self, message: &crate::message::Message) -> usize {
        message
            .text_bearing_content()
            .map(|text| self.count_tokens(text))
            .sum()
    }

    /// Per-component token accounting for an outgoing request.
    pub fn count_request(&self, request: &ModelRequest) -> RequestTokenBreakdown {
        let system_instruction = request
            .system_instruction
            .as_deref()
            .map(|text| self.count_tokens(text))
            .unwrap_or(0);

        // Tool schemas are counted via their JSON serialization; a schema
        // that fails to serialize counts as zero rather than failing.
        let tools = request
            .tools
            .iter()
            .map(|tool| {
                serde_json::to_string(tool)
                    .map(|json| self.count_tokens(&json))
                    .unwrap_or(0)
            })
            .sum();

        let conversation_history = request
            .contents
            .iter()
            .map(|message| self.count_message(message))
            .sum();

        let user_message = request
            .contents
            .iter()
            .rev()
            .find(|message| {
                message.role == Role::User
                    && !message.extracted_text().starts_with(CONTEXT_INJECTION_MARKER)
            })
            .map(|message| self.count_message(message))
            .unwrap_or(0);

        let total = system_instruction + tools + user_message + conversation_history;
        RequestTokenBreakdown {
            system_instruction,
            tools,
            user_message,
            conversation_history,
            total,
        }
    }

    fn heuristic_count(&self, text: &str) -> usize {
        text.len() / self.chars_per_token
    }
}

fn probe_encoder(bpe: &CoreBPE) -> bool {
    !bpe.encode_with_special_tokens("probe").is_empty()
}
