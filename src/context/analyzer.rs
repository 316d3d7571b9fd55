//! Conversation structure analysis.
//!
//! Pure functions of the raw message sequence: per-message classification,
//! tool-chain extraction, and segmentation into logical conversations. The
//! derived records reference messages by their stable ingestion index and
//! never hold message copies.

use std::collections::HashMap;
use std::ops::RangeInclusive;

use serde::Serialize;
use tracing::debug;

use crate::message::{CONTEXT_INJECTION_MARKER, Message, Part, Role};

/// Substring marking system-authored text on a non-system role.
pub const SYSTEM_TEXT_INDICATOR: &str = "[SYSTEM]";

/// Substrings marking inlined tool output on a plain-text message.
pub const TOOL_RESULT_INDICATORS: &[&str] = &["Tool result:", "tool_result"];

/// Error keywords recognized in message text, most severe first.
pub const ERROR_INDICATORS: &[&str] = &[
    "critical",
    "exception",
    "error",
    "permission",
    "failure",
    "timeout",
    "not found",
    "warning",
];

/// Collect the error keywords present in `text` (case-insensitive).
pub fn detect_error_indicators(text: &str) -> Vec<&'static str> {
    let lower = text.to_lowercase();
    ERROR_INDICATORS
        .iter()
        .copied()
        .filter(|label| lower.contains(label))
        .collect()
}

/// Whether a message reports a tool error: an error-flagged tool response
/// part, or an error keyword in its text-bearing content.
pub fn message_reports_tool_error(message: &Message) -> bool {
    let flagged = message.parts.iter().any(|part| {
        matches!(
            part,
            Part::ToolResponse { is_error: true, .. }
        )
    });
    flagged
        || message
            .text_bearing_content()
            .any(|text| !detect_error_indicators(text).is_empty())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    ContextInjection,
    System,
    ToolResult,
    User,
    Assistant,
    Unknown,
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ContextInjection => write!(f, "context_injection"),
            Self::System => write!(f, "system"),
            Self::ToolResult => write!(f, "tool_result"),
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// One round of tool invocation: a user request, an assistant message
/// issuing tool calls, the tool outputs, and (when complete) the
/// assistant's follow-up reply. Indices are stable message ids.
#[derive(Debug, Clone, Serialize)]
pub struct ToolChain {
    pub start_index: usize,
    /// Position of the closing assistant reply; absent while the chain is
    /// still open.
    pub end_index: Option<usize>,
    pub user_message: usize,
    pub assistant_with_tools: usize,
    pub tool_results: Vec<usize>,
    pub final_response: Option<usize>,
    pub is_complete: bool,
    pub has_errors: bool,
}

impl ToolChain {
    /// Last message position consumed by this chain. For an open chain this
    /// is the last tool result, or the assistant that issued the calls when
    /// no results followed.
    pub fn last_index(&self) -> usize {
        self.end_index.unwrap_or_else(|| {
            self.tool_results
                .last()
                .copied()
                .unwrap_or(self.assistant_with_tools)
        })
    }

    pub fn span(&self) -> RangeInclusive<usize> {
        self.start_index..=self.last_index()
    }

    pub fn contains(&self, index: usize) -> bool {
        self.span().contains(&index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentType {
    Conversation,
    System,
    ContextInjection,
}

/// A logical slice of the conversation: one user turn and everything up to
/// the next. Segments partition the full index range with no gaps or
/// overlaps.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationSegment {
    pub start_index: usize,
    /// Inclusive.
    pub end_index: usize,
    pub message_indices: Vec<usize>,
    pub has_tool_activity: bool,
    pub user_query: Option<String>,
    pub segment_type: SegmentType,
}

impl ConversationSegment {
    pub fn len(&self) -> usize {
        self.message_indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.message_indices.is_empty()
    }

    pub fn contains(&self, index: usize) -> bool {
        (self.start_index..=self.end_index).contains(&index)
    }
}

/// Full structural analysis of one conversation.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationAnalysis {
    pub total_messages: usize,
    pub kind_counts: HashMap<MessageKind, usize>,
    pub tool_chains: Vec<ToolChain>,
    pub segments: Vec<ConversationSegment>,
    /// Chains still awaiting their closing assistant reply.
    pub current_tool_chains: Vec<ToolChain>,
    /// Segments holding actual back-and-forth conversation.
    pub completed_conversations: Vec<ConversationSegment>,
    /// Most recent user message that is not a context injection.
    pub current_user_message: Option<usize>,
    pub system_messages: Vec<usize>,
    pub context_injections: Vec<usize>,
}

/// Classifies messages, extracts tool chains, and partitions conversations.
/// Stateless; a single instance may serve any number of passes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConversationAnalyzer;

impl ConversationAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Classify one message. Precedence: injection marker, system signals,
    /// tool signals, then plain role.
    pub fn classify_message(&self, message: &Message) -> MessageKind {
        let text = message.extracted_text();

        if matches!(message.role, Role::User | Role::System)
            && text.contains(CONTEXT_INJECTION_MARKER)
        {
            return MessageKind::ContextInjection;
        }
        if message.role == Role::System || text.contains(SYSTEM_TEXT_INDICATOR) {
            return MessageKind::System;
        }
        if self.is_tool_result(message) || message.has_tool_call() {
            return MessageKind::ToolResult;
        }
        match message.role {
            Role::User => MessageKind::User,
            Role::Assistant => MessageKind::Assistant,
            _ => MessageKind::Unknown,
        }
    }

    /// Group message indices by classification, in conversation order.
    pub fn classify_message_types(
        &self,
        messages: &[Message],
    ) -> HashMap<MessageKind, Vec<usize>> {
        let mut by_kind: HashMap<MessageKind, Vec<usize>> = HashMap::new();
        for (index, message) in messages.iter().enumerate() {
            by_kind
                .entry(self.classify_message(message))
                .or_default()
                .push(index);
        }
        by_kind
    }

    /// Extract tool chains with a single left-to-right cursor scan matching
    /// `user -> assistant-with-tool-call -> (tool-result)* ->
    /// assistant-without-tool-call?`.
    ///
    /// A failed match advances the cursor by one position and re-attempts
    /// from scratch; an emitted chain advances past its span. The scan does
    /// not backtrack, so unusual interleavings may go unmatched.
    pub fn identify_tool_chains(&self, messages: &[Message]) -> Vec<ToolChain> {
        let mut chains = Vec::new();
        let mut cursor = 0;

        while cursor < messages.len() {
            if messages[cursor].role != Role::User {
                cursor += 1;
                continue;
            }
            let assistant_index = cursor + 1;
            let starts_chain = messages
                .get(assistant_index)
                .is_some_and(|m| m.role == Role::Assistant && m.has_tool_call());
            if !starts_chain {
                cursor += 1;
                continue;
            }

            let mut tool_results = Vec::new();
            let mut next = assistant_index + 1;
            while next < messages.len() && self.is_tool_result(&messages[next]) {
                tool_results.push(next);
                next += 1;
            }

            let closing = messages
                .get(next)
                .is_some_and(|m| m.role == Role::Assistant && !m.has_tool_call());
            let (final_response, end_index) = if closing {
                (Some(next), Some(next))
            } else {
                (None, None)
            };

            let has_errors = tool_results
                .iter()
                .any(|&index| message_reports_tool_error(&messages[index]));

            let chain = ToolChain {
                start_index: cursor,
                end_index,
                user_message: cursor,
                assistant_with_tools: assistant_index,
                tool_results,
                final_response,
                is_complete: closing,
                has_errors,
            };
            cursor = chain.last_index() + 1;
            chains.push(chain);
        }

        chains
    }

    /// Partition the conversation into segments. A new segment opens at
    /// every message classifying as a plain user turn; everything before the
    /// first such turn becomes standalone system/injection segments.
    pub fn segment_conversation(&self, messages: &[Message]) -> Vec<ConversationSegment> {
        let kinds: Vec<MessageKind> = messages.iter().map(|m| self.classify_message(m)).collect();
        let mut segments = Vec::new();
        let mut index = 0;

        while index < messages.len() && kinds[index] != MessageKind::User {
            let segment_type = if kinds[index] == MessageKind::ContextInjection {
                SegmentType::ContextInjection
            } else {
                SegmentType::System
            };
            segments.push(ConversationSegment {
                start_index: index,
                end_index: index,
                message_indices: vec![index],
                has_tool_activity: kinds[index] == MessageKind::ToolResult
                    || messages[index].has_tool_call(),
                user_query: None,
                segment_type,
            });
            index += 1;
        }

        while index < messages.len() {
            let start = index;
            let mut member_indices = vec![index];
            index += 1;
            while index < messages.len() && kinds[index] != MessageKind::User {
                member_indices.push(index);
                index += 1;
            }
            let has_tool_activity = member_indices.iter().any(|&i| {
                kinds[i] == MessageKind::ToolResult || messages[i].has_tool_call()
            });
            segments.push(ConversationSegment {
                start_index: start,
                end_index: *member_indices.last().expect("segment is never empty"),
                message_indices: member_indices,
                has_tool_activity,
                user_query: Some(messages[start].extracted_text()),
                segment_type: SegmentType::Conversation,
            });
        }

        segments
    }

    /// Bundle classification, chains and segments into one analysis record.
    pub fn analyze_conversation_structure(&self, messages: &[Message]) -> ConversationAnalysis {
        let by_kind = self.classify_message_types(messages);
        let tool_chains = self.identify_tool_chains(messages);
        let segments = self.segment_conversation(messages);

        let kind_counts = by_kind
            .iter()
            .map(|(kind, indices)| (*kind, indices.len()))
            .collect();

        let current_tool_chains: Vec<ToolChain> = tool_chains
            .iter()
            .filter(|chain| !chain.is_complete)
            .cloned()
            .collect();

        let completed_conversations: Vec<ConversationSegment> = segments
            .iter()
            .filter(|segment| segment.segment_type == SegmentType::Conversation)
            .cloned()
            .collect();

        // Classification already routes injected turns away from User, so
        // the newest User-classified index is the real current turn.
        let current_user_message = by_kind
            .get(&MessageKind::User)
            .and_then(|indices| indices.last().copied());

        let system_messages = by_kind.get(&MessageKind::System).cloned().unwrap_or_default();
        let context_injections = by_kind
            .get(&MessageKind::ContextInjection)
            .cloned()
            .unwrap_or_default();

        debug!(
            total = messages.len(),
            chains = tool_chains.len(),
            open_chains = current_tool_chains.len(),
            segments = segments.len(),
            "Conversation structure analyzed"
        );

        ConversationAnalysis {
            total_messages: messages.len(),
            kind_counts,
            tool_chains,
            segments,
            current_tool_chains,
            completed_conversations,
            current_user_message,
            system_messages,
            context_injections,
        }
    }

    /// Tool-output predicate used by chain collection: tool role, a tool
    /// response part, or inlined tool output in the text.
    fn is_tool_result(&self, message: &Message) -> bool {
        if message.role == Role::Tool || message.has_tool_response() {
            return true;
        }
        let text = message.extracted_text();
        TOOL_RESULT_INDICATORS
            .iter()
            .any(|indicator| text.contains(indicator))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;

    fn tool_call_message(text: &str) -> Message {
        Message::assistant(text).with_part(Part::ToolCall {
            name: "run_tests".to_string(),
            arguments: serde_json::json!({}),
        })
    }

    #[test]
    fn test_classification_precedence() {
        let analyzer = ConversationAnalyzer::new();
        let injected = Message::user(format!("{CONTEXT_INJECTION_MARKER} {{}}"));
        assert_eq!(
            analyzer.classify_message(&injected),
            MessageKind::ContextInjection
        );
        assert_eq!(
            analyzer.classify_message(&Message::system("be helpful")),
            MessageKind::System
        );
        assert_eq!(
            analyzer.classify_message(&Message::tool_result("t", "ok", false)),
            MessageKind::ToolResult
        );
        // An assistant turn issuing tool calls classifies as tool activity,
        // not as a plain assistant reply.
        assert_eq!(
            analyzer.classify_message(&tool_call_message("checking")),
            MessageKind::ToolResult
        );
        assert_eq!(
            analyzer.classify_message(&Message::user("hi")),
            MessageKind::User
        );
    }

    #[test]
    fn test_segments_partition_without_gaps() {
        let analyzer = ConversationAnalyzer::new();
        let messages = vec![
            Message::system("instructions"),
            Message::user("first question"),
            Message::assistant("first answer"),
            Message::user("second question"),
            Message::assistant("second answer"),
        ];
        let segments = analyzer.segment_conversation(&messages);
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0].segment_type, SegmentType::System);

        let mut covered: Vec<usize> = segments
            .iter()
            .flat_map(|s| s.message_indices.clone())
            .collect();
        covered.sort_unstable();
        assert_eq!(covered, (0..messages.len()).collect::<Vec<_>>());
    }

    #[test]
    fn test_current_user_message_skips_injections() {
        let analyzer = ConversationAnalyzer::new();
        let messages = vec![
            Message::user("real question"),
            Message::user(format!("{CONTEXT_INJECTION_MARKER} {{}}")),
        ];
        let analysis = analyzer.analyze_conversation_structure(&messages);
        assert_eq!(analysis.current_user_message, Some(0));
        assert_eq!(analysis.context_injections, vec![1]);
    }

    #[test]
    fn test_error_detection_in_tool_output() {
        assert!(message_reports_tool_error(&Message::tool_result(
            "t", "ok", true
        )));
        assert!(message_reports_tool_error(&Message::tool_result(
            "t",
            "Timeout while connecting",
            false
        )));
        assert!(!message_reports_tool_error(&Message::tool_result(
            "t", "all good", false
        )));
    }
}
