//! Message data model for outgoing LLM requests.
//!
//! Messages are immutable once created: the context engine only reads,
//! copies, or summarizes them, and writes back a replacement sequence.
//! A message's position in the ingested conversation is its stable identity
//! (`MessageId`), threaded through scoring, filtering and assembly so that
//! duplicate-content messages are never conflated.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Literal prefix marking a system-authored context injection disguised as
/// a user turn.
pub const CONTEXT_INJECTION_MARKER: &str = "SYSTEM CONTEXT (JSON):";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
            Self::Tool => write!(f, "tool"),
        }
    }
}

/// One structured part of a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Part {
    Text {
        text: String,
    },
    ToolCall {
        name: String,
        arguments: serde_json::Value,
    },
    ToolResponse {
        name: String,
        output: String,
        is_error: bool,
    },
}

/// Stable, opaque message identity: the index at which the message was
/// ingested. Survives scoring, filtering and assembly unchanged.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct MessageId(pub usize);

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "msg-{}", self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parts: Vec<Part>,
    /// Creation time, when the caller tracks it. Used for recency scoring;
    /// absent timestamps are treated as current.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl Message {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: Some(text.into()),
            parts: Vec::new(),
            timestamp: None,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }

    /// A tool-role message carrying one tool response part.
    pub fn tool_result(name: impl Into<String>, output: impl Into<String>, is_error: bool) -> Self {
        Self {
            role: Role::Tool,
            text: None,
            parts: vec![Part::ToolResponse {
                name: name.into(),
                output: output.into(),
                is_error,
            }],
            timestamp: None,
        }
    }

    pub fn with_part(mut self, part: Part) -> Self {
        self.parts.push(part);
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn has_tool_call(&self) -> bool {
        self.parts.iter().any(|p| matches!(p, Part::ToolCall { .. }))
    }

    pub fn has_tool_response(&self) -> bool {
        self.parts
            .iter()
            .any(|p| matches!(p, Part::ToolResponse { .. }))
    }

    /// Count of tool interactions (calls and responses) this message carries.
    pub fn tool_part_count(&self) -> usize {
        self.parts
            .iter()
            .filter(|p| matches!(p, Part::ToolCall { .. } | Part::ToolResponse { .. }))
            .count()
    }

    /// The message's conversational text: the `text` payload joined with all
    /// `Text` parts. Tool payloads are excluded.
    pub fn extracted_text(&self) -> String {
        let mut pieces: Vec<&str> = Vec::new();
        if let Some(text) = self.text.as_deref() {
            if !text.is_empty() {
                pieces.push(text);
            }
        }
        for part in &self.parts {
            if let Part::Text { text } = part {
                if !text.is_empty() {
                    pieces.push(text);
                }
            }
        }
        pieces.join("\n")
    }

    /// All text-bearing content for token accounting: the `text` payload,
    /// `Text` parts, and tool response outputs.
    pub fn text_bearing_content(&self) -> impl Iterator<Item = &str> {
        self.text
            .as_deref()
            .into_iter()
            .chain(self.parts.iter().filter_map(|p| match p {
                Part::Text { text } => Some(text.as_str()),
                Part::ToolResponse { output, .. } => Some(output.as_str()),
                Part::ToolCall { .. } => None,
            }))
    }

    /// Whether this message is a context injection rather than an actual
    /// user utterance.
    pub fn is_context_injection(&self) -> bool {
        self.extracted_text().starts_with(CONTEXT_INJECTION_MARKER)
    }
}

/// Declared schema for one tool offered to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

impl ToolSchema {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// An outgoing model request. The engine reads `system_instruction`, `tools`
/// and `contents`, and on completion replaces `contents` with the optimized
/// sequence.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolSchema>,
    #[serde(default)]
    pub contents: Vec<Message>,
}

impl ModelRequest {
    pub fn new(contents: Vec<Message>) -> Self {
        Self {
            system_instruction: None,
            tools: Vec::new(),
            contents,
        }
    }

    pub fn with_system_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = Some(instruction.into());
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolSchema>) -> Self {
        self.tools = tools;
        self
    }
}
