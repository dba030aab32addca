// Copyright (c) 2025-2026 Koda Contributors
//
// SPDX-License-Identifier: Apache-2.0
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        };
        write!(f, "{s}")
    }
}

/// One tool invocation requested by the model.
///
/// `call_id` is an opaque identifier supplied by the provider.  It is
/// forwarded verbatim everywhere (events, rollout, approval table) and never
/// parsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRef {
    pub call_id: String,
    pub name: String,
    /// Parsed JSON argument object
    pub arguments: Value,
}

impl ToolCallRef {
    pub fn new(call_id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            call_id: call_id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// A single message in the conversation history.
///
/// `tool_calls` is present only on assistant messages that request tool
/// invocations; `tool_call_id` only on tool messages, where it references a
/// call id emitted by the preceding assistant message.  `metadata` is
/// flattened on (de)serialization so flag keys such as `summary`,
/// `recovery_prompt`, `compressed` and `compacted_at` sit at the top level
/// of the serialized object and unknown keys survive a round-trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallRef>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

impl Message {
    fn base(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
            tool_calls: None,
            tool_call_id: None,
            metadata: Map::new(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::base(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::base(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::base(Role::Assistant, content)
    }

    /// Assistant message that requests tool invocations.
    pub fn assistant_with_calls(content: impl Into<String>, calls: Vec<ToolCallRef>) -> Self {
        let mut m = Self::base(Role::Assistant, content);
        if !calls.is_empty() {
            m.tool_calls = Some(calls);
        }
        m
    }

    /// Tool-result message answering the call identified by `call_id`.
    pub fn tool(content: impl Into<String>, call_id: impl Into<String>) -> Self {
        let mut m = Self::base(Role::Tool, content);
        m.tool_call_id = Some(call_id.into());
        m
    }

    /// Builder-style metadata flag setter.
    pub fn with_meta(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    /// True when the metadata carries `key: true`.
    pub fn meta_flag(&self, key: &str) -> bool {
        self.metadata.get(key).and_then(Value::as_bool).unwrap_or(false)
    }
}

/// Token usage accumulated over a session.  `total_tokens` is monotonically
/// non-decreasing within a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_input_tokens: Option<u64>,
}

impl TokenUsage {
    pub fn add(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.total_tokens += other.total_tokens;
        if let Some(cached) = other.cached_input_tokens {
            *self.cached_input_tokens.get_or_insert(0) += cached;
        }
    }

    pub fn is_zero(&self) -> bool {
        self.total_tokens == 0
    }
}

/// A tool schema provided to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema of the parameters object
    pub parameters: Value,
}

/// Normalized chat-completion response, independent of the wire protocol.
#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCallRef>,
    pub token_usage: TokenUsage,
    pub finish_reason: String,
    /// Reasoning text exposed by some providers alongside the answer
    pub reasoning_content: Option<String>,
}

/// A single streamed event from the model.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// A text chunk of the assistant response
    TextDelta(String),
    /// A reasoning chunk (providers that expose reasoning content)
    ReasoningDelta(String),
    /// A fragment of a tool call.  Providers interleave fragments for
    /// parallel tool calls by `index`; id/name arrive once, arguments
    /// accumulate across fragments.
    ToolCallDelta {
        index: u32,
        call_id: String,
        name: String,
        arguments: String,
    },
    /// Final usage statistics
    Usage(TokenUsage),
    /// The stream finished normally
    Done,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
