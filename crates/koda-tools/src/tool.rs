// Copyright (c) 2025-2026 Koda Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::{Map, Value};

use koda_config::SandboxPolicy;

/// Execution context forwarded to a tool unchanged.
///
/// The sandbox policy is advisory: tools decide what the level means for
/// them; the engine enforces nothing.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub session_id: String,
    /// Submission id of the user input driving this execution
    pub message_id: String,
    pub agent: String,
    pub call_id: Option<String>,
    pub cwd: PathBuf,
    pub sandbox_policy: SandboxPolicy,
}

/// Whether a tool only inspects state or can change it.  Combined with the
/// session approval policy to decide when a human must confirm a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolSafety {
    ReadOnly,
    Mutating,
}

/// Uniform result record for every tool execution.
///
/// Tool failures are data, not errors: a failing call produces
/// `success = false` plus an `error` string, and nothing propagates past
/// the registry boundary as `Err`.
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub title: String,
    pub output: String,
    pub metadata: Map<String, Value>,
    pub success: bool,
    pub error: Option<String>,
}

impl ToolResult {
    pub fn ok(title: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            output: output.into(),
            metadata: Map::new(),
            success: true,
            error: None,
        }
    }

    pub fn err(title: impl Into<String>, error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            title: title.into(),
            output: String::new(),
            metadata: Map::new(),
            success: false,
            error: Some(error),
        }
    }

    pub fn with_meta(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    /// The text recorded as the tool message: the output on success, the
    /// error string on failure.
    pub fn message_text(&self) -> &str {
        if self.success {
            &self.output
        } else {
            self.error.as_deref().unwrap_or("tool execution failed")
        }
    }
}

/// Trait every built-in and user-defined tool implements.  Tools are
/// statically linked values discovered by name through the registry.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for the argument object
    fn parameters_schema(&self) -> Value;
    /// Conservative default: anything not explicitly read-only may mutate.
    fn safety(&self) -> ToolSafety {
        ToolSafety::Mutating
    }
    /// Execute the tool.  Recoverable failures should be returned as
    /// [`ToolResult::err`]; an `Err` is normalized by the registry.
    async fn execute(&self, args: &Value, ctx: &ToolContext) -> anyhow::Result<ToolResult>;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
