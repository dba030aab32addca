// Copyright (c) 2025-2026 Koda Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use koda_model::{Message, ModelClient};

/// Everything a strategy needs to decide on and perform a compaction.
///
/// The message list is a snapshot; strategies never touch the live session
/// state.  The model client is the non-streaming summarization path and
/// must not be used to mutate any conversation history.
pub struct CompactionContext {
    pub messages: Vec<Message>,
    pub current_tokens: usize,
    pub max_tokens: usize,
    pub model_name: String,
    pub session_id: String,
    pub model_client: Option<Arc<dyn ModelClient>>,
}

/// Outcome of one compaction run.
///
/// On failure `new_messages` carries the original list unchanged and no
/// marker may be recorded.
#[derive(Debug, Clone)]
pub struct CompactResult {
    pub success: bool,
    pub new_messages: Vec<Message>,
    pub removed_count: i64,
    pub tokens_saved: i64,
    pub strategy_name: String,
    pub metadata: Map<String, Value>,
    pub error: Option<String>,
}

impl CompactResult {
    pub fn failure(strategy_name: &str, original: Vec<Message>, error: String) -> Self {
        Self {
            success: false,
            new_messages: original,
            removed_count: 0,
            tokens_saved: 0,
            strategy_name: strategy_name.to_string(),
            metadata: Map::new(),
            error: Some(error),
        }
    }

    /// Summary text generated in this run, when one was produced.
    pub fn summary(&self) -> Option<&str> {
        self.metadata.get("summary").and_then(Value::as_str)
    }

    /// Number of messages the summary replaced (0 when nothing was
    /// summarized).
    pub fn summarized_count(&self) -> usize {
        self.metadata
            .get("summarized_count")
            .and_then(Value::as_u64)
            .unwrap_or(0) as usize
    }

    /// Number of tool outputs cleared by the prune phase.
    pub fn prune_count(&self) -> usize {
        self.metadata
            .get("prune_count")
            .and_then(Value::as_u64)
            .unwrap_or(0) as usize
    }
}

#[derive(Debug, Clone)]
pub struct StrategyInfo {
    pub name: String,
    pub version: String,
    pub description: String,
}

/// Pluggable compaction behavior.
#[async_trait]
pub trait CompactionStrategy: Send + Sync {
    /// Deterministic trigger decision from `(current_tokens, max_tokens)`.
    fn should_compact(&self, ctx: &CompactionContext) -> bool;

    /// Perform the compaction.  Never panics across this boundary: any
    /// internal failure becomes a `CompactResult { success: false }`.
    async fn compact(&self, ctx: &CompactionContext) -> CompactResult;

    fn metadata(&self) -> StrategyInfo;
}
