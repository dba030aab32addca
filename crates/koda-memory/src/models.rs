// Copyright (c) 2025-2026 Koda Contributors
//
// SPDX-License-Identifier: Apache-2.0
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use koda_model::Message;

/// First line of every rollout file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMeta {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub cwd: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_instructions: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_docs: Option<String>,
}

/// Marker recorded when the in-memory history was compacted.  On replay it
/// collapses everything before it into one synthetic summary message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactedMarker {
    pub summary: String,
    /// Number of messages the summary replaced
    pub original_count: usize,
    #[serde(default)]
    pub tokens_saved: i64,
    #[serde(default = "unknown_strategy")]
    pub strategy: String,
}

fn unknown_strategy() -> String {
    "unknown".into()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RolloutKind {
    SessionMeta,
    Message,
    Compacted,
}

/// One line of the rollout JSONL file.
///
/// Serialization keeps `type` and `data` separate so lines can be
/// dispatched without fully decoding the payload.
#[derive(Debug, Clone, Serialize)]
pub struct RolloutLine {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: RolloutKind,
    pub data: serde_json::Value,
}

impl RolloutLine {
    pub fn meta(meta: &SessionMeta) -> anyhow::Result<Self> {
        Ok(Self {
            timestamp: Utc::now(),
            kind: RolloutKind::SessionMeta,
            data: serde_json::to_value(meta)?,
        })
    }

    pub fn message(message: &Message) -> anyhow::Result<Self> {
        Ok(Self {
            timestamp: Utc::now(),
            kind: RolloutKind::Message,
            data: serde_json::to_value(message)?,
        })
    }

    pub fn compacted(marker: &CompactedMarker) -> anyhow::Result<Self> {
        Ok(Self {
            timestamp: Utc::now(),
            kind: RolloutKind::Compacted,
            data: serde_json::to_value(marker)?,
        })
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
