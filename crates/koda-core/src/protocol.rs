// Copyright (c) 2025-2026 Koda Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Verdict a human gives on a pending tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    Approved,
    /// Approve and allowlist this tool + argument signature for the rest of
    /// the session
    ApprovedForSession,
    Denied,
}

/// Operations accepted on the submission queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Op {
    UserInput {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cwd: Option<PathBuf>,
    },
    Interrupt,
    ExecApproval {
        call_id: String,
        decision: ReviewDecision,
    },
}

/// Ingress queue entry.
#[derive(Debug, Clone)]
pub struct Submission {
    pub id: Uuid,
    pub op: Op,
}

impl Submission {
    pub fn new(op: Op) -> Self {
        Self {
            id: Uuid::new_v4(),
            op,
        }
    }
}

/// The closed set of event payloads a session can emit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventMsg {
    SessionConfigured {
        session_id: String,
        model: String,
        cwd: String,
    },
    TaskStarted {
        model_context_window: Option<u64>,
    },
    TaskComplete {
        last_agent_message: Option<String>,
    },
    UserMessage {
        message: String,
    },
    AgentMessage {
        message: String,
    },
    ToolExecutionBegin {
        call_id: String,
        tool_name: String,
        arguments: Value,
    },
    ToolExecutionEnd {
        call_id: String,
        tool_name: String,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    ApprovalRequest {
        call_id: String,
        tool_name: String,
        arguments: Value,
        reason: String,
    },
    ApprovalComplete {
        call_id: String,
        decision: ReviewDecision,
    },
    ApprovalRejected {
        call_id: String,
        tool_name: String,
    },
    TokenCount {
        input_tokens: u64,
        output_tokens: u64,
        total_tokens: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cached_input_tokens: Option<u64>,
    },
    TurnAborted {
        reason: String,
    },
    Error {
        message: String,
    },
    ShutdownComplete,
}

/// Egress queue entry.  `id` is the submission the event belongs to (the
/// session id for lifecycle events that have no submission).
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub id: Uuid,
    pub msg: EventMsg,
}

impl Event {
    pub fn new(id: Uuid, msg: EventMsg) -> Self {
        Self { id, msg }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
