// Copyright (c) 2025-2026 Koda Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::time::Instant;

use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use koda_model::{TokenUsage, ToolCallRef};

use crate::protocol::EventMsg;
use crate::session::{PendingCall, Session};

/// A reasoning block the model produced alongside its answer.
#[derive(Debug, Clone)]
pub struct Thought {
    pub subject: String,
    pub description: String,
}

/// Outcome of one executed (or denied/errored) tool call within a turn.
#[derive(Debug, Clone)]
pub struct ToolCallResponse {
    pub call_id: String,
    pub success: bool,
    pub result: Option<String>,
    pub error: Option<String>,
}

/// Result of a single agent turn: one LLM round trip plus the execution of
/// the tool calls it requested.
#[derive(Debug, Clone, Default)]
pub struct AgentTurnResult {
    pub text_content: String,
    pub thoughts: Vec<Thought>,
    pub tool_calls: Vec<ToolCallRef>,
    pub tool_responses: Vec<ToolCallResponse>,
    pub token_usage: TokenUsage,
    pub duration_ms: u64,
}

impl AgentTurnResult {
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// True when the turn requested tools but executed none — every call is
    /// parked awaiting human approval.
    pub fn all_calls_pending(&self) -> bool {
        self.has_tool_calls() && self.tool_responses.is_empty()
    }
}

/// Execute one agent turn for `submission_id`.
///
/// The assistant message (text plus the full tool-call list) is appended
/// *before* any tool runs, so the tool/assistant linkage invariant holds
/// even if execution is interrupted halfway.  Approval-gated calls are
/// registered as pending and skipped; an LLM failure is folded into the
/// result rather than propagated.
pub(crate) async fn execute_turn(session: &mut Session, submission_id: Uuid) -> AgentTurnResult {
    let started = Instant::now();
    let mut result = AgentTurnResult::default();

    let tools = session.model_tool_schemas();
    let messages = session.memory.messages().to_vec();
    debug!(count = messages.len(), "starting agent turn");

    let response = match session.client.chat_completion(&messages, &tools).await {
        Ok(r) => r,
        Err(e) => {
            let message = format!("model call failed: {e}");
            warn!("{message}");
            session.emit(submission_id, EventMsg::Error { message: message.clone() });
            result.text_content = message;
            result.duration_ms = started.elapsed().as_millis() as u64;
            return result;
        }
    };

    result.text_content = response.content;
    result.tool_calls = response.tool_calls;
    result.token_usage = response.token_usage;
    if let Some(reasoning) = response.reasoning_content {
        result.thoughts.push(Thought {
            subject: "reasoning".into(),
            description: reasoning,
        });
    }

    if !result.text_content.is_empty() || result.has_tool_calls() {
        if let Err(e) = session
            .memory
            .add_assistant(result.text_content.clone(), result.tool_calls.clone())
        {
            session.emit_rollout_error(submission_id, &e);
        }
    }

    if !result.text_content.is_empty() {
        session.emit(
            submission_id,
            EventMsg::AgentMessage {
                message: result.text_content.clone(),
            },
        );
    }

    for call in result.tool_calls.clone() {
        // Cooperative cancellation point between tool executions.
        if session.interrupt_requested() {
            debug!("interrupt observed, skipping remaining tool calls");
            break;
        }

        session.emit(
            submission_id,
            EventMsg::ToolExecutionBegin {
                call_id: call.call_id.clone(),
                tool_name: call.name.clone(),
                arguments: call.arguments.clone(),
            },
        );

        if session.needs_approval(&call.name, &call.arguments) {
            register_pending(session, submission_id, &call);
            continue;
        }

        let response = session
            .run_tool(&call.name, &call.arguments, submission_id, &call.call_id)
            .await;
        let text = response.message_text().to_string();
        if let Err(e) = session.memory.add_tool(&text, &call.call_id) {
            session.emit_rollout_error(submission_id, &e);
        }
        session.emit(
            submission_id,
            EventMsg::ToolExecutionEnd {
                call_id: call.call_id.clone(),
                tool_name: call.name.clone(),
                success: response.success,
                result: response.success.then(|| text.clone()),
                error: response.error.clone(),
            },
        );
        result.tool_responses.push(ToolCallResponse {
            call_id: call.call_id.clone(),
            success: response.success,
            result: response.success.then_some(text),
            error: response.error,
        });
    }

    result.duration_ms = started.elapsed().as_millis() as u64;
    result
}

fn register_pending(session: &mut Session, submission_id: Uuid, call: &ToolCallRef) {
    session.approval_pending.insert(
        call.call_id.clone(),
        PendingCall {
            submission_id,
            tool_name: call.name.clone(),
            arguments: call.arguments.clone(),
        },
    );
    session.emit(
        submission_id,
        EventMsg::ApprovalRequest {
            call_id: call.call_id.clone(),
            tool_name: call.name.clone(),
            arguments: call.arguments.clone(),
            reason: format!("approval required to run {}", call.name),
        },
    );
}

/// Session-allowlist key: tool name plus canonical argument JSON.
pub(crate) fn call_signature(tool_name: &str, arguments: &Value) -> String {
    format!("{tool_name}:{arguments}")
}
