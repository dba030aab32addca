// Copyright (c) 2025-2026 Koda Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::BTreeMap;
use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde_json::{json, Value};
use tracing::warn;

use crate::{ChatResponse, Message, StreamEvent, TokenUsage, ToolCallRef, ToolSchema};

pub type ResponseStream = Pin<Box<dyn Stream<Item = anyhow::Result<StreamEvent>> + Send>>;

/// Chat-completion client contract.
///
/// Implementations render the message list to their wire format (dropping
/// internal metadata and timestamps), attach the tool catalogue with
/// `tool_choice: auto`, and normalize responses into [`ChatResponse`].
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Model identifier as reported to users and recorded in session metadata.
    fn model_name(&self) -> &str;

    /// One non-streaming completion round trip.
    async fn chat_completion(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
    ) -> anyhow::Result<ChatResponse>;

    /// Streaming completion.  Yields content deltas; tool-call fragments must
    /// be assembled with [`collect_stream`] (or equivalent) before use.
    async fn chat_completion_stream(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
    ) -> anyhow::Result<ResponseStream>;
}

/// Render messages to the provider wire shape:
/// `[{role, content, tool_calls?, tool_call_id?}, …]`.
///
/// Timestamps and metadata are internal bookkeeping and are dropped here.
/// Tool-call arguments are JSON-encoded into the `arguments` string the
/// OpenAI-compatible format expects.
pub fn render_wire_messages(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|m| {
            let mut obj = json!({
                "role": m.role.to_string(),
                "content": m.content,
            });
            if let Some(calls) = &m.tool_calls {
                let wire_calls: Vec<Value> = calls
                    .iter()
                    .map(|tc| {
                        json!({
                            "id": tc.call_id,
                            "type": "function",
                            "function": {
                                "name": tc.name,
                                "arguments": tc.arguments.to_string(),
                            }
                        })
                    })
                    .collect();
                obj["tool_calls"] = Value::Array(wire_calls);
            }
            if let Some(id) = &m.tool_call_id {
                obj["tool_call_id"] = json!(id);
            }
            obj
        })
        .collect()
}

/// Parse a wire `arguments` JSON string into an argument object.
///
/// Malformed JSON degrades to an empty object with a logged warning; the
/// turn will then fail the call gracefully at validation time instead of
/// aborting the whole response.
pub(crate) fn parse_arguments(name: &str, call_id: &str, raw: &str) -> Value {
    if raw.trim().is_empty() {
        return Value::Object(Default::default());
    }
    match serde_json::from_str(raw) {
        Ok(v @ Value::Object(_)) => v,
        Ok(other) => {
            warn!(tool = name, call_id, got = %other, "tool arguments are not an object; substituting {{}}");
            Value::Object(Default::default())
        }
        Err(e) => {
            warn!(tool = name, call_id, error = %e, "invalid JSON tool arguments; substituting {{}}");
            Value::Object(Default::default())
        }
    }
}

/// Fold a delta stream into one [`ChatResponse`].
///
/// Tool-call fragments are accumulated keyed by their provider index so that
/// interleaved parallel calls reconstruct correctly; the final list is
/// ordered by index.
pub async fn collect_stream(mut stream: ResponseStream) -> anyhow::Result<ChatResponse> {
    struct PendingCall {
        call_id: String,
        name: String,
        args_buf: String,
    }

    let mut content = String::new();
    let mut reasoning = String::new();
    let mut usage = TokenUsage::default();
    let mut pending: BTreeMap<u32, PendingCall> = BTreeMap::new();

    while let Some(event) = stream.next().await {
        match event? {
            StreamEvent::TextDelta(delta) => content.push_str(&delta),
            StreamEvent::ReasoningDelta(delta) => reasoning.push_str(&delta),
            StreamEvent::ToolCallDelta {
                index,
                call_id,
                name,
                arguments,
            } => {
                let entry = pending.entry(index).or_insert_with(|| PendingCall {
                    call_id: String::new(),
                    name: String::new(),
                    args_buf: String::new(),
                });
                if !call_id.is_empty() {
                    entry.call_id = call_id;
                }
                if !name.is_empty() {
                    entry.name = name;
                }
                entry.args_buf.push_str(&arguments);
            }
            StreamEvent::Usage(u) => usage = u,
            StreamEvent::Done => break,
        }
    }

    let mut tool_calls = Vec::with_capacity(pending.len());
    for (_, pc) in pending {
        if pc.name.is_empty() {
            warn!(call_id = %pc.call_id, "dropping streamed tool call with empty name");
            continue;
        }
        let arguments = parse_arguments(&pc.name, &pc.call_id, &pc.args_buf);
        tool_calls.push(ToolCallRef::new(pc.call_id, pc.name, arguments));
    }

    let finish_reason = if tool_calls.is_empty() { "stop" } else { "tool_calls" };
    Ok(ChatResponse {
        content,
        tool_calls,
        token_usage: usage,
        finish_reason: finish_reason.to_string(),
        reasoning_content: (!reasoning.is_empty()).then_some(reasoning),
    })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use futures::stream;
    use serde_json::json;

    use super::*;

    fn stream_of(events: Vec<StreamEvent>) -> ResponseStream {
        Box::pin(stream::iter(events.into_iter().map(Ok)))
    }

    #[test]
    fn wire_rendering_drops_metadata_and_timestamps() {
        let m = Message::assistant("hello").with_meta("summary", json!(true));
        let wire = render_wire_messages(&[m]);
        assert_eq!(wire[0]["role"], "assistant");
        assert_eq!(wire[0]["content"], "hello");
        assert!(wire[0].get("summary").is_none());
        assert!(wire[0].get("timestamp").is_none());
    }

    #[test]
    fn wire_rendering_encodes_tool_calls_and_ids() {
        let call = ToolCallRef::new("c1", "read_file", json!({"path": "a.txt"}));
        let msgs = vec![
            Message::assistant_with_calls("", vec![call]),
            Message::tool("ABC", "c1"),
        ];
        let wire = render_wire_messages(&msgs);
        assert_eq!(wire[0]["tool_calls"][0]["id"], "c1");
        assert_eq!(wire[0]["tool_calls"][0]["function"]["name"], "read_file");
        // Arguments are a JSON-encoded string on the wire.
        let args: Value =
            serde_json::from_str(wire[0]["tool_calls"][0]["function"]["arguments"].as_str().unwrap())
                .unwrap();
        assert_eq!(args["path"], "a.txt");
        assert_eq!(wire[1]["tool_call_id"], "c1");
    }

    #[tokio::test]
    async fn collect_stream_accumulates_text() {
        let resp = collect_stream(stream_of(vec![
            StreamEvent::TextDelta("hel".into()),
            StreamEvent::TextDelta("lo".into()),
            StreamEvent::Done,
        ]))
        .await
        .unwrap();
        assert_eq!(resp.content, "hello");
        assert_eq!(resp.finish_reason, "stop");
    }

    #[tokio::test]
    async fn collect_stream_assembles_interleaved_tool_calls() {
        let resp = collect_stream(stream_of(vec![
            StreamEvent::ToolCallDelta {
                index: 0,
                call_id: "a".into(),
                name: "shell".into(),
                arguments: "{\"comm".into(),
            },
            StreamEvent::ToolCallDelta {
                index: 1,
                call_id: "b".into(),
                name: "read_file".into(),
                arguments: "{\"path\":\"x\"}".into(),
            },
            StreamEvent::ToolCallDelta {
                index: 0,
                call_id: "".into(),
                name: "".into(),
                arguments: "and\":\"ls\"}".into(),
            },
            StreamEvent::Done,
        ]))
        .await
        .unwrap();
        assert_eq!(resp.tool_calls.len(), 2);
        assert_eq!(resp.tool_calls[0].call_id, "a");
        assert_eq!(resp.tool_calls[0].arguments["command"], "ls");
        assert_eq!(resp.tool_calls[1].name, "read_file");
        assert_eq!(resp.finish_reason, "tool_calls");
    }

    #[tokio::test]
    async fn collect_stream_degrades_malformed_arguments_to_empty_object() {
        let resp = collect_stream(stream_of(vec![
            StreamEvent::ToolCallDelta {
                index: 0,
                call_id: "c".into(),
                name: "shell".into(),
                arguments: "{not json".into(),
            },
            StreamEvent::Done,
        ]))
        .await
        .unwrap();
        assert_eq!(resp.tool_calls[0].arguments, json!({}));
    }

    #[tokio::test]
    async fn collect_stream_captures_usage_and_reasoning() {
        let resp = collect_stream(stream_of(vec![
            StreamEvent::ReasoningDelta("thinking".into()),
            StreamEvent::TextDelta("answer".into()),
            StreamEvent::Usage(TokenUsage {
                input_tokens: 7,
                output_tokens: 3,
                total_tokens: 10,
                cached_input_tokens: None,
            }),
            StreamEvent::Done,
        ]))
        .await
        .unwrap();
        assert_eq!(resp.reasoning_content.as_deref(), Some("thinking"));
        assert_eq!(resp.token_usage.total_tokens, 10);
    }

    #[test]
    fn parse_arguments_handles_empty_and_non_object() {
        assert_eq!(parse_arguments("t", "c", ""), json!({}));
        assert_eq!(parse_arguments("t", "c", "[1,2]"), json!({}));
        assert_eq!(parse_arguments("t", "c", "{\"a\":1}"), json!({"a": 1}));
    }
}
