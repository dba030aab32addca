// Copyright (c) 2025-2026 Koda Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use futures::stream;
use serde_json::Value;

use crate::{
    ChatResponse, Message, ModelClient, ResponseStream, Role, StreamEvent, TokenUsage,
    ToolCallRef, ToolSchema,
};

/// Deterministic mock client for tests.  Echoes the last user message back
/// as the assistant response.
#[derive(Default)]
pub struct MockClient;

#[async_trait]
impl ModelClient for MockClient {
    fn model_name(&self) -> &str {
        "mock-model"
    }

    async fn chat_completion(
        &self,
        messages: &[Message],
        _tools: &[ToolSchema],
    ) -> anyhow::Result<ChatResponse> {
        let reply = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("[no input]");
        Ok(ChatResponse {
            content: format!("MOCK: {reply}"),
            token_usage: TokenUsage {
                input_tokens: 10,
                output_tokens: 10,
                total_tokens: 20,
                cached_input_tokens: None,
            },
            finish_reason: "stop".into(),
            ..Default::default()
        })
    }

    async fn chat_completion_stream(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
    ) -> anyhow::Result<ResponseStream> {
        let resp = self.chat_completion(messages, tools).await?;
        Ok(response_to_stream(resp))
    }
}

/// A pre-scripted mock client.  Each completion call pops the next response
/// from the front of the queue, so tests can specify exact multi-turn
/// sequences — including tool calls — without network access.
pub struct ScriptedModelClient {
    responses: Mutex<VecDeque<ChatResponse>>,
    /// The messages + tools of the last completion call, for inspection.
    pub last_request: Mutex<Option<(Vec<Message>, Vec<ToolSchema>)>>,
}

impl ScriptedModelClient {
    pub fn new(responses: Vec<ChatResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            last_request: Mutex::new(None),
        }
    }

    /// Convenience: a client that always returns the same single text reply.
    pub fn always_text(reply: impl Into<String>) -> Self {
        Self::new(vec![Self::text_response(reply)])
    }

    /// Convenience: first call returns one tool call, second call returns a
    /// final text reply.
    pub fn tool_then_text(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        args: Value,
        final_text: impl Into<String>,
    ) -> Self {
        Self::new(vec![
            Self::tool_call_response(call_id, tool_name, args),
            Self::text_response(final_text),
        ])
    }

    /// A plain text response with small nonzero usage numbers.
    pub fn text_response(text: impl Into<String>) -> ChatResponse {
        ChatResponse {
            content: text.into(),
            token_usage: TokenUsage {
                input_tokens: 5,
                output_tokens: 5,
                total_tokens: 10,
                cached_input_tokens: None,
            },
            finish_reason: "stop".into(),
            ..Default::default()
        }
    }

    /// A response consisting of one tool call and no text.
    pub fn tool_call_response(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        args: Value,
    ) -> ChatResponse {
        ChatResponse {
            tool_calls: vec![ToolCallRef::new(call_id, tool_name, args)],
            token_usage: TokenUsage {
                input_tokens: 5,
                output_tokens: 5,
                total_tokens: 10,
                cached_input_tokens: None,
            },
            finish_reason: "tool_calls".into(),
            ..Default::default()
        }
    }

    fn next_response(&self) -> ChatResponse {
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Self::text_response("[no more scripted responses]"))
    }
}

#[async_trait]
impl ModelClient for ScriptedModelClient {
    fn model_name(&self) -> &str {
        "scripted-mock-model"
    }

    async fn chat_completion(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
    ) -> anyhow::Result<ChatResponse> {
        *self.last_request.lock().unwrap() = Some((messages.to_vec(), tools.to_vec()));
        Ok(self.next_response())
    }

    async fn chat_completion_stream(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
    ) -> anyhow::Result<ResponseStream> {
        *self.last_request.lock().unwrap() = Some((messages.to_vec(), tools.to_vec()));
        Ok(response_to_stream(self.next_response()))
    }
}

/// Decompose a complete response into the delta events a real provider
/// would stream, splitting text and argument payloads so assembly paths are
/// actually exercised.
fn response_to_stream(resp: ChatResponse) -> ResponseStream {
    let mut events: Vec<anyhow::Result<StreamEvent>> = Vec::new();
    if let Some(reasoning) = &resp.reasoning_content {
        events.push(Ok(StreamEvent::ReasoningDelta(reasoning.clone())));
    }
    if !resp.content.is_empty() {
        let mid = resp.content.len() / 2;
        let split = resp
            .content
            .char_indices()
            .map(|(i, _)| i)
            .min_by_key(|i| i.abs_diff(mid))
            .unwrap_or(0);
        events.push(Ok(StreamEvent::TextDelta(resp.content[..split].to_string())));
        events.push(Ok(StreamEvent::TextDelta(resp.content[split..].to_string())));
    }
    for (i, tc) in resp.tool_calls.iter().enumerate() {
        let args = tc.arguments.to_string();
        let target = args.len() / 2;
        let mid = args
            .char_indices()
            .map(|(i, _)| i)
            .min_by_key(|i| i.abs_diff(target))
            .unwrap_or(0);
        events.push(Ok(StreamEvent::ToolCallDelta {
            index: i as u32,
            call_id: tc.call_id.clone(),
            name: tc.name.clone(),
            arguments: args[..mid].to_string(),
        }));
        events.push(Ok(StreamEvent::ToolCallDelta {
            index: i as u32,
            call_id: String::new(),
            name: String::new(),
            arguments: args[mid..].to_string(),
        }));
    }
    events.push(Ok(StreamEvent::Usage(resp.token_usage)));
    events.push(Ok(StreamEvent::Done));
    Box::pin(stream::iter(events))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::collect_stream;

    #[tokio::test]
    async fn mock_echoes_last_user_message() {
        let client = MockClient;
        let resp = client
            .chat_completion(&[Message::user("hi there")], &[])
            .await
            .unwrap();
        assert_eq!(resp.content, "MOCK: hi there");
        assert!(!resp.token_usage.is_zero());
    }

    #[tokio::test]
    async fn scripted_pops_responses_in_order() {
        let client = ScriptedModelClient::new(vec![
            ScriptedModelClient::text_response("first"),
            ScriptedModelClient::text_response("second"),
        ]);
        let msgs = [Message::user("go")];
        assert_eq!(client.chat_completion(&msgs, &[]).await.unwrap().content, "first");
        assert_eq!(client.chat_completion(&msgs, &[]).await.unwrap().content, "second");
    }

    #[tokio::test]
    async fn scripted_falls_back_when_exhausted() {
        let client = ScriptedModelClient::new(vec![]);
        let resp = client.chat_completion(&[Message::user("go")], &[]).await.unwrap();
        assert!(resp.content.contains("no more scripted responses"));
    }

    #[tokio::test]
    async fn scripted_records_last_request() {
        let client = ScriptedModelClient::always_text("ok");
        let _ = client
            .chat_completion(&[Message::system("sys"), Message::user("q")], &[])
            .await
            .unwrap();
        let guard = client.last_request.lock().unwrap();
        let (msgs, _) = guard.as_ref().unwrap();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[1].content, "q");
    }

    #[tokio::test]
    async fn streamed_script_reassembles_to_same_response() {
        let client = ScriptedModelClient::tool_then_text(
            "c1",
            "shell",
            json!({"command": "ls -la"}),
            "done",
        );
        let stream = client
            .chat_completion_stream(&[Message::user("list")], &[])
            .await
            .unwrap();
        let resp = collect_stream(stream).await.unwrap();
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].call_id, "c1");
        assert_eq!(resp.tool_calls[0].arguments["command"], "ls -la");
    }
}
