// Copyright (c) 2025-2026 Koda Contributors
//
// SPDX-License-Identifier: Apache-2.0
use anyhow::{bail, Context};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, warn};

use koda_config::ModelConfig;

use crate::client::parse_arguments;
use crate::{
    render_wire_messages, ChatResponse, Message, ModelClient, ResponseStream, StreamEvent,
    TokenUsage, ToolCallRef, ToolSchema,
};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Driver for any OpenAI-compatible chat-completions endpoint.
pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
}

impl OpenAiClient {
    /// Build a client from config.  Fails when no API key can be resolved —
    /// this is the one initialization error that is fatal for the engine.
    pub fn from_config(cfg: &ModelConfig) -> anyhow::Result<Self> {
        let api_key = cfg
            .api_key
            .clone()
            .or_else(|| {
                cfg.api_key_env
                    .as_deref()
                    .and_then(|var| std::env::var(var).ok())
            })
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .filter(|k| !k.is_empty());
        let Some(api_key) = api_key else {
            bail!(
                "no API key configured: set model.api_key, model.api_key_env, \
                 or the OPENAI_API_KEY environment variable"
            );
        };
        Ok(Self {
            http: reqwest::Client::new(),
            base_url: cfg
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key,
            model: cfg.name.clone(),
            max_tokens: cfg.max_tokens,
            temperature: cfg.temperature,
        })
    }

    fn request_body(&self, messages: &[Message], tools: &[ToolSchema], stream: bool) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": render_wire_messages(messages),
        });
        if !tools.is_empty() {
            let wire_tools: Vec<Value> = tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect();
            body["tools"] = Value::Array(wire_tools);
            body["tool_choice"] = json!("auto");
        }
        if let Some(mt) = self.max_tokens {
            body["max_tokens"] = json!(mt);
        }
        if let Some(t) = self.temperature {
            body["temperature"] = json!(t);
        }
        if stream {
            body["stream"] = json!(true);
            body["stream_options"] = json!({"include_usage": true});
        }
        body
    }

    async fn post(&self, body: &Value) -> anyhow::Result<reqwest::Response> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .context("sending chat-completion request")?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            bail!("chat-completion request failed with {status}: {text}");
        }
        Ok(resp)
    }
}

fn parse_usage(value: &Value) -> TokenUsage {
    TokenUsage {
        input_tokens: value["prompt_tokens"].as_u64().unwrap_or(0),
        output_tokens: value["completion_tokens"].as_u64().unwrap_or(0),
        total_tokens: value["total_tokens"].as_u64().unwrap_or(0),
        cached_input_tokens: value["prompt_tokens_details"]["cached_tokens"].as_u64(),
    }
}

/// Translate one streamed SSE chunk into zero or more [`StreamEvent`]s.
fn chunk_events(chunk: &Value) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    if let Some(delta) = chunk["choices"].get(0).map(|c| &c["delta"]) {
        if let Some(text) = delta["content"].as_str() {
            if !text.is_empty() {
                events.push(StreamEvent::TextDelta(text.to_string()));
            }
        }
        if let Some(text) = delta["reasoning_content"].as_str() {
            if !text.is_empty() {
                events.push(StreamEvent::ReasoningDelta(text.to_string()));
            }
        }
        if let Some(calls) = delta["tool_calls"].as_array() {
            for tc in calls {
                events.push(StreamEvent::ToolCallDelta {
                    index: tc["index"].as_u64().unwrap_or(0) as u32,
                    call_id: tc["id"].as_str().unwrap_or_default().to_string(),
                    name: tc["function"]["name"].as_str().unwrap_or_default().to_string(),
                    arguments: tc["function"]["arguments"]
                        .as_str()
                        .unwrap_or_default()
                        .to_string(),
                });
            }
        }
    }
    if chunk["usage"].is_object() {
        events.push(StreamEvent::Usage(parse_usage(&chunk["usage"])));
    }
    events
}

#[async_trait]
impl ModelClient for OpenAiClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn chat_completion(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
    ) -> anyhow::Result<ChatResponse> {
        debug!(count = messages.len(), model = %self.model, "chat completion");
        let body = self.request_body(messages, tools, false);
        let value: Value = self
            .post(&body)
            .await?
            .json()
            .await
            .context("decoding chat-completion response")?;

        let choice = &value["choices"][0];
        let message = &choice["message"];

        let mut tool_calls = Vec::new();
        if let Some(calls) = message["tool_calls"].as_array() {
            for tc in calls {
                let name = tc["function"]["name"].as_str().unwrap_or_default();
                let call_id = tc["id"].as_str().unwrap_or_default();
                if name.is_empty() {
                    warn!(call_id, "skipping tool call with empty name");
                    continue;
                }
                let raw_args = tc["function"]["arguments"].as_str().unwrap_or_default();
                tool_calls.push(ToolCallRef::new(
                    call_id,
                    name,
                    parse_arguments(name, call_id, raw_args),
                ));
            }
        }

        Ok(ChatResponse {
            content: message["content"].as_str().unwrap_or_default().to_string(),
            tool_calls,
            token_usage: parse_usage(&value["usage"]),
            finish_reason: choice["finish_reason"].as_str().unwrap_or("stop").to_string(),
            reasoning_content: message["reasoning_content"].as_str().map(str::to_string),
        })
    }

    async fn chat_completion_stream(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
    ) -> anyhow::Result<ResponseStream> {
        let body = self.request_body(messages, tools, true);
        let resp = self.post(&body).await?;

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut bytes = resp.bytes_stream();
            let mut buffer = String::new();
            while let Some(item) = bytes.next().await {
                let chunk = match item {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx.send(Err(anyhow::anyhow!("stream read error: {e}")));
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));
                // SSE frames are newline-delimited `data: {json}` lines.
                while let Some(pos) = buffer.find('\n') {
                    let line = buffer[..pos].trim().to_string();
                    buffer.drain(..=pos);
                    let Some(payload) = line.strip_prefix("data:") else {
                        continue;
                    };
                    let payload = payload.trim();
                    if payload == "[DONE]" {
                        let _ = tx.send(Ok(StreamEvent::Done));
                        return;
                    }
                    match serde_json::from_str::<Value>(payload) {
                        Ok(chunk) => {
                            for ev in chunk_events(&chunk) {
                                if tx.send(Ok(ev)).is_err() {
                                    return;
                                }
                            }
                        }
                        Err(e) => warn!(error = %e, "skipping malformed SSE chunk"),
                    }
                }
            }
            let _ = tx.send(Ok(StreamEvent::Done));
        });

        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
