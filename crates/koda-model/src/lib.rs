// Copyright (c) 2025-2026 Koda Contributors
//
// SPDX-License-Identifier: Apache-2.0
mod client;
mod mock;
mod openai;
mod types;

pub use client::{collect_stream, render_wire_messages, ModelClient, ResponseStream};
pub use mock::{MockClient, ScriptedModelClient};
pub use openai::OpenAiClient;
pub use types::{
    ChatResponse, Message, Role, StreamEvent, TokenUsage, ToolCallRef, ToolSchema,
};
