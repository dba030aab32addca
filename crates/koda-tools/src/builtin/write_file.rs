// Copyright (c) 2025-2026 Koda Contributors
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use koda_config::SandboxPolicy;

use crate::{Tool, ToolContext, ToolResult};

pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Create or overwrite a file with the given content.\n\
         Parent directories are created as needed.\n\
         'path' is resolved relative to the session cwd."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Target file path"
                },
                "content": {
                    "type": "string",
                    "description": "Full new file content"
                }
            },
            "required": ["path", "content"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, args: &Value, ctx: &ToolContext) -> anyhow::Result<ToolResult> {
        let (Some(path), Some(content)) = (
            args.get("path").and_then(Value::as_str),
            args.get("content").and_then(Value::as_str),
        ) else {
            return Ok(ToolResult::err("write_file", "missing required parameter 'path' or 'content'"));
        };

        if ctx.sandbox_policy == SandboxPolicy::ReadOnly {
            return Ok(ToolResult::err(
                path,
                "write refused: session sandbox policy is read_only",
            ));
        }

        let resolved = ctx.cwd.join(path);
        debug!(path = %resolved.display(), bytes = content.len(), "write_file tool");

        if let Some(parent) = resolved.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return Ok(ToolResult::err(path, format!("failed to create parent dirs: {e}")));
            }
        }
        match tokio::fs::write(&resolved, content).await {
            Ok(()) => Ok(ToolResult::ok(
                path,
                format!("wrote {} bytes to {path}", content.len()),
            )
            .with_meta("bytes", json!(content.len()))),
            Err(e) => Ok(ToolResult::err(path, format!("failed to write {path}: {e}"))),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx_in(dir: &std::path::Path, sandbox: SandboxPolicy) -> ToolContext {
        ToolContext {
            session_id: "s".into(),
            message_id: "m".into(),
            agent: "test".into(),
            call_id: None,
            cwd: dir.to_path_buf(),
            sandbox_policy: sandbox,
        }
    }

    #[tokio::test]
    async fn writes_file_and_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let out = WriteFileTool
            .execute(
                &json!({"path": "sub/dir/new.txt", "content": "hello"}),
                &ctx_in(dir.path(), SandboxPolicy::WorkspaceWrite),
            )
            .await
            .unwrap();
        assert!(out.success);
        let written = std::fs::read_to_string(dir.path().join("sub/dir/new.txt")).unwrap();
        assert_eq!(written, "hello");
    }

    #[tokio::test]
    async fn read_only_sandbox_refuses_write() {
        let dir = tempfile::tempdir().unwrap();
        let out = WriteFileTool
            .execute(
                &json!({"path": "x.txt", "content": "data"}),
                &ctx_in(dir.path(), SandboxPolicy::ReadOnly),
            )
            .await
            .unwrap();
        assert!(!out.success);
        assert!(!dir.path().join("x.txt").exists());
    }
}
