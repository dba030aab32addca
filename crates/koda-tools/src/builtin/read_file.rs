// Copyright (c) 2025-2026 Koda Contributors
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::{Tool, ToolContext, ToolResult, ToolSafety};

/// Default number of lines returned when the caller does not specify a limit.
/// Kept small so the first read does not flood the model context; the agent
/// can paginate with offset + limit.
const DEFAULT_LINE_LIMIT: usize = 200;

pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a text file. Returns at most 200 lines by default.\n\
         Lines are prefixed with their 1-indexed number. When more lines\n\
         exist, a pagination notice shows the next offset.\n\
         Use offset + limit to pull only the region you need instead of\n\
         reading a whole large file."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Absolute path, or relative to the session cwd"
                },
                "offset": {
                    "type": "integer",
                    "description": "1-indexed line number to start reading from (default 1)"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of lines to return (default 200)"
                }
            },
            "required": ["path"],
            "additionalProperties": false
        })
    }

    fn safety(&self) -> ToolSafety {
        ToolSafety::ReadOnly
    }

    async fn execute(&self, args: &Value, ctx: &ToolContext) -> anyhow::Result<ToolResult> {
        let Some(path) = args.get("path").and_then(Value::as_str) else {
            return Ok(ToolResult::err("read_file", "missing required parameter 'path'"));
        };
        let offset = args.get("offset").and_then(Value::as_u64).unwrap_or(1).max(1) as usize;
        let limit = args
            .get("limit")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_LINE_LIMIT as u64) as usize;

        let resolved = ctx.cwd.join(path);
        debug!(path = %resolved.display(), offset, limit, "read_file tool");

        let text = match tokio::fs::read_to_string(&resolved).await {
            Ok(t) => t,
            Err(e) => {
                return Ok(ToolResult::err(path, format!("failed to read {path}: {e}")));
            }
        };

        let lines: Vec<&str> = text.lines().collect();
        let total = lines.len();
        let start = (offset - 1).min(total);
        let end = (start + limit).min(total);

        let mut out = String::new();
        for (i, line) in lines[start..end].iter().enumerate() {
            out.push_str(&format!("{}:{}\n", start + i + 1, line));
        }
        if end < total {
            out.push_str(&format!(
                "[{} more lines; continue with offset={}]\n",
                total - end,
                end + 1
            ));
        }

        Ok(ToolResult::ok(path, out).with_meta("total_lines", json!(total)))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
