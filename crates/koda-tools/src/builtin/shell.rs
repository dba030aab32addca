// Copyright (c) 2025-2026 Koda Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;
use tracing::debug;

use crate::{Tool, ToolContext, ToolResult};

/// Hard byte ceiling for combined stdout + stderr returned to the model.
/// 20 KB ≈ 5,000 tokens; anything larger gets its middle cut out.
const OUTPUT_LIMIT_BYTES: usize = 20_000;

/// Built-in tool that runs a shell command.
pub struct ShellTool {
    pub timeout_secs: u64,
}

impl Default for ShellTool {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "shell"
    }

    fn description(&self) -> &str {
        "Execute a shell command and return stdout + stderr.\n\
         'command' is required and can be any bash one-liner.\n\
         Output is capped at ~20 KB; when larger, the head and tail are kept\n\
         with an omission marker in the middle.\n\
         Prefer non-interactive commands. Avoid commands that require a TTY."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The complete bash one-liner to execute"
                },
                "workdir": {
                    "type": "string",
                    "description": "Working directory (optional, defaults to the session cwd)"
                },
                "timeout_secs": {
                    "type": "integer",
                    "description": "Execution timeout in seconds (optional)"
                }
            },
            "required": ["command"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, args: &Value, ctx: &ToolContext) -> anyhow::Result<ToolResult> {
        let Some(command) = args.get("command").and_then(Value::as_str) else {
            return Ok(ToolResult::err("shell", "missing required parameter 'command'"));
        };
        let workdir = args
            .get("workdir")
            .and_then(Value::as_str)
            .map(std::path::PathBuf::from)
            .unwrap_or_else(|| ctx.cwd.clone());
        let timeout = args
            .get("timeout_secs")
            .and_then(Value::as_u64)
            .unwrap_or(self.timeout_secs);

        debug!(cmd = %command, "executing shell tool");

        let mut cmd = Command::new("bash");
        cmd.arg("-c")
            .arg(command)
            .current_dir(&workdir)
            // Keep the subprocess off the controlling terminal.
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let output = match tokio::time::timeout(Duration::from_secs(timeout), cmd.output()).await {
            Err(_) => {
                return Ok(ToolResult::err(
                    "shell",
                    format!("command timed out after {timeout}s: {command}"),
                ))
            }
            Ok(Err(e)) => {
                return Ok(ToolResult::err("shell", format!("failed to spawn bash: {e}")))
            }
            Ok(Ok(out)) => out,
        };

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.is_empty() {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(&stderr);
        }
        let text = cap_output(&text, OUTPUT_LIMIT_BYTES);

        let code = output.status.code().unwrap_or(-1);
        let result = if output.status.success() {
            ToolResult::ok(command, text)
        } else {
            ToolResult::err(command, format!("exit code {code}:\n{text}"))
        };
        Ok(result.with_meta("exit_code", json!(code)))
    }
}

/// Keep the head and tail of oversized output; errors and summaries almost
/// always appear at the end of build/test output, so the tail matters as
/// much as the head.
fn cap_output(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let half = limit / 2;
    let lines: Vec<&str> = text.lines().collect();

    let mut head: Vec<&str> = Vec::new();
    let mut head_bytes = 0usize;
    for line in &lines {
        if head_bytes + line.len() + 1 > half {
            break;
        }
        head_bytes += line.len() + 1;
        head.push(line);
    }

    let mut tail: Vec<&str> = Vec::new();
    let mut tail_bytes = 0usize;
    for line in lines.iter().rev() {
        if tail_bytes + line.len() + 1 > half {
            break;
        }
        tail_bytes += line.len() + 1;
        tail.push(line);
    }
    tail.reverse();

    let omitted = text.len().saturating_sub(head_bytes + tail_bytes);
    format!(
        "{}\n[... {omitted} bytes omitted ...]\n{}",
        head.join("\n"),
        tail.join("\n")
    )
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ToolContext {
        ToolContext {
            session_id: "s".into(),
            message_id: "m".into(),
            agent: "test".into(),
            call_id: None,
            cwd: std::env::temp_dir(),
            sandbox_policy: Default::default(),
        }
    }

    #[tokio::test]
    async fn echo_round_trip() {
        let out = ShellTool::default()
            .execute(&json!({"command": "echo hello"}), &ctx())
            .await
            .unwrap();
        assert!(out.success);
        assert!(out.output.contains("hello"));
        assert_eq!(out.metadata["exit_code"], json!(0));
    }

    #[tokio::test]
    async fn nonzero_exit_is_a_failure_result() {
        let out = ShellTool::default()
            .execute(&json!({"command": "exit 3"}), &ctx())
            .await
            .unwrap();
        assert!(!out.success);
        assert!(out.error.unwrap().contains("exit code 3"));
    }

    #[tokio::test]
    async fn missing_command_is_an_error_result() {
        let out = ShellTool::default().execute(&json!({}), &ctx()).await.unwrap();
        assert!(!out.success);
    }

    #[tokio::test]
    async fn timeout_surfaces_as_error() {
        let tool = ShellTool { timeout_secs: 1 };
        let out = tool
            .execute(&json!({"command": "sleep 5"}), &ctx())
            .await
            .unwrap();
        assert!(!out.success);
        assert!(out.error.unwrap().contains("timed out"));
    }

    #[test]
    fn cap_output_keeps_head_and_tail() {
        let lines: Vec<String> = (0..1000).map(|i| format!("line {i}")).collect();
        let text = lines.join("\n");
        let capped = cap_output(&text, 400);
        assert!(capped.contains("line 0"));
        assert!(capped.contains("line 999"));
        assert!(capped.contains("omitted"));
        assert!(!capped.contains("line 500\n"));
    }

    #[test]
    fn cap_output_passthrough_under_limit() {
        assert_eq!(cap_output("short", 100), "short");
    }
}
