// Copyright (c) 2025-2026 Koda Contributors
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use walkdir::WalkDir;

use crate::{Tool, ToolContext, ToolResult, ToolSafety};

/// Leading matches are the most relevant ones; the tail is dropped once
/// this many lines have been collected.
const MAX_MATCHES: usize = 200;

/// Files larger than this are skipped — almost certainly binaries or
/// generated artifacts that would only produce noise.
const MAX_FILE_BYTES: u64 = 1_000_000;

pub struct GrepTool;

#[async_trait]
impl Tool for GrepTool {
    fn name(&self) -> &str {
        "grep"
    }

    fn description(&self) -> &str {
        "Search file contents with a regular expression.\n\
         'pattern' is required; 'path' narrows the search root (default:\n\
         session cwd). Matches are reported as path:line:content, first\n\
         200 matches only — use a more specific pattern to see the rest."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Regular expression to search for"
                },
                "path": {
                    "type": "string",
                    "description": "File or directory to search (default: session cwd)"
                }
            },
            "required": ["pattern"],
            "additionalProperties": false
        })
    }

    fn safety(&self) -> ToolSafety {
        ToolSafety::ReadOnly
    }

    async fn execute(&self, args: &Value, ctx: &ToolContext) -> anyhow::Result<ToolResult> {
        let Some(pattern) = args.get("pattern").and_then(Value::as_str) else {
            return Ok(ToolResult::err("grep", "missing required parameter 'pattern'"));
        };
        let regex = match Regex::new(pattern) {
            Ok(r) => r,
            Err(e) => return Ok(ToolResult::err(pattern, format!("invalid pattern: {e}"))),
        };
        let root = args
            .get("path")
            .and_then(Value::as_str)
            .map(|p| ctx.cwd.join(p))
            .unwrap_or_else(|| ctx.cwd.clone());

        let mut matches: Vec<String> = Vec::new();
        let mut truncated = false;
        'outer: for entry in WalkDir::new(&root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'))
        {
            let entry = match entry {
                Ok(e) => e,
                Err(_) => continue,
            };
            if !entry.file_type().is_file() {
                continue;
            }
            if entry.metadata().map(|m| m.len() > MAX_FILE_BYTES).unwrap_or(true) {
                continue;
            }
            let Ok(text) = std::fs::read_to_string(entry.path()) else {
                continue;
            };
            let rel = entry
                .path()
                .strip_prefix(&root)
                .unwrap_or(entry.path())
                .display()
                .to_string();
            for (no, line) in text.lines().enumerate() {
                if regex.is_match(line) {
                    if matches.len() >= MAX_MATCHES {
                        truncated = true;
                        break 'outer;
                    }
                    matches.push(format!("{rel}:{}:{}", no + 1, line));
                }
            }
        }

        let count = matches.len();
        let mut out = matches.join("\n");
        if truncated {
            out.push_str("\n[... more matches omitted; use a more specific pattern ...]");
        }
        if count == 0 {
            out = format!("no matches for {pattern}");
        }
        Ok(ToolResult::ok(pattern, out).with_meta("matches", json!(count)))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
