// Copyright (c) 2025-2026 Koda Contributors
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde_json::{json, Value};
use walkdir::WalkDir;

use crate::{Tool, ToolContext, ToolResult, ToolSafety};

/// Upper bound on listed entries, to keep the result inside a sane context
/// footprint even for huge trees.
const MAX_ENTRIES: usize = 500;

pub struct ListDirTool;

#[async_trait]
impl Tool for ListDirTool {
    fn name(&self) -> &str {
        "list_dir"
    }

    fn description(&self) -> &str {
        "List directory contents. 'path' defaults to the session cwd;\n\
         'depth' controls recursion (default 1 = immediate children).\n\
         Directories are suffixed with '/'. Hidden entries are skipped."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Directory to list (default: session cwd)"
                },
                "depth": {
                    "type": "integer",
                    "description": "Maximum recursion depth (default 1)"
                }
            },
            "additionalProperties": false
        })
    }

    fn safety(&self) -> ToolSafety {
        ToolSafety::ReadOnly
    }

    async fn execute(&self, args: &Value, ctx: &ToolContext) -> anyhow::Result<ToolResult> {
        let root = args
            .get("path")
            .and_then(Value::as_str)
            .map(|p| ctx.cwd.join(p))
            .unwrap_or_else(|| ctx.cwd.clone());
        let depth = args.get("depth").and_then(Value::as_u64).unwrap_or(1).max(1) as usize;

        if !root.is_dir() {
            return Ok(ToolResult::err(
                root.display().to_string(),
                format!("not a directory: {}", root.display()),
            ));
        }

        let mut entries = Vec::new();
        let mut truncated = false;
        for entry in WalkDir::new(&root)
            .min_depth(1)
            .max_depth(depth)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'))
        {
            let entry = match entry {
                Ok(e) => e,
                Err(_) => continue,
            };
            if entries.len() >= MAX_ENTRIES {
                truncated = true;
                break;
            }
            let rel = entry
                .path()
                .strip_prefix(&root)
                .unwrap_or(entry.path())
                .display()
                .to_string();
            if entry.file_type().is_dir() {
                entries.push(format!("{rel}/"));
            } else {
                entries.push(rel);
            }
        }

        let mut out = entries.join("\n");
        if truncated {
            out.push_str(&format!("\n[listing truncated at {MAX_ENTRIES} entries]"));
        }
        Ok(ToolResult::ok(root.display().to_string(), out)
            .with_meta("entries", json!(entries.len())))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx_in(dir: &std::path::Path) -> ToolContext {
        ToolContext {
            session_id: "s".into(),
            message_id: "m".into(),
            agent: "test".into(),
            call_id: None,
            cwd: dir.to_path_buf(),
            sandbox_policy: Default::default(),
        }
    }

    #[tokio::test]
    async fn lists_children_with_dir_suffix() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("file.txt"), "x").unwrap();
        std::fs::write(dir.path().join(".hidden"), "x").unwrap();

        let out = ListDirTool.execute(&json!({}), &ctx_in(dir.path())).await.unwrap();
        assert!(out.success);
        assert!(out.output.contains("sub/"));
        assert!(out.output.contains("file.txt"));
        assert!(!out.output.contains(".hidden"));
    }

    #[tokio::test]
    async fn depth_controls_recursion() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("a/b")).unwrap();
        std::fs::write(dir.path().join("a/b/deep.txt"), "x").unwrap();

        let shallow = ListDirTool.execute(&json!({}), &ctx_in(dir.path())).await.unwrap();
        assert!(!shallow.output.contains("deep.txt"));

        let deep = ListDirTool
            .execute(&json!({"depth": 3}), &ctx_in(dir.path()))
            .await
            .unwrap();
        assert!(deep.output.contains("deep.txt"));
    }

    #[tokio::test]
    async fn non_directory_is_failure() {
        let dir = tempfile::tempdir().unwrap();
        let out = ListDirTool
            .execute(&json!({"path": "missing"}), &ctx_in(dir.path()))
            .await
            .unwrap();
        assert!(!out.success);
    }
}
