// Copyright (c) 2025-2026 Koda Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::path::Path;

use koda_config::{AskForApproval, SandboxPolicy};
use koda_tools::ToolRegistry;

/// Default base prompt used when the config does not override it.
pub const BASE_PROMPT: &str = "\
You are Koda, an interactive coding assistant. You help the user with
software engineering tasks: reading and editing code, running commands,
searching the workspace, and explaining what you find.

Work in small verifiable steps. Use the available tools to inspect real
state instead of guessing; prefer reading a file over assuming its
contents. When a command could destroy data or change state outside the
workspace, say so before running it.

Keep answers concise. When a task is done, summarise what changed and how
to verify it.";

/// Environment block injected into the initial system message.
pub fn environment_block(cwd: &Path, approval: AskForApproval, sandbox: SandboxPolicy) -> String {
    format!(
        "## Environment\n\n\
         working directory: {}\n\
         approval policy: {approval}\n\
         sandbox policy: {sandbox}",
        cwd.display()
    )
}

/// One catalogue line per enabled tool: name plus the first line of its
/// description.
pub fn tool_catalogue(registry: &ToolRegistry) -> Vec<String> {
    registry
        .list(true)
        .iter()
        .map(|info| {
            let first_line = info.description.lines().next().unwrap_or_default();
            format!("- {}: {first_line}", info.name)
        })
        .collect()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
