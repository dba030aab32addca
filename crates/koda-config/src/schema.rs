// Copyright (c) 2025-2026 Koda Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Serde default helper — returns `true`.
///
/// Used for config fields that should be enabled unless the user explicitly
/// sets them to `false`.  `#[serde(default)]` on a `bool` always falls back
/// to `bool::default()` (i.e. `false`), so a named function is required.
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub compaction: CompactionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Provider identifier: "openai" (any OpenAI-compatible endpoint) or
    /// "mock" (deterministic echo client, no network).
    pub provider: String,
    /// Model name forwarded to the provider API
    pub name: String,
    /// Environment variable that holds the API key (read at runtime)
    pub api_key_env: Option<String>,
    /// Explicit API key; prefer api_key_env in config files to avoid secrets
    /// in version-controlled files
    pub api_key: Option<String>,
    /// Base URL override.  Useful for local proxies or compatible gateways.
    pub base_url: Option<String>,
    /// Maximum tokens to request in a single completion
    pub max_tokens: Option<u32>,
    /// Sampling temperature (0.0–2.0)
    pub temperature: Option<f32>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: "openai".into(),
            name: "gpt-4o".into(),
            api_key_env: None,
            api_key: None,
            base_url: None,
            max_tokens: Some(4096),
            temperature: Some(0.1),
        }
    }
}

fn default_max_turns() -> u32 {
    20
}
fn default_max_context_tokens() -> usize {
    128_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Initial working directory recorded in the session metadata.
    /// Defaults to the process cwd when unset.
    pub cwd: Option<PathBuf>,
    /// When a tool call requires human approval before it runs.
    #[serde(default)]
    pub approval_policy: AskForApproval,
    /// Advisory sandbox level forwarded to tools unchanged.
    #[serde(default)]
    pub sandbox_policy: SandboxPolicy,
    /// Upper bound on agent turns per user input, preventing unbounded loops
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,
    /// Context-window size used for compaction decisions
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: usize,
    /// When false, the memory manager degrades to in-memory-only (no rollout)
    #[serde(default = "default_true")]
    pub enable_memory: bool,
    /// Master switch for the compaction engine
    #[serde(default = "default_true")]
    pub enable_compaction: bool,
    /// Directory holding rollout files.  Defaults to the platform data dir.
    pub session_dir: Option<PathBuf>,
    /// Extra instructions appended to the system prompt under a
    /// "User instructions:" heading.
    pub user_instructions: Option<String>,
    /// Override for the built-in base system prompt.
    pub base_instructions: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cwd: None,
            approval_policy: AskForApproval::default(),
            sandbox_policy: SandboxPolicy::default(),
            max_turns: default_max_turns(),
            max_context_tokens: default_max_context_tokens(),
            enable_memory: true,
            enable_compaction: true,
            session_dir: None,
            user_instructions: None,
            base_instructions: None,
        }
    }
}

/// When the engine must ask the user before running a tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AskForApproval {
    /// Ask for everything except tools that only read state
    UnlessTrusted,
    /// Run first; ask only when retrying a failed call
    OnFailure,
    /// Ask before any tool that mutates state
    #[default]
    OnRequest,
    /// Never ask
    Never,
}

impl std::fmt::Display for AskForApproval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AskForApproval::UnlessTrusted => "unless_trusted",
            AskForApproval::OnFailure => "on_failure",
            AskForApproval::OnRequest => "on_request",
            AskForApproval::Never => "never",
        };
        write!(f, "{s}")
    }
}

/// Advisory sandbox level passed through to tools.  The engine does not
/// enforce isolation; tools decide what the level means for them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxPolicy {
    DangerFullAccess,
    ReadOnly,
    #[default]
    WorkspaceWrite,
}

impl std::fmt::Display for SandboxPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SandboxPolicy::DangerFullAccess => "danger_full_access",
            SandboxPolicy::ReadOnly => "read_only",
            SandboxPolicy::WorkspaceWrite => "workspace_write",
        };
        write!(f, "{s}")
    }
}

fn default_strategy() -> String {
    "opencode".into()
}
fn default_auto_threshold() -> f32 {
    0.75
}
fn default_prune_minimum() -> usize {
    5_000
}
fn default_prune_protect() -> usize {
    10_000
}
fn default_protect_turns() -> usize {
    2
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompactionConfig {
    /// Name of the registered compaction strategy to run
    #[serde(default = "default_strategy")]
    pub strategy: String,
    /// Context fraction at which compaction triggers (0.0–1.0)
    #[serde(default = "default_auto_threshold")]
    pub auto_threshold: f32,
    /// Accepted for config compatibility; the prune pass keys on
    /// `prune_protect` alone and does not consult this threshold.
    #[serde(default = "default_prune_minimum")]
    pub prune_minimum: usize,
    /// Cumulative tool-output token budget always left intact at the tail
    #[serde(default = "default_prune_protect")]
    pub prune_protect: usize,
    /// Number of most-recent user turns excluded from prune and summarize
    #[serde(default = "default_protect_turns")]
    pub protect_turns: usize,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            auto_threshold: default_auto_threshold(),
            prune_minimum: default_prune_minimum(),
            prune_protect: default_prune_protect(),
            protect_turns: default_protect_turns(),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
