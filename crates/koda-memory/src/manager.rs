// Copyright (c) 2025-2026 Koda Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Utc;
use tracing::{info, warn};

use koda_model::{Message, Role, ToolCallRef};

use crate::models::{CompactedMarker, SessionMeta};
use crate::recorder::{rollout_file_name, RolloutRecorder};

/// Everything needed to open a fresh session.
///
/// The collaborator outputs (base prompt text, project docs, environment
/// block, tool catalogue lines) are produced by the caller; the manager owns
/// how they are composed into the initial system message.
pub struct SessionSetup {
    pub session_dir: PathBuf,
    pub session_id: String,
    pub cwd: PathBuf,
    pub model: String,
    pub base_prompt: String,
    pub user_instructions: Option<String>,
    pub project_docs: Option<String>,
    /// Environment block: cwd, approval policy, sandbox policy
    pub environment: String,
    /// One "name - description" line per enabled tool
    pub tool_catalogue: Vec<String>,
    /// When false the manager is in-memory only and writes no rollout
    pub enable_rollout: bool,
}

#[derive(Debug, Clone)]
pub struct MemoryStats {
    pub total_messages: usize,
    pub user_messages: usize,
    pub assistant_messages: usize,
    pub system_messages: usize,
    pub tool_messages: usize,
    pub estimated_tokens: usize,
    pub rollout_path: Option<PathBuf>,
}

/// Owns the ordered message list and its persistence.
///
/// Messages are never mutated in place here; compaction swaps the whole
/// list via [`MemoryManager::replace_messages`].
pub struct MemoryManager {
    pub session_id: String,
    pub cwd: PathBuf,
    pub model: String,
    messages: Vec<Message>,
    recorder: Option<RolloutRecorder>,
    /// Set after the first failed write; later writes are suppressed and the
    /// session continues in memory only.
    io_failed: bool,
}

impl MemoryManager {
    /// Create a fresh session: write the meta line, then compose and append
    /// the initial system message.
    pub fn new(setup: SessionSetup) -> anyhow::Result<Self> {
        let created_at = Utc::now();
        let recorder = if setup.enable_rollout {
            let path = setup
                .session_dir
                .join(rollout_file_name(created_at, &setup.session_id));
            let meta = SessionMeta {
                session_id: setup.session_id.clone(),
                created_at,
                cwd: setup.cwd.display().to_string(),
                model: setup.model.clone(),
                user_instructions: setup.user_instructions.clone(),
                project_docs: setup.project_docs.clone(),
            };
            match RolloutRecorder::open(&path)
                .and_then(|mut rec| rec.write_session_meta(&meta).map(|()| rec))
            {
                Ok(rec) => Some(rec),
                Err(e) => {
                    warn!(error = %e, "cannot open rollout, continuing in memory only");
                    None
                }
            }
        } else {
            None
        };

        let mut manager = Self {
            session_id: setup.session_id.clone(),
            cwd: setup.cwd.clone(),
            model: setup.model.clone(),
            messages: Vec::new(),
            recorder,
            io_failed: false,
        };

        let system_prompt = compose_system_prompt(&setup);
        if let Err(e) = manager.add_system(system_prompt) {
            warn!(error = %e, "initial system message not persisted");
        }
        info!(session_id = %setup.session_id, "session initialized");
        Ok(manager)
    }

    /// Reconstruct a manager from an existing rollout and keep appending to
    /// the same file.
    pub fn resume(rollout_path: &Path) -> anyhow::Result<Self> {
        let (meta, messages) = RolloutRecorder::load_history(rollout_path)
            .with_context(|| format!("resuming from {}", rollout_path.display()))?;
        let recorder = RolloutRecorder::open(rollout_path)?;
        info!(session_id = %meta.session_id, count = messages.len(), "session resumed");
        Ok(Self {
            session_id: meta.session_id,
            cwd: PathBuf::from(meta.cwd),
            model: meta.model,
            messages,
            recorder: Some(recorder),
            io_failed: false,
        })
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn rollout_path(&self) -> Option<&Path> {
        self.recorder.as_ref().map(|r| r.path())
    }

    /// Append in memory and persist one line.  On a write error the message
    /// is still appended; the error is returned so the caller can surface it
    /// and the manager degrades to in-memory-only.
    fn append(&mut self, message: Message) -> anyhow::Result<()> {
        self.messages.push(message);
        if self.io_failed {
            return Ok(());
        }
        if let Some(rec) = &mut self.recorder {
            if let Err(e) = rec.write_message(self.messages.last().expect("just pushed")) {
                warn!(error = %e, "rollout write failed, continuing in memory only");
                self.io_failed = true;
                return Err(e);
            }
        }
        Ok(())
    }

    pub fn add_system(&mut self, content: impl Into<String>) -> anyhow::Result<()> {
        self.append(Message::system(content))
    }

    pub fn add_user(&mut self, content: impl Into<String>) -> anyhow::Result<()> {
        self.append(Message::user(content))
    }

    pub fn add_assistant(
        &mut self,
        content: impl Into<String>,
        tool_calls: Vec<ToolCallRef>,
    ) -> anyhow::Result<()> {
        self.append(Message::assistant_with_calls(content, tool_calls))
    }

    /// Append a tool-result message.  The `call_id` must reference a call
    /// emitted by the preceding assistant message; this is checked here so
    /// the tool/assistant invariant holds at append time, not read time.
    pub fn add_tool(
        &mut self,
        content: impl Into<String>,
        call_id: impl Into<String>,
    ) -> anyhow::Result<()> {
        let call_id = call_id.into();
        if !self.has_matching_call(&call_id) {
            warn!(call_id = %call_id, "tool message without a matching assistant tool call");
        }
        self.append(Message::tool(content, call_id))
    }

    pub fn add_message(&mut self, message: Message) -> anyhow::Result<()> {
        self.append(message)
    }

    /// True when the most recent assistant message carrying tool calls
    /// (looking back across tool messages only) declares `call_id`.
    fn has_matching_call(&self, call_id: &str) -> bool {
        for m in self.messages.iter().rev() {
            match m.role {
                Role::Tool => continue,
                Role::Assistant => {
                    return m
                        .tool_calls
                        .as_ref()
                        .map(|calls| calls.iter().any(|c| c.call_id == call_id))
                        .unwrap_or(false)
                }
                _ => return false,
            }
        }
        false
    }

    /// Replace the whole message list.
    ///
    /// With `persist = false` (the compaction path — a marker line has
    /// already been recorded) only memory changes.  With `persist = true`
    /// every message is written out as a fresh line.
    pub fn replace_messages(&mut self, messages: Vec<Message>, persist: bool) -> anyhow::Result<()> {
        self.messages = messages;
        if !persist || self.io_failed {
            return Ok(());
        }
        if let Some(rec) = &mut self.recorder {
            for m in &self.messages {
                if let Err(e) = rec.write_message(m) {
                    warn!(error = %e, "rollout write failed, continuing in memory only");
                    self.io_failed = true;
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Record a compaction marker.  Call this *before* swapping in the
    /// compacted message list so replay order matches memory order.
    pub fn record_compaction(&mut self, marker: &CompactedMarker) -> anyhow::Result<()> {
        if self.io_failed {
            return Ok(());
        }
        if let Some(rec) = &mut self.recorder {
            if let Err(e) = rec.write_compacted_marker(marker) {
                warn!(error = %e, "compaction marker write failed");
                self.io_failed = true;
                return Err(e);
            }
        }
        Ok(())
    }

    pub fn stats(&self) -> MemoryStats {
        let count_role = |role: Role| self.messages.iter().filter(|m| m.role == role).count();
        MemoryStats {
            total_messages: self.messages.len(),
            user_messages: count_role(Role::User),
            assistant_messages: count_role(Role::Assistant),
            system_messages: count_role(Role::System),
            tool_messages: count_role(Role::Tool),
            estimated_tokens: self
                .messages
                .iter()
                .map(|m| m.content.len().div_ceil(4))
                .sum(),
            rollout_path: self.rollout_path().map(Path::to_path_buf),
        }
    }
}

/// Concatenate the initial system message, blank-line separated:
/// base prompt, user instructions, project docs, environment, tool
/// catalogue.
fn compose_system_prompt(setup: &SessionSetup) -> String {
    let mut parts: Vec<String> = vec![setup.base_prompt.clone()];
    if let Some(instructions) = &setup.user_instructions {
        parts.push(format!("User instructions:\n{instructions}"));
    }
    if let Some(docs) = &setup.project_docs {
        parts.push(docs.clone());
    }
    parts.push(setup.environment.clone());
    if !setup.tool_catalogue.is_empty() {
        parts.push(format!(
            "## Available tools\n\n{}",
            setup.tool_catalogue.join("\n")
        ));
    }
    parts.join("\n\n")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn setup_in(dir: &Path) -> SessionSetup {
        SessionSetup {
            session_dir: dir.to_path_buf(),
            session_id: "test-session".into(),
            cwd: PathBuf::from("/work"),
            model: "test-model".into(),
            base_prompt: "You are a coding assistant.".into(),
            user_instructions: Some("be brief".into()),
            project_docs: Some("## Project docs\n\nThis project uses spaces.".into()),
            environment: "cwd: /work\napproval policy: on_request".into(),
            tool_catalogue: vec!["shell - run a command".into()],
            enable_rollout: true,
        }
    }

    #[test]
    fn new_session_starts_with_composed_system_message() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = MemoryManager::new(setup_in(dir.path())).unwrap();

        assert_eq!(mgr.messages().len(), 1);
        let sys = &mgr.messages()[0];
        assert_eq!(sys.role, Role::System);
        assert!(sys.content.starts_with("You are a coding assistant."));
        assert!(sys.content.contains("User instructions:\nbe brief"));
        assert!(sys.content.contains("This project uses spaces."));
        assert!(sys.content.contains("approval policy: on_request"));
        assert!(sys.content.contains("shell - run a command"));
    }

    #[test]
    fn adds_persist_and_reload_to_equal_history() {
        let dir = tempfile::tempdir().unwrap();
        let mut mgr = MemoryManager::new(setup_in(dir.path())).unwrap();
        mgr.add_user("question").unwrap();
        mgr.add_assistant(
            "running tool",
            vec![ToolCallRef::new("c1", "shell", json!({"command": "ls"}))],
        )
        .unwrap();
        mgr.add_tool("file.txt", "c1").unwrap();
        mgr.add_assistant("done", vec![]).unwrap();

        let path = mgr.rollout_path().unwrap().to_path_buf();
        let (_, loaded) = RolloutRecorder::load_history(&path).unwrap();

        assert_eq!(loaded.len(), mgr.messages().len());
        for (a, b) in loaded.iter().zip(mgr.messages()) {
            assert_eq!(a.role, b.role);
            assert_eq!(a.content, b.content);
            assert_eq!(a.tool_call_id, b.tool_call_id);
        }
    }

    #[test]
    fn resume_restores_messages_and_appends_to_same_file() {
        let dir = tempfile::tempdir().unwrap();
        let path;
        {
            let mut mgr = MemoryManager::new(setup_in(dir.path())).unwrap();
            mgr.add_user("first").unwrap();
            path = mgr.rollout_path().unwrap().to_path_buf();
        }

        let mut resumed = MemoryManager::resume(&path).unwrap();
        assert_eq!(resumed.session_id, "test-session");
        assert_eq!(resumed.messages().len(), 2);

        resumed.add_user("second").unwrap();
        let (_, loaded) = RolloutRecorder::load_history(&path).unwrap();
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded[2].content, "second");
    }

    #[test]
    fn replace_without_persist_leaves_file_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let mut mgr = MemoryManager::new(setup_in(dir.path())).unwrap();
        mgr.add_user("will be replaced").unwrap();
        let path = mgr.rollout_path().unwrap().to_path_buf();
        let lines_before = std::fs::read_to_string(&path).unwrap().lines().count();

        mgr.replace_messages(vec![Message::system("new world")], false).unwrap();
        assert_eq!(mgr.messages().len(), 1);

        let lines_after = std::fs::read_to_string(&path).unwrap().lines().count();
        assert_eq!(lines_before, lines_after);
    }

    #[test]
    fn disabled_rollout_keeps_everything_in_memory() {
        let dir = tempfile::tempdir().unwrap();
        let mut setup = setup_in(dir.path());
        setup.enable_rollout = false;
        let mut mgr = MemoryManager::new(setup).unwrap();
        mgr.add_user("hello").unwrap();

        assert!(mgr.rollout_path().is_none());
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[test]
    fn stats_counts_by_role() {
        let dir = tempfile::tempdir().unwrap();
        let mut mgr = MemoryManager::new(setup_in(dir.path())).unwrap();
        mgr.add_user("q").unwrap();
        mgr.add_assistant("a", vec![]).unwrap();

        let stats = mgr.stats();
        assert_eq!(stats.total_messages, 3);
        assert_eq!(stats.system_messages, 1);
        assert_eq!(stats.user_messages, 1);
        assert_eq!(stats.assistant_messages, 1);
        assert!(stats.estimated_tokens > 0);
        assert!(stats.rollout_path.is_some());
    }

    #[test]
    fn compaction_marker_then_replace_matches_replay() {
        let dir = tempfile::tempdir().unwrap();
        let mut mgr = MemoryManager::new(setup_in(dir.path())).unwrap();
        mgr.add_user("old q").unwrap();
        mgr.add_assistant("old a", vec![]).unwrap();

        mgr.record_compaction(&CompactedMarker {
            summary: "talked about old things".into(),
            original_count: 2,
            tokens_saved: 10,
            strategy: "opencode".into(),
        })
        .unwrap();
        let system = mgr.messages()[0].clone();
        mgr.replace_messages(vec![system, Message::assistant("talked about old things")], false)
            .unwrap();
        mgr.add_user("new q").unwrap();

        let (_, replayed) = RolloutRecorder::load_history(mgr.rollout_path().unwrap()).unwrap();
        // Replay: original system, synthetic summary, post-marker user msg.
        assert_eq!(replayed.len(), 3);
        assert!(replayed[1].content.contains("talked about old things"));
        assert_eq!(replayed[2].content, "new q");
    }
}
