// Copyright (c) 2025-2026 Koda Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use koda_model::Message;

use crate::models::{CompactedMarker, RolloutLine, SessionMeta};

/// Platform default directory for rollout files.
pub fn default_session_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("koda/sessions"))
        .unwrap_or_else(|| PathBuf::from(".koda/sessions"))
}

/// File name carrying a sortable timestamp plus the session id.
pub fn rollout_file_name(created_at: DateTime<Utc>, session_id: &str) -> String {
    format!(
        "rollout-{}-{session_id}.jsonl",
        created_at.format("%Y%m%d-%H%M%S")
    )
}

/// Append-only JSONL writer for one session.
///
/// Every write serializes a single [`RolloutLine`] and flushes, so a crash
/// loses at most the line being written.
pub struct RolloutRecorder {
    path: PathBuf,
    file: File,
}

impl RolloutRecorder {
    /// Open (creating if needed) the rollout file in append mode.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating session dir {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("opening rollout {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append_line(&mut self, line: &RolloutLine) -> anyhow::Result<()> {
        let text = serde_json::to_string(line).context("serializing rollout line")?;
        writeln!(self.file, "{text}")
            .and_then(|()| self.file.flush())
            .with_context(|| format!("writing rollout {}", self.path.display()))
    }

    /// Write the session-meta record.  Must be the first line of a new file.
    pub fn write_session_meta(&mut self, meta: &SessionMeta) -> anyhow::Result<()> {
        info!(session_id = %meta.session_id, cwd = %meta.cwd, "recording session meta");
        self.append_line(&RolloutLine::meta(meta)?)
    }

    pub fn write_message(&mut self, message: &Message) -> anyhow::Result<()> {
        self.append_line(&RolloutLine::message(message)?)
    }

    pub fn write_compacted_marker(&mut self, marker: &CompactedMarker) -> anyhow::Result<()> {
        info!(
            original_count = marker.original_count,
            tokens_saved = marker.tokens_saved,
            "recording compaction marker"
        );
        self.append_line(&RolloutLine::compacted(marker)?)
    }

    /// Replay a rollout file into `(meta, messages)`.
    ///
    /// Malformed lines are skipped with a warning.  A `compacted` record
    /// collapses the accumulated non-system messages into one synthetic
    /// system message carrying the summary; system messages written before
    /// the marker are preserved.
    pub fn load_history(path: &Path) -> anyhow::Result<(SessionMeta, Vec<Message>)> {
        let file =
            File::open(path).with_context(|| format!("opening rollout {}", path.display()))?;
        let reader = BufReader::new(file);

        let mut meta: Option<SessionMeta> = None;
        let mut messages: Vec<Message> = Vec::new();

        for (line_no, line) in reader.lines().enumerate() {
            let line = match line {
                Ok(l) => l,
                Err(e) => {
                    warn!(line = line_no + 1, error = %e, "unreadable rollout line, skipping");
                    continue;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            let value: Value = match serde_json::from_str(&line) {
                Ok(v) => v,
                Err(e) => {
                    warn!(line = line_no + 1, error = %e, "malformed rollout line, skipping");
                    continue;
                }
            };

            // The meta record must come before anything else is accepted.
            let kind = value["type"].as_str().unwrap_or_default().to_string();
            if meta.is_none() && kind != "session_meta" {
                bail!("no session metadata in {}", path.display());
            }

            match kind.as_str() {
                "session_meta" => match serde_json::from_value(value["data"].clone()) {
                    Ok(m) => {
                        if meta.is_none() {
                            meta = Some(m);
                        }
                    }
                    Err(e) => {
                        if meta.is_none() {
                            bail!("no session metadata in {}: {e}", path.display());
                        }
                        warn!(line = line_no + 1, error = %e, "bad session_meta record, skipping");
                    }
                },
                "message" => match serde_json::from_value::<Message>(value["data"].clone()) {
                    Ok(m) => messages.push(m),
                    Err(e) => {
                        warn!(line = line_no + 1, error = %e, "bad message record, skipping")
                    }
                },
                "compacted" => {
                    let marker: CompactedMarker = match serde_json::from_value(value["data"].clone())
                    {
                        Ok(m) => m,
                        Err(e) => {
                            warn!(line = line_no + 1, error = %e, "bad compacted record, skipping");
                            continue;
                        }
                    };
                    debug!(original_count = marker.original_count, "replaying compaction marker");
                    messages.retain(|m| m.role == koda_model::Role::System);
                    let summary = Message::system(format!(
                        "[compaction summary - {} original messages]\n{}",
                        marker.original_count, marker.summary
                    ))
                    .with_meta("compressed", json!(true))
                    .with_meta("original_count", json!(marker.original_count))
                    .with_meta("tokens_saved", json!(marker.tokens_saved))
                    .with_meta("strategy", json!(marker.strategy));
                    messages.push(summary);
                }
                other => {
                    warn!(line = line_no + 1, kind = other, "unknown rollout record type, skipping")
                }
            }
        }

        match meta {
            Some(meta) => {
                info!(count = messages.len(), "rollout loaded");
                Ok((meta, messages))
            }
            None => bail!("no session metadata in {}", path.display()),
        }
    }

    /// Enumerate rollout files in `session_dir`, newest first.
    ///
    /// Only the first line of each file is parsed.
    pub fn list_sessions(session_dir: &Path) -> Vec<(PathBuf, SessionMeta)> {
        let Ok(entries) = std::fs::read_dir(session_dir) else {
            return Vec::new();
        };
        let mut sessions: Vec<(PathBuf, SessionMeta)> = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with("rollout-") || !name.ends_with(".jsonl") {
                continue;
            }
            let Ok(file) = File::open(&path) else {
                continue;
            };
            let mut first_line = String::new();
            if BufReader::new(file).read_line(&mut first_line).is_err() {
                continue;
            }
            let Ok(value) = serde_json::from_str::<Value>(first_line.trim()) else {
                warn!(path = %path.display(), "unreadable session file, skipping");
                continue;
            };
            if value["type"] != "session_meta" {
                continue;
            }
            if let Ok(meta) = serde_json::from_value::<SessionMeta>(value["data"].clone()) {
                sessions.push((path, meta));
            }
        }
        sessions.sort_by(|a, b| b.1.created_at.cmp(&a.1.created_at));
        sessions
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn meta_with(session_id: &str, created_at: DateTime<Utc>) -> SessionMeta {
        SessionMeta {
            session_id: session_id.into(),
            created_at,
            cwd: "/work".into(),
            model: "test-model".into(),
            user_instructions: None,
            project_docs: None,
        }
    }

    #[test]
    fn file_name_is_sortable() {
        let t = "2026-03-01T09:30:00Z".parse().unwrap();
        assert_eq!(
            rollout_file_name(t, "abc"),
            "rollout-20260301-093000-abc.jsonl"
        );
    }

    #[test]
    fn write_then_load_round_trips_messages() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rollout-x.jsonl");

        let mut rec = RolloutRecorder::open(&path).unwrap();
        rec.write_session_meta(&meta_with("s1", Utc::now())).unwrap();
        rec.write_message(&Message::system("sys")).unwrap();
        rec.write_message(&Message::user("hello")).unwrap();
        rec.write_message(&Message::assistant("hi")).unwrap();

        let (meta, messages) = RolloutRecorder::load_history(&path).unwrap();
        assert_eq!(meta.session_id, "s1");
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1].content, "hello");
        assert_eq!(messages[2].role, koda_model::Role::Assistant);
    }

    #[test]
    fn tool_linkage_survives_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rollout-x.jsonl");

        let mut rec = RolloutRecorder::open(&path).unwrap();
        rec.write_session_meta(&meta_with("s1", Utc::now())).unwrap();
        let call = koda_model::ToolCallRef::new("c9", "shell", serde_json::json!({"command": "ls"}));
        rec.write_message(&Message::assistant_with_calls("", vec![call])).unwrap();
        rec.write_message(&Message::tool("file1\nfile2", "c9")).unwrap();

        let (_, messages) = RolloutRecorder::load_history(&path).unwrap();
        let calls = messages[0].tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].call_id, "c9");
        assert_eq!(messages[1].tool_call_id.as_deref(), Some("c9"));
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rollout-x.jsonl");

        let mut rec = RolloutRecorder::open(&path).unwrap();
        rec.write_session_meta(&meta_with("s1", Utc::now())).unwrap();
        rec.write_message(&Message::user("kept")).unwrap();
        // Corrupt the file with a garbage line, then append another message.
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            writeln!(f, "{{this is not json").unwrap();
        }
        let mut rec = RolloutRecorder::open(&path).unwrap();
        rec.write_message(&Message::user("also kept")).unwrap();

        let (_, messages) = RolloutRecorder::load_history(&path).unwrap();
        assert_eq!(messages.len(), 2);
    }

    #[test]
    fn missing_meta_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rollout-x.jsonl");
        let mut rec = RolloutRecorder::open(&path).unwrap();
        rec.write_message(&Message::user("orphan")).unwrap();

        let err = RolloutRecorder::load_history(&path).unwrap_err();
        assert!(err.to_string().contains("no session metadata"));
    }

    #[test]
    fn compacted_marker_collapses_history_on_replay() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rollout-x.jsonl");

        let mut rec = RolloutRecorder::open(&path).unwrap();
        rec.write_session_meta(&meta_with("s1", Utc::now())).unwrap();
        rec.write_message(&Message::system("base prompt")).unwrap();
        rec.write_message(&Message::user("old question")).unwrap();
        rec.write_message(&Message::assistant("old answer")).unwrap();
        rec.write_compacted_marker(&CompactedMarker {
            summary: "we discussed things".into(),
            original_count: 2,
            tokens_saved: 40,
            strategy: "opencode".into(),
        })
        .unwrap();
        rec.write_message(&Message::user("new question")).unwrap();

        let (_, messages) = RolloutRecorder::load_history(&path).unwrap();
        // system + synthetic summary + post-marker message
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].content, "base prompt");
        assert!(messages[1].content.contains("[compaction summary - 2 original messages]"));
        assert!(messages[1].content.contains("we discussed things"));
        assert!(messages[1].meta_flag("compressed"));
        assert_eq!(messages[2].content, "new question");
    }

    #[test]
    fn list_sessions_sorts_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let older = Utc::now() - Duration::hours(2);
        let newer = Utc::now();

        for (id, at) in [("old", older), ("new", newer)] {
            let path = dir.path().join(rollout_file_name(at, id));
            let mut rec = RolloutRecorder::open(&path).unwrap();
            rec.write_session_meta(&meta_with(id, at)).unwrap();
        }
        // Noise that must be ignored.
        std::fs::write(dir.path().join("notes.txt"), "hi").unwrap();

        let sessions = RolloutRecorder::list_sessions(dir.path());
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].1.session_id, "new");
        assert_eq!(sessions[1].1.session_id, "old");
    }
}
