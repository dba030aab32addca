// Copyright (c) 2025-2026 Koda Contributors
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Map};
use tracing::{debug, info, warn};

use koda_config::CompactionConfig;
use koda_model::{Message, Role};

use super::strategy::{CompactResult, CompactionContext, CompactionStrategy, StrategyInfo};
use super::utils::TokenEstimator;

/// Replacement content for pruned tool outputs.
pub const PRUNE_SENTINEL: &str = "[Old tool result content cleared]";

const RECOVERY_PROMPT: &str =
    "Use the above summary to continue our conversation from where we left off.";

const SUMMARY_SYSTEM_PROMPT: &str =
    "You are a conversation summarization assistant. Extract the key information \
     from the conversation and produce a concise, information-dense summary.";

/// Minimum non-whitespace characters an acceptable summary must have.
const MIN_SUMMARY_CHARS: usize = 10;

/// Two-phase Prune + Summarize compaction.
///
/// Phase 1 clears stale tool outputs while preserving the shape of the
/// conversation; phase 2 replaces the long prefix with a generated summary
/// followed by a recovery prompt and the most recent turns.
pub struct OpencodeStrategy {
    prune_protect: usize,
    protect_turns: usize,
    auto_threshold: f32,
    estimator: TokenEstimator,
}

struct PruneStats {
    pruned_count: usize,
    pruned_tokens: usize,
}

impl OpencodeStrategy {
    pub fn new(cfg: &CompactionConfig) -> Self {
        Self {
            prune_protect: cfg.prune_protect,
            protect_turns: cfg.protect_turns,
            auto_threshold: cfg.auto_threshold,
            estimator: TokenEstimator::new(),
        }
    }

    /// Phase 1: walk back-to-front and clear tool outputs that are older
    /// than the protected turns and past the protected token budget.
    ///
    /// The assistant message holding the matching `tool_calls` entry is left
    /// unchanged, so the tool/assistant linkage invariant still holds.
    fn prune(&self, messages: &mut [Message]) -> PruneStats {
        let mut turn_count = 0usize;
        let mut scanned_tokens = 0usize;
        let mut pruned_count = 0usize;
        let mut pruned_tokens = 0usize;

        'walk: for i in (0..messages.len()).rev() {
            let msg = &messages[i];
            if msg.role == Role::User {
                turn_count += 1;
            }
            if turn_count < self.protect_turns {
                continue;
            }
            match msg.role {
                // A prior summary bounds the walk; everything before it was
                // already folded away.
                Role::Assistant if msg.meta_flag("summary") => break 'walk,
                Role::Tool => {
                    // An already-pruned result means an earlier pass covered
                    // everything older.
                    if msg.metadata.contains_key("compacted_at") {
                        break 'walk;
                    }
                    let tokens = self.estimator.estimate(&msg.content);
                    scanned_tokens += tokens;
                    if scanned_tokens > self.prune_protect {
                        let msg = &mut messages[i];
                        msg.content = PRUNE_SENTINEL.to_string();
                        msg.metadata
                            .insert("compacted_at".into(), json!(Utc::now().to_rfc3339()));
                        pruned_count += 1;
                        pruned_tokens += tokens;
                    }
                }
                _ => {}
            }
        }

        if pruned_count > 0 {
            info!(
                pruned = pruned_count,
                tokens = pruned_tokens,
                "cleared stale tool outputs"
            );
        }
        PruneStats {
            pruned_count,
            pruned_tokens,
        }
    }

    /// Messages after the most recent summary (exclusive), non-system only.
    /// With no prior summary, every non-system message qualifies.
    fn filter_summarized(messages: &[Message]) -> Vec<Message> {
        let last_summary = messages
            .iter()
            .rposition(|m| m.role == Role::Assistant && m.meta_flag("summary"));
        let tail = match last_summary {
            Some(idx) => &messages[idx + 1..],
            None => messages,
        };
        tail.iter()
            .filter(|m| m.role != Role::System)
            .cloned()
            .collect()
    }

    fn build_summary_prompt(to_summarize: &[Message]) -> String {
        let conversation: Vec<String> = to_summarize
            .iter()
            .map(|m| format!("[{}]: {}", m.role, m.content))
            .collect();
        format!(
            "Provide a detailed but concise summary of our conversation above.\n\n\
             Focus on information that would be helpful for continuing the \
             conversation, including:\n\
             - What we did\n\
             - What we're doing\n\
             - Which files we're working on\n\
             - What we're going to do next\n\n\
             Conversation:\n{}",
            conversation.join("\n")
        )
    }

    /// Phase 2: generate the summary and rebuild the message list as
    /// system messages + summary + recovery prompt + recent turns.
    ///
    /// Returns the rebuilt list plus `(summarized_count, summary)`; a
    /// `(0, None)` marks the nothing-to-summarize no-op.
    async fn summarize(
        &self,
        messages: Vec<Message>,
        ctx: &CompactionContext,
    ) -> anyhow::Result<(Vec<Message>, usize, Option<String>)> {
        let to_summarize = Self::filter_summarized(&messages);
        if to_summarize.is_empty() {
            return Ok((messages, 0, None));
        }

        let client = ctx
            .model_client
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("no model client available for summarization"))?;

        // The summarization call uses a throwaway message list; the
        // session's own history is read-only during compaction.
        let request = vec![
            Message::system(SUMMARY_SYSTEM_PROMPT),
            Message::user(Self::build_summary_prompt(&to_summarize)),
        ];
        let response = client.chat_completion(&request, &[]).await?;
        let summary = response.content.trim().to_string();
        let significant = summary.chars().filter(|c| !c.is_whitespace()).count();
        if significant < MIN_SUMMARY_CHARS {
            anyhow::bail!("summary too short: {significant} non-whitespace characters");
        }
        info!(
            summarized = to_summarize.len(),
            summary_len = summary.len(),
            "generated compaction summary"
        );

        let mut rebuilt: Vec<Message> = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .cloned()
            .collect();
        rebuilt.push(Message::assistant(&summary).with_meta("summary", json!(true)));
        rebuilt.push(Message::user(RECOVERY_PROMPT).with_meta("recovery_prompt", json!(true)));
        rebuilt.extend(get_recent_turns(&messages, self.protect_turns));

        Ok((rebuilt, to_summarize.len(), Some(summary)))
    }
}

/// The most recent `n_turns` complete turns, in chronological order.
///
/// A turn is delimited by user messages; walking backward from the tail,
/// messages are included until `n_turns` user messages have been passed.
/// System messages and anything tagged `summary` or `recovery_prompt` are
/// skipped.
pub(crate) fn get_recent_turns(messages: &[Message], n_turns: usize) -> Vec<Message> {
    if n_turns == 0 {
        return Vec::new();
    }
    let mut recent = Vec::new();
    let mut turn_count = 0usize;
    for msg in messages.iter().rev() {
        if msg.role == Role::System || msg.meta_flag("summary") || msg.meta_flag("recovery_prompt")
        {
            continue;
        }
        if msg.role == Role::User {
            turn_count += 1;
            if turn_count > n_turns {
                break;
            }
        }
        recent.insert(0, msg.clone());
    }
    recent
}

#[async_trait]
impl CompactionStrategy for OpencodeStrategy {
    fn should_compact(&self, ctx: &CompactionContext) -> bool {
        if ctx.max_tokens == 0 {
            return false;
        }
        let ratio = ctx.current_tokens as f32 / ctx.max_tokens as f32;
        let should = ratio >= self.auto_threshold;
        debug!(
            current = ctx.current_tokens,
            max = ctx.max_tokens,
            ratio,
            should,
            "compaction trigger check"
        );
        should
    }

    async fn compact(&self, ctx: &CompactionContext) -> CompactResult {
        let mut messages = ctx.messages.clone();
        let initial_count = messages.len();
        let initial_tokens = ctx.current_tokens;

        let prune = self.prune(&mut messages);

        let (new_messages, summarized_count, summary) =
            match self.summarize(messages, ctx).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(error = %e, "compaction failed, keeping original messages");
                    return CompactResult::failure("opencode", ctx.messages.clone(), e.to_string());
                }
            };

        let final_tokens = self.estimator.estimate_messages(&new_messages) as i64;
        let tokens_saved = initial_tokens as i64 - final_tokens;
        let compression_ratio = if initial_tokens > 0 {
            1.0 - final_tokens as f64 / initial_tokens as f64
        } else {
            0.0
        };

        let mut metadata = Map::new();
        metadata.insert("prune_count".into(), json!(prune.pruned_count));
        metadata.insert("pruned_tokens".into(), json!(prune.pruned_tokens));
        metadata.insert("compression_ratio".into(), json!(compression_ratio));
        metadata.insert("summarized_count".into(), json!(summarized_count));
        if let Some(summary) = summary {
            metadata.insert("summary".into(), json!(summary));
        }

        CompactResult {
            success: true,
            removed_count: initial_count as i64 - new_messages.len() as i64,
            tokens_saved,
            strategy_name: "opencode".into(),
            metadata,
            new_messages,
            error: None,
        }
    }

    fn metadata(&self) -> StrategyInfo {
        StrategyInfo {
            name: "opencode".into(),
            version: "1.0.0".into(),
            description: "Two-phase compaction: prune stale tool outputs, then replace the \
                          summarized prefix with a generated checkpoint"
                .into(),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use koda_model::{ScriptedModelClient, ToolCallRef};

    use super::*;

    fn strategy() -> OpencodeStrategy {
        OpencodeStrategy::new(&CompactionConfig::default())
    }

    fn ctx_with(
        messages: Vec<Message>,
        current_tokens: usize,
        max_tokens: usize,
        client: Option<Arc<dyn koda_model::ModelClient>>,
    ) -> CompactionContext {
        CompactionContext {
            messages,
            current_tokens,
            max_tokens,
            model_name: "test-model".into(),
            session_id: "session".into(),
            model_client: client,
        }
    }

    /// `n` turns of user → assistant(tool call) → tool result, each tool
    /// result `output_bytes` long.
    fn turns_with_tool_output(n: usize, output_bytes: usize) -> Vec<Message> {
        let mut messages = vec![Message::system("base prompt")];
        for i in 0..n {
            let call_id = format!("call-{i}");
            messages.push(Message::user(format!("request {i}")));
            messages.push(Message::assistant_with_calls(
                "",
                vec![ToolCallRef::new(&call_id, "shell", json!({"command": "make"}))],
            ));
            messages.push(Message::tool("o".repeat(output_bytes), &call_id));
        }
        messages
    }

    // ── should_compact (TR-3) ─────────────────────────────────────────────────

    #[test]
    fn trigger_is_deterministic_in_ratio() {
        let s = strategy();
        assert!(s.should_compact(&ctx_with(vec![], 750, 1000, None)));
        assert!(s.should_compact(&ctx_with(vec![], 900, 1000, None)));
        assert!(!s.should_compact(&ctx_with(vec![], 749, 1000, None)));
        assert!(!s.should_compact(&ctx_with(vec![], 100, 0, None)));
    }

    // ── Prune ─────────────────────────────────────────────────────────────────

    #[test]
    fn prune_clears_old_tool_outputs_only() {
        let s = strategy();
        // 5 turns × 60 KB tool output = 15 000 tokens each.
        let mut messages = turns_with_tool_output(5, 60_000);
        let stats = s.prune(&mut messages);

        assert_eq!(stats.pruned_count, 3);
        // Turn indices 0-2 pruned, 3-4 (the protected recent turns) intact.
        for i in 0..5 {
            let tool_msg = &messages[1 + i * 3 + 2];
            assert_eq!(tool_msg.role, Role::Tool);
            if i < 3 {
                assert_eq!(tool_msg.content, PRUNE_SENTINEL);
                assert!(tool_msg.metadata.contains_key("compacted_at"));
            } else {
                assert!(tool_msg.content.starts_with("oo"));
                assert!(!tool_msg.metadata.contains_key("compacted_at"));
            }
        }
    }

    #[test]
    fn prune_leaves_assistant_tool_calls_untouched() {
        let s = strategy();
        let mut messages = turns_with_tool_output(5, 60_000);
        s.prune(&mut messages);
        // Every assistant message still declares its call so the
        // tool/assistant linkage invariant holds.
        for i in 0..5 {
            let assistant = &messages[1 + i * 3 + 1];
            assert!(assistant.tool_calls.is_some());
        }
    }

    #[test]
    fn prune_respects_protected_token_budget() {
        let s = strategy();
        // 4 turns × 1 KB = 250 tokens each; scanned total never exceeds
        // prune_protect (10 000), so nothing is eligible.
        let mut messages = turns_with_tool_output(4, 1_000);
        let stats = s.prune(&mut messages);
        assert_eq!(stats.pruned_count, 0);
        assert!(messages.iter().all(|m| m.content != PRUNE_SENTINEL));
    }

    #[test]
    fn prune_applies_even_for_small_eligible_volumes() {
        // Eligibility is per message: once the scanned tool-output total
        // passes prune_protect, everything older is cleared regardless of
        // how little it adds up to.
        let cfg = CompactionConfig {
            prune_protect: 500,
            ..CompactionConfig::default()
        };
        let s = OpencodeStrategy::new(&cfg);
        // 5 turns × 1 KB = 250 tokens each; turns 0-2 are past the protected
        // window, and the third scanned message crosses the 500-token budget.
        let mut messages = turns_with_tool_output(5, 1_000);
        let stats = s.prune(&mut messages);
        assert_eq!(stats.pruned_count, 1);
        assert_eq!(messages[3].content, PRUNE_SENTINEL);
    }

    #[test]
    fn prune_stops_at_prior_summary() {
        let s = strategy();
        let mut messages = vec![Message::system("sys")];
        // Old pre-summary turn that must never be touched.
        messages.push(Message::user("ancient"));
        messages.push(Message::assistant_with_calls(
            "",
            vec![ToolCallRef::new("c-old", "shell", json!({}))],
        ));
        messages.push(Message::tool("x".repeat(60_000), "c-old"));
        messages.push(Message::assistant("summary text").with_meta("summary", json!(true)));
        messages.extend(turns_with_tool_output(4, 60_000).split_off(1));

        s.prune(&mut messages);
        assert!(
            messages[3].content.starts_with("xx"),
            "tool output behind a summary must stay intact"
        );
    }

    // ── Recent turns (TI-4) ───────────────────────────────────────────────────

    #[test]
    fn recent_turns_is_contiguous_suffix_with_at_most_n_user_messages() {
        let messages = turns_with_tool_output(5, 10);
        let recent = get_recent_turns(&messages, 2);

        let user_count = recent.iter().filter(|m| m.role == Role::User).count();
        assert_eq!(user_count, 2);
        // Exactly the last two turns, chronological order.
        assert_eq!(recent.len(), 6);
        assert_eq!(recent[0].content, "request 3");
        assert_eq!(recent[3].content, "request 4");
        // Suffix property: the slice equals the tail of the original.
        let tail = &messages[messages.len() - 6..];
        for (a, b) in recent.iter().zip(tail) {
            assert_eq!(a.content, b.content);
        }
    }

    #[test]
    fn recent_turns_skips_summary_and_recovery_markers() {
        let mut messages = vec![Message::system("sys")];
        messages.push(Message::assistant("old summary").with_meta("summary", json!(true)));
        messages.push(Message::user(RECOVERY_PROMPT).with_meta("recovery_prompt", json!(true)));
        messages.push(Message::user("real question"));
        messages.push(Message::assistant("real answer"));

        let recent = get_recent_turns(&messages, 2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].content, "real question");
    }

    #[test]
    fn recent_turns_zero_is_empty() {
        assert!(get_recent_turns(&turns_with_tool_output(3, 10), 0).is_empty());
    }

    // ── Compact (TI-3, failure paths) ─────────────────────────────────────────

    #[tokio::test]
    async fn compact_produces_one_summary_and_one_recovery_prompt() {
        let s = strategy();
        let client: Arc<dyn koda_model::ModelClient> = Arc::new(
            ScriptedModelClient::always_text("We refactored the parser and fixed two tests."),
        );
        let messages = turns_with_tool_output(5, 100);
        let initial_count = messages.len();
        let result = s
            .compact(&ctx_with(messages, 1_000, 1_000, Some(client)))
            .await;

        assert!(result.success);
        let summaries = result
            .new_messages
            .iter()
            .filter(|m| m.meta_flag("summary"))
            .count();
        let recoveries = result
            .new_messages
            .iter()
            .filter(|m| m.meta_flag("recovery_prompt"))
            .count();
        assert_eq!(summaries, 1);
        assert_eq!(recoveries, 1);
        // System messages come first, unchanged.
        assert_eq!(result.new_messages[0].role, Role::System);
        assert_eq!(result.new_messages[0].content, "base prompt");
        // summary + recovery + 2 protected turns (3 messages each) + system
        assert_eq!(result.new_messages.len(), 1 + 2 + 6);
        assert_eq!(result.removed_count, initial_count as i64 - 9);
        assert_eq!(result.summarized_count(), 15);
        assert_eq!(result.summary().unwrap(), "We refactored the parser and fixed two tests.");
    }

    #[tokio::test]
    async fn compact_without_client_fails_and_keeps_messages() {
        let s = strategy();
        let messages = turns_with_tool_output(3, 100);
        let result = s
            .compact(&ctx_with(messages.clone(), 1_000, 1_000, None))
            .await;
        assert!(!result.success);
        assert_eq!(result.new_messages.len(), messages.len());
        assert!(result.error.unwrap().contains("no model client"));
    }

    #[tokio::test]
    async fn too_short_summary_fails_the_compaction() {
        let s = strategy();
        let client: Arc<dyn koda_model::ModelClient> =
            Arc::new(ScriptedModelClient::always_text("ok"));
        let messages = turns_with_tool_output(3, 100);
        let result = s
            .compact(&ctx_with(messages.clone(), 1_000, 1_000, Some(client)))
            .await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("summary too short"));
        // Original list retained, no summary message introduced.
        assert_eq!(result.new_messages.len(), messages.len());
        assert!(!result.new_messages.iter().any(|m| m.meta_flag("summary")));
    }

    #[tokio::test]
    async fn nothing_to_summarize_is_a_clean_noop() {
        let s = strategy();
        let messages = vec![Message::system("only system content")];
        let result = s
            .compact(&ctx_with(messages, 10, 1_000, None))
            .await;
        assert!(result.success);
        assert_eq!(result.summarized_count(), 0);
        assert!(result.summary().is_none());
        assert_eq!(result.new_messages.len(), 1);
    }

    #[tokio::test]
    async fn new_summary_supersedes_the_previous_one() {
        let s = strategy();
        let client: Arc<dyn koda_model::ModelClient> = Arc::new(
            ScriptedModelClient::always_text("Second checkpoint covering the latest work."),
        );
        let mut messages = vec![Message::system("sys")];
        messages.push(Message::assistant("first checkpoint").with_meta("summary", json!(true)));
        messages.push(Message::user(RECOVERY_PROMPT).with_meta("recovery_prompt", json!(true)));
        messages.extend(turns_with_tool_output(3, 100).split_off(1));

        let result = s
            .compact(&ctx_with(messages, 1_000, 1_000, Some(client)))
            .await;
        assert!(result.success);
        let summaries: Vec<&Message> = result
            .new_messages
            .iter()
            .filter(|m| m.meta_flag("summary"))
            .collect();
        assert_eq!(summaries.len(), 1, "summaries must not accumulate");
        assert!(summaries[0].content.contains("Second checkpoint"));
    }
}
