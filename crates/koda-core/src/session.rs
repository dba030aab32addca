// Copyright (c) 2025-2026 Koda Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};
use uuid::Uuid;

use koda_config::{AskForApproval, Config};
use koda_memory::{
    default_session_dir, CompactedMarker, MemoryManager, ProjectDocLoader, SessionSetup,
};
use koda_model::{ModelClient, TokenUsage, ToolSchema};
use koda_tools::{ToolContext, ToolRegistry, ToolResult, ToolSafety};

use crate::agent_turn::{self, call_signature};
use crate::compaction::{
    CompactionContext, CompactionManager, OpencodeStrategy, TokenEstimator,
};
use crate::prompts;
use crate::protocol::{Event, EventMsg, Op, ReviewDecision, Submission};

/// A tool call parked until a human decides on it.
pub(crate) struct PendingCall {
    pub submission_id: Uuid,
    pub tool_name: String,
    pub arguments: Value,
}

/// Whether a task ran to completion or parked on approvals.
#[derive(Debug, PartialEq, Eq)]
enum TaskFlow {
    Done,
    AwaitingApprovals,
}

/// One conversation: the dispatcher, the turn loop, and all shared state.
///
/// Everything here is owned by a single cooperative task, so no locking is
/// needed; the message list is consistent between any two await points.
pub(crate) struct Session {
    pub(crate) session_id: Uuid,
    pub(crate) config: Config,
    pub(crate) cwd: PathBuf,
    pub(crate) memory: MemoryManager,
    pub(crate) registry: Arc<ToolRegistry>,
    pub(crate) client: Arc<dyn ModelClient>,
    compaction: CompactionManager,
    estimator: TokenEstimator,
    events: UnboundedSender<Event>,
    interrupt: Arc<AtomicBool>,
    token_usage: TokenUsage,
    pub(crate) approval_pending: HashMap<String, PendingCall>,
    session_allowlist: HashSet<String>,
    /// Set while a task is parked on pending approvals; `task_complete` is
    /// deferred until the approvals drain and the turn loop re-enters.
    current_submission: Option<Uuid>,
    last_agent_message: Option<String>,
}

impl Session {
    pub(crate) fn new(
        config: Config,
        client: Arc<dyn ModelClient>,
        registry: Arc<ToolRegistry>,
        events: UnboundedSender<Event>,
        interrupt: Arc<AtomicBool>,
    ) -> anyhow::Result<Self> {
        let session_id = Uuid::new_v4();
        let cwd = resolve_cwd(&config);

        let project_docs = ProjectDocLoader::new(&cwd).load_as_system_block();
        let base_prompt = config
            .engine
            .base_instructions
            .clone()
            .unwrap_or_else(|| prompts::BASE_PROMPT.to_string());
        let memory = MemoryManager::new(SessionSetup {
            session_dir: config
                .engine
                .session_dir
                .clone()
                .unwrap_or_else(default_session_dir),
            session_id: session_id.to_string(),
            cwd: cwd.clone(),
            model: client.model_name().to_string(),
            base_prompt,
            user_instructions: config.engine.user_instructions.clone(),
            project_docs,
            environment: prompts::environment_block(
                &cwd,
                config.engine.approval_policy,
                config.engine.sandbox_policy,
            ),
            tool_catalogue: prompts::tool_catalogue(&registry),
            enable_rollout: config.engine.enable_memory,
        })?;

        Ok(Self::assemble(
            session_id, config, cwd, memory, client, registry, events, interrupt,
        ))
    }

    /// Rebuild a session from a rollout file; new lines append to it.
    pub(crate) fn resume(
        config: Config,
        rollout_path: &Path,
        client: Arc<dyn ModelClient>,
        registry: Arc<ToolRegistry>,
        events: UnboundedSender<Event>,
        interrupt: Arc<AtomicBool>,
    ) -> anyhow::Result<Self> {
        let memory = MemoryManager::resume(rollout_path)?;
        let session_id = memory
            .session_id
            .parse()
            .unwrap_or_else(|_| Uuid::new_v4());
        let cwd = memory.cwd.clone();
        info!(%session_id, "resumed session");
        Ok(Self::assemble(
            session_id, config, cwd, memory, client, registry, events, interrupt,
        ))
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble(
        session_id: Uuid,
        config: Config,
        cwd: PathBuf,
        memory: MemoryManager,
        client: Arc<dyn ModelClient>,
        registry: Arc<ToolRegistry>,
        events: UnboundedSender<Event>,
        interrupt: Arc<AtomicBool>,
    ) -> Self {
        let mut compaction = CompactionManager::new();
        compaction.register_strategy(Arc::new(OpencodeStrategy::new(&config.compaction)));
        if let Err(e) = compaction.set_strategy(&config.compaction.strategy) {
            warn!(error = %e, "falling back to opencode compaction strategy");
            compaction
                .set_strategy("opencode")
                .expect("opencode strategy is registered");
        }

        Self {
            session_id,
            config,
            cwd,
            memory,
            registry,
            client,
            compaction,
            estimator: TokenEstimator::new(),
            events,
            interrupt,
            token_usage: TokenUsage::default(),
            approval_pending: HashMap::new(),
            session_allowlist: HashSet::new(),
            current_submission: None,
            last_agent_message: None,
        }
    }

    /// The dispatch loop: consume submissions until the ingress closes.
    pub(crate) async fn run(mut self, mut submissions: UnboundedReceiver<Submission>) {
        self.emit(
            self.session_id,
            EventMsg::SessionConfigured {
                session_id: self.session_id.to_string(),
                model: self.client.model_name().to_string(),
                cwd: self.cwd.display().to_string(),
            },
        );

        while let Some(submission) = submissions.recv().await {
            match submission.op {
                Op::UserInput { text, cwd } => {
                    self.handle_user_input(submission.id, text, cwd).await
                }
                Op::Interrupt => self.handle_interrupt(submission.id),
                Op::ExecApproval { call_id, decision } => {
                    self.handle_approval(submission.id, call_id, decision).await
                }
            }
        }

        self.emit(self.session_id, EventMsg::ShutdownComplete);
        debug!("session dispatcher stopped");
    }

    // ── Submission handlers ──────────────────────────────────────────────────

    async fn handle_user_input(&mut self, submission_id: Uuid, text: String, cwd: Option<PathBuf>) {
        if let Some(cwd) = cwd {
            self.cwd = cwd;
        }
        self.emit(
            submission_id,
            EventMsg::TaskStarted {
                model_context_window: Some(self.config.engine.max_context_tokens as u64),
            },
        );

        if let Err(e) = self.memory.add_user(&text) {
            self.emit_rollout_error(submission_id, &e);
        }
        self.emit(submission_id, EventMsg::UserMessage { message: text });

        self.last_agent_message = None;
        match self.run_turn_loop(submission_id).await {
            TaskFlow::Done => self.finish_task(submission_id).await,
            TaskFlow::AwaitingApprovals => {
                debug!(%submission_id, "task parked awaiting approvals")
            }
        }
    }

    fn handle_interrupt(&mut self, submission_id: Uuid) {
        // When a turn consumed the flag mid-task it already emitted the
        // abort; only an interrupt that arrives while idle reports here.
        if self.interrupt.swap(false, Ordering::SeqCst) {
            self.emit(
                submission_id,
                EventMsg::TurnAborted {
                    reason: "interrupted".into(),
                },
            );
        }
    }

    async fn handle_approval(
        &mut self,
        submission_id: Uuid,
        call_id: String,
        decision: ReviewDecision,
    ) {
        let Some(pending) = self.approval_pending.remove(&call_id) else {
            self.emit(
                submission_id,
                EventMsg::Error {
                    message: format!("no pending approval for call_id {call_id}"),
                },
            );
            return;
        };
        let task_id = pending.submission_id;

        match decision {
            ReviewDecision::Denied => {
                let text = format!("User denied execution of tool: {}", pending.tool_name);
                if let Err(e) = self.memory.add_tool(&text, &call_id) {
                    self.emit_rollout_error(task_id, &e);
                }
                self.emit(
                    task_id,
                    EventMsg::ApprovalRejected {
                        call_id,
                        tool_name: pending.tool_name,
                    },
                );
            }
            ReviewDecision::Approved | ReviewDecision::ApprovedForSession => {
                if decision == ReviewDecision::ApprovedForSession {
                    self.session_allowlist
                        .insert(call_signature(&pending.tool_name, &pending.arguments));
                }
                let response = self
                    .run_tool(&pending.tool_name, &pending.arguments, task_id, &call_id)
                    .await;
                let text = response.message_text().to_string();
                if let Err(e) = self.memory.add_tool(&text, &call_id) {
                    self.emit_rollout_error(task_id, &e);
                }
                self.emit(
                    task_id,
                    EventMsg::ToolExecutionEnd {
                        call_id: call_id.clone(),
                        tool_name: pending.tool_name.clone(),
                        success: response.success,
                        result: response.success.then_some(text),
                        error: response.error,
                    },
                );
                self.emit(
                    task_id,
                    EventMsg::ApprovalComplete { call_id, decision },
                );
            }
        }

        // Once every approval for the parked task is resolved, let the model
        // continue from the new state.
        if self.approval_pending.is_empty() {
            if let Some(task_id) = self.current_submission.take() {
                if self.run_turn_loop(task_id).await == TaskFlow::Done {
                    self.finish_task(task_id).await;
                }
            }
        }
    }

    // ── Turn loop ────────────────────────────────────────────────────────────

    async fn run_turn_loop(&mut self, submission_id: Uuid) -> TaskFlow {
        let max_turns = self.config.engine.max_turns;
        if max_turns == 0 {
            self.emit_budget_error(submission_id, max_turns);
            return TaskFlow::Done;
        }

        for _turn in 0..max_turns {
            if self.take_interrupt(submission_id) {
                return TaskFlow::Done;
            }

            let result = agent_turn::execute_turn(self, submission_id).await;

            self.token_usage.add(&result.token_usage);
            self.emit(
                submission_id,
                EventMsg::TokenCount {
                    input_tokens: self.token_usage.input_tokens,
                    output_tokens: self.token_usage.output_tokens,
                    total_tokens: self.token_usage.total_tokens,
                    cached_input_tokens: self.token_usage.cached_input_tokens,
                },
            );
            if !result.text_content.is_empty() {
                self.last_agent_message = Some(result.text_content.clone());
            }

            if self.take_interrupt(submission_id) {
                return TaskFlow::Done;
            }
            if !result.has_tool_calls() {
                return TaskFlow::Done;
            }
            if result.all_calls_pending() {
                self.current_submission = Some(submission_id);
                return TaskFlow::AwaitingApprovals;
            }
        }

        self.emit_budget_error(submission_id, max_turns);
        TaskFlow::Done
    }

    async fn finish_task(&mut self, submission_id: Uuid) {
        if self.config.engine.enable_compaction {
            self.maybe_compact(submission_id).await;
        }
        self.emit(
            submission_id,
            EventMsg::TaskComplete {
                last_agent_message: self.last_agent_message.clone(),
            },
        );
        self.current_submission = None;
    }

    // ── Compaction ───────────────────────────────────────────────────────────

    async fn maybe_compact(&mut self, submission_id: Uuid) {
        let messages = self.memory.messages().to_vec();
        let ctx = CompactionContext {
            current_tokens: self.estimator.estimate_messages(&messages),
            messages,
            max_tokens: self.config.engine.max_context_tokens,
            model_name: self.client.model_name().to_string(),
            session_id: self.session_id.to_string(),
            model_client: Some(self.client.clone()),
        };

        let Some(result) = self.compaction.check_and_compact(&ctx, false).await else {
            return;
        };
        if !result.success {
            self.emit(
                submission_id,
                EventMsg::Error {
                    message: format!(
                        "compaction failed: {}",
                        result.error.as_deref().unwrap_or("unknown error")
                    ),
                },
            );
            return;
        }

        let summarized = result.summarized_count();
        if summarized > 0 {
            let marker = CompactedMarker {
                summary: result.summary().unwrap_or_default().to_string(),
                original_count: summarized,
                tokens_saved: result.tokens_saved,
                strategy: result.strategy_name.clone(),
            };
            // Marker first, then the in-memory swap, so a replayed rollout
            // reproduces exactly this ordering.
            if let Err(e) = self.memory.record_compaction(&marker) {
                self.emit_rollout_error(submission_id, &e);
            }
            if let Err(e) = self.memory.replace_messages(result.new_messages, false) {
                self.emit_rollout_error(submission_id, &e);
            }
        } else if result.prune_count() > 0 {
            // Prune-only pass: tool outputs were cleared in place, nothing
            // was summarized, so there is no marker to record.
            if let Err(e) = self.memory.replace_messages(result.new_messages, false) {
                self.emit_rollout_error(submission_id, &e);
            }
        }
    }

    // ── Shared helpers ───────────────────────────────────────────────────────

    pub(crate) fn emit(&self, id: Uuid, msg: EventMsg) {
        let _ = self.events.send(Event::new(id, msg));
    }

    pub(crate) fn emit_rollout_error(&self, id: Uuid, error: &anyhow::Error) {
        self.emit(
            id,
            EventMsg::Error {
                message: format!("rollout write failed: {error}"),
            },
        );
    }

    fn emit_budget_error(&self, id: Uuid, max_turns: u32) {
        self.emit(
            id,
            EventMsg::Error {
                message: format!("turn budget exceeded ({max_turns} turns); stopping this task"),
            },
        );
    }

    /// Non-consuming view of the interrupt flag, used between tool
    /// executions inside a turn.
    pub(crate) fn interrupt_requested(&self) -> bool {
        self.interrupt.load(Ordering::SeqCst)
    }

    /// Consume the interrupt flag; emits the abort event when it was set.
    fn take_interrupt(&mut self, submission_id: Uuid) -> bool {
        if self.interrupt.swap(false, Ordering::SeqCst) {
            self.emit(
                submission_id,
                EventMsg::TurnAborted {
                    reason: "interrupted".into(),
                },
            );
            return true;
        }
        false
    }

    /// Approval matrix: the policy is advisory, combined with each tool's
    /// declared safety.  A session-allowlisted signature always passes.
    pub(crate) fn needs_approval(&self, tool_name: &str, arguments: &Value) -> bool {
        if self
            .session_allowlist
            .contains(&call_signature(tool_name, arguments))
        {
            return false;
        }
        match self.config.engine.approval_policy {
            AskForApproval::Never | AskForApproval::OnFailure => false,
            AskForApproval::OnRequest => self
                .registry
                .get_info(tool_name)
                .map(|info| info.safety == ToolSafety::Mutating)
                .unwrap_or(false),
            AskForApproval::UnlessTrusted => self
                .registry
                .get_info(tool_name)
                .map(|info| info.safety != ToolSafety::ReadOnly)
                .unwrap_or(true),
        }
    }

    /// Dispatch one call through the registry, normalizing the
    /// unknown-or-disabled case into a failure result.
    pub(crate) async fn run_tool(
        &self,
        tool_name: &str,
        arguments: &Value,
        submission_id: Uuid,
        call_id: &str,
    ) -> ToolResult {
        let ctx = ToolContext {
            session_id: self.session_id.to_string(),
            message_id: submission_id.to_string(),
            agent: "agent_turn".into(),
            call_id: Some(call_id.to_string()),
            cwd: self.cwd.clone(),
            sandbox_policy: self.config.engine.sandbox_policy,
        };
        match self.registry.execute(tool_name, arguments, &ctx).await {
            Some(result) => result,
            None => ToolResult::err(
                tool_name,
                format!("unknown or disabled tool: {tool_name}"),
            ),
        }
    }

    /// Enabled-tool catalogue in the model crate's schema shape.
    pub(crate) fn model_tool_schemas(&self) -> Vec<ToolSchema> {
        self.registry
            .schema_list()
            .into_iter()
            .map(|s| ToolSchema {
                name: s.name,
                description: s.description,
                parameters: s.parameters,
            })
            .collect()
    }
}

fn resolve_cwd(config: &Config) -> PathBuf {
    config
        .engine
        .cwd
        .clone()
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
}
