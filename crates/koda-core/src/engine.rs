// Copyright (c) 2025-2026 Koda Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

use koda_config::Config;
use koda_model::{MockClient, ModelClient, OpenAiClient};
use koda_tools::ToolRegistry;

use crate::protocol::{Event, Op, ReviewDecision, Submission};
use crate::session::Session;

/// Owns one session and its dispatcher task.
///
/// The only externally observable surface of a running session: push
/// [`Op`]s in with [`Engine::submit`], pull [`Event`]s out with
/// [`Engine::next_event`].  Must be created inside a tokio runtime.
pub struct Engine {
    submission_tx: Option<UnboundedSender<Submission>>,
    events_rx: UnboundedReceiver<Event>,
    interrupt: Arc<AtomicBool>,
    dispatcher: JoinHandle<()>,
}

impl Engine {
    /// Start a fresh session with the default tool set and the model client
    /// selected by the config.  Fails only on fatal initialization problems
    /// (e.g. a missing API key).
    pub fn start(config: Config) -> anyhow::Result<Self> {
        let client: Arc<dyn ModelClient> = build_client(&config)?;
        let registry = Arc::new(koda_tools::default_registry());
        Self::with_parts(config, client, registry)
    }

    /// Start with an explicit client and registry (tests, embedders).
    pub fn with_parts(
        config: Config,
        client: Arc<dyn ModelClient>,
        registry: Arc<ToolRegistry>,
    ) -> anyhow::Result<Self> {
        let (submission_tx, submission_rx) = mpsc::unbounded_channel();
        let (event_tx, events_rx) = mpsc::unbounded_channel();
        let interrupt = Arc::new(AtomicBool::new(false));

        let session = Session::new(config, client, registry, event_tx, interrupt.clone())?;
        let dispatcher = tokio::spawn(session.run(submission_rx));

        Ok(Self {
            submission_tx: Some(submission_tx),
            events_rx,
            interrupt,
            dispatcher,
        })
    }

    /// Reconstruct an engine from a rollout file and continue appending to
    /// the same file.
    pub fn resume(config: Config, rollout_path: &Path) -> anyhow::Result<Self> {
        let client: Arc<dyn ModelClient> = build_client(&config)?;
        let registry = Arc::new(koda_tools::default_registry());
        Self::resume_with_parts(config, rollout_path, client, registry)
    }

    pub fn resume_with_parts(
        config: Config,
        rollout_path: &Path,
        client: Arc<dyn ModelClient>,
        registry: Arc<ToolRegistry>,
    ) -> anyhow::Result<Self> {
        let (submission_tx, submission_rx) = mpsc::unbounded_channel();
        let (event_tx, events_rx) = mpsc::unbounded_channel();
        let interrupt = Arc::new(AtomicBool::new(false));

        let session = Session::resume(
            config,
            rollout_path,
            client,
            registry,
            event_tx,
            interrupt.clone(),
        )?;
        let dispatcher = tokio::spawn(session.run(submission_rx));

        Ok(Self {
            submission_tx: Some(submission_tx),
            events_rx,
            interrupt,
            dispatcher,
        })
    }

    /// Enqueue an operation; returns its submission id.
    pub fn submit(&self, op: Op) -> Uuid {
        let submission = Submission::new(op);
        let id = submission.id;
        if let Some(tx) = &self.submission_tx {
            let _ = tx.send(submission);
        }
        id
    }

    pub fn submit_user_input(&self, text: impl Into<String>) -> Uuid {
        self.submit(Op::UserInput {
            text: text.into(),
            cwd: None,
        })
    }

    /// Resolve a pending tool call.
    pub fn approve(&self, call_id: impl Into<String>, approved: bool) -> Uuid {
        let decision = if approved {
            ReviewDecision::Approved
        } else {
            ReviewDecision::Denied
        };
        self.approve_with(call_id, decision)
    }

    pub fn approve_with(&self, call_id: impl Into<String>, decision: ReviewDecision) -> Uuid {
        self.submit(Op::ExecApproval {
            call_id: call_id.into(),
            decision,
        })
    }

    /// Abort the active turn at its next cooperative yield point.
    pub fn interrupt(&self) -> Uuid {
        self.interrupt.store(true, Ordering::SeqCst);
        self.submit(Op::Interrupt)
    }

    /// Next event from the egress queue; `None` once the session has shut
    /// down and the queue is drained.
    pub async fn next_event(&mut self) -> Option<Event> {
        self.events_rx.recv().await
    }

    /// Close the ingress and wait for the dispatcher to finish.  Remaining
    /// events (ending with `shutdown_complete`) stay readable via
    /// [`Engine::next_event`].
    pub async fn stop(&mut self) {
        self.submission_tx.take();
        debug!("waiting for session dispatcher to stop");
        let _ = (&mut self.dispatcher).await;
    }
}

fn build_client(config: &Config) -> anyhow::Result<Arc<dyn ModelClient>> {
    match config.model.provider.as_str() {
        "mock" => Ok(Arc::new(MockClient)),
        _ => Ok(Arc::new(OpenAiClient::from_config(&config.model)?)),
    }
}
