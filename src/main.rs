// Copyright (c) 2025-2026 Koda Contributors
//
// SPDX-License-Identifier: Apache-2.0
mod cli;

use std::io::{self, BufRead, Read, Write};

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};
use koda_core::{Engine, Event, EventMsg};
use koda_memory::{default_session_dir, RolloutRecorder};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Some(cmd) = &cli.command {
        match cmd {
            Commands::Sessions { limit } => {
                print_sessions(&cli, *limit);
                return Ok(());
            }
            Commands::ShowConfig => {
                let config = koda_config::load(cli.config.as_deref())?;
                println!("{}", serde_yaml::to_string(&config).unwrap_or_default());
                return Ok(());
            }
        }
    }

    let mut config = koda_config::load(cli.config.as_deref())?;
    if let Some(model) = &cli.model {
        config.model.name = model.clone();
    }
    if let Some(cwd) = &cli.cwd {
        config.engine.cwd = Some(cwd.clone());
    }

    let prompt = match &cli.prompt {
        Some(p) => p.clone(),
        None => read_stdin_prompt()?,
    };

    let mut engine = match &cli.resume {
        Some(path) => Engine::resume(config, path).context("resuming session")?,
        None => Engine::start(config).context("starting engine")?,
    };

    engine.submit_user_input(prompt);
    drive_events(&mut engine).await?;
    engine.stop().await;
    Ok(())
}

fn init_logging(verbose: bool) {
    if !verbose && std::env::var("RUST_LOG").is_err() {
        return;
    }
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn read_stdin_prompt() -> anyhow::Result<String> {
    let mut input = String::new();
    io::stdin()
        .read_to_string(&mut input)
        .context("reading prompt from stdin")?;
    let input = input.trim().to_string();
    anyhow::ensure!(!input.is_empty(), "no prompt given (argument or stdin)");
    Ok(input)
}

/// Print events until the task completes, answering approval requests
/// interactively.
async fn drive_events(engine: &mut Engine) -> anyhow::Result<()> {
    while let Some(Event { msg, .. }) = engine.next_event().await {
        match msg {
            EventMsg::SessionConfigured { session_id, model, .. } => {
                eprintln!("session {session_id} ({model})");
            }
            EventMsg::AgentMessage { message } => println!("{message}"),
            EventMsg::ToolExecutionBegin { tool_name, .. } => {
                eprintln!("→ running {tool_name}");
            }
            EventMsg::ToolExecutionEnd {
                tool_name, success, ..
            } => {
                eprintln!("← {tool_name} {}", if success { "ok" } else { "failed" });
            }
            EventMsg::ApprovalRequest {
                call_id,
                tool_name,
                arguments,
                ..
            } => {
                let decision = ask_approval(&tool_name, &arguments)?;
                match decision {
                    Answer::Yes => engine.approve(call_id, true),
                    Answer::Always => {
                        engine.approve_with(call_id, koda_core::ReviewDecision::ApprovedForSession)
                    }
                    Answer::No => engine.approve(call_id, false),
                };
            }
            EventMsg::Error { message } => eprintln!("error: {message}"),
            EventMsg::TurnAborted { reason } => {
                eprintln!("aborted: {reason}");
                break;
            }
            EventMsg::TaskComplete { .. } => break,
            _ => {}
        }
    }
    Ok(())
}

enum Answer {
    Yes,
    No,
    Always,
}

fn ask_approval(tool_name: &str, arguments: &serde_json::Value) -> anyhow::Result<Answer> {
    eprint!("approve {tool_name} {arguments}? [y/N/a] ");
    io::stderr().flush().ok();
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line).context("reading approval answer")?;
    Ok(match line.trim().to_lowercase().as_str() {
        "y" | "yes" => Answer::Yes,
        "a" | "always" => Answer::Always,
        _ => Answer::No,
    })
}

fn print_sessions(cli: &Cli, limit: usize) {
    let dir = koda_config::load(cli.config.as_deref())
        .ok()
        .and_then(|c| c.engine.session_dir)
        .unwrap_or_else(default_session_dir);
    let sessions = RolloutRecorder::list_sessions(&dir);
    if sessions.is_empty() {
        println!("no saved sessions in {}", dir.display());
        return;
    }
    for (path, meta) in sessions.into_iter().take(limit) {
        println!(
            "{}  {}  {}  {}",
            meta.created_at.format("%Y-%m-%d %H:%M:%S"),
            meta.session_id,
            meta.model,
            path.display()
        );
    }
}

