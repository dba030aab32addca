// Copyright (c) 2025-2026 Koda Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Interactive AI coding-assistant engine.
#[derive(Parser, Debug)]
#[command(name = "koda", version, about)]
pub struct Cli {
    /// Prompt to send to the agent.  Reads stdin when omitted and no
    /// subcommand is given.
    pub prompt: Option<String>,

    /// Path to an explicit config file (merged over the discovered layers).
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Model name override.
    #[arg(long, short = 'm')]
    pub model: Option<String>,

    /// Working directory for the session.
    #[arg(long)]
    pub cwd: Option<PathBuf>,

    /// Resume a previous session from its rollout file.
    #[arg(long)]
    pub resume: Option<PathBuf>,

    /// Write tracing output to stderr (filtered by RUST_LOG).
    #[arg(long, short = 'v')]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List saved sessions, newest first.
    Sessions {
        /// Maximum number of sessions to print.
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Print the effective configuration and exit.
    ShowConfig,
}
