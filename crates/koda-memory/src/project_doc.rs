// Copyright (c) 2025-2026 Koda Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

/// File names searched for project guidance, highest priority first.
const DEFAULT_FILENAMES: &[&str] = &["AGENTS.override.md", "AGENTS.md", ".agent.md"];

/// Byte cap applied to the loaded document.
const MAX_SIZE: usize = 32 * 1024;

/// Discovers project guidance markdown in the working directory and renders
/// it for inclusion in the initial system message.
pub struct ProjectDocLoader {
    cwd: PathBuf,
    max_size: usize,
}

impl ProjectDocLoader {
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self {
            cwd: cwd.into(),
            max_size: MAX_SIZE,
        }
    }

    /// First matching doc file in the working directory, if any.
    fn discover(&self) -> Option<PathBuf> {
        for name in DEFAULT_FILENAMES {
            let path = self.cwd.join(name);
            if path.is_file() {
                info!(path = %path.display(), "found project doc");
                return Some(path);
            }
        }
        debug!(cwd = %self.cwd.display(), "no project doc found");
        None
    }

    /// Load the doc content, truncated to the size cap.
    pub fn load(&self) -> Option<String> {
        let path = self.discover()?;
        let text = match std::fs::read_to_string(&path) {
            Ok(t) => t,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot read project doc");
                return None;
            }
        };
        let mut text = text;
        if text.len() > self.max_size {
            warn!(path = %path.display(), "project doc truncated to size cap");
            let mut cut = self.max_size;
            while !text.is_char_boundary(cut) {
                cut -= 1;
            }
            text.truncate(cut);
        }
        let name = path.file_name().map(|n| n.to_string_lossy().into_owned())?;
        Some(format!("# {name}\n{text}"))
    }

    /// Load and wrap for the system message.
    pub fn load_as_system_block(&self) -> Option<String> {
        let docs = self.load()?;
        Some(format!(
            "## Project documentation\n\n\
             Project-specific rules and conventions follow; respect them when\n\
             assisting the user.\n\n{docs}"
        ))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
