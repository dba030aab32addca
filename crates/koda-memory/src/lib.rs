// Copyright (c) 2025-2026 Koda Contributors
//
// SPDX-License-Identifier: Apache-2.0
mod manager;
mod models;
mod project_doc;
mod recorder;

pub use manager::{MemoryManager, MemoryStats, SessionSetup};
pub use models::{CompactedMarker, RolloutKind, RolloutLine, SessionMeta};
pub use project_doc::ProjectDocLoader;
pub use recorder::{default_session_dir, RolloutRecorder};
