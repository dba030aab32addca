// Copyright (c) 2025-2026 Koda Contributors
//
// SPDX-License-Identifier: Apache-2.0
pub mod builtin;
mod registry;
mod tool;

pub use registry::{ToolInfo, ToolRegistry, ToolSchema};
pub use tool::{Tool, ToolContext, ToolResult, ToolSafety};

pub use builtin::grep::GrepTool;
pub use builtin::list_dir::ListDirTool;
pub use builtin::read_file::ReadFileTool;
pub use builtin::shell::ShellTool;
pub use builtin::write_file::WriteFileTool;

/// Registry pre-loaded with every built-in tool.
pub fn default_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(std::sync::Arc::new(ShellTool::default()));
    registry.register(std::sync::Arc::new(ReadFileTool));
    registry.register(std::sync::Arc::new(WriteFileTool));
    registry.register(std::sync::Arc::new(ListDirTool));
    registry.register(std::sync::Arc::new(GrepTool));
    registry
}
