// Copyright (c) 2025-2026 Koda Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::{Tool, ToolContext, ToolResult, ToolSafety};

/// A tool schema — mirrors `koda_model::ToolSchema` but keeps the tools
/// crate independent from the model crate.
#[derive(Debug, Clone)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Catalogue entry describing one registered tool.
#[derive(Debug, Clone)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub parameters: Value,
    pub safety: ToolSafety,
    pub enabled: bool,
}

struct RegisteredTool {
    info: ToolInfo,
    instance: Arc<dyn Tool>,
}

/// Central catalogue of named tools.
///
/// Lookups are by name; registration replaces an existing entry with a
/// warning.  Exceptions never escape `execute` — every failure becomes a
/// `ToolResult { success: false }`.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, pulling name/description/schema from the instance.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            warn!(tool = %name, "tool already registered, replacing");
        }
        let info = ToolInfo {
            name: name.clone(),
            description: tool.description().to_string(),
            parameters: tool.parameters_schema(),
            safety: tool.safety(),
            enabled: true,
        };
        self.tools.insert(name, RegisteredTool { info, instance: tool });
    }

    pub fn get_info(&self, name: &str) -> Option<&ToolInfo> {
        self.tools.get(name).map(|t| &t.info)
    }

    /// All registered tools sorted by name; optionally only enabled ones.
    pub fn list(&self, enabled_only: bool) -> Vec<&ToolInfo> {
        let mut infos: Vec<&ToolInfo> = self
            .tools
            .values()
            .map(|t| &t.info)
            .filter(|i| !enabled_only || i.enabled)
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    pub fn enable(&mut self, name: &str) -> bool {
        match self.tools.get_mut(name) {
            Some(t) => {
                t.info.enabled = true;
                true
            }
            None => false,
        }
    }

    pub fn disable(&mut self, name: &str) -> bool {
        match self.tools.get_mut(name) {
            Some(t) => {
                t.info.enabled = false;
                true
            }
            None => false,
        }
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.tools.get(name).map(|t| t.info.enabled).unwrap_or(false)
    }

    /// Best-effort argument check against the declared JSON schema: the
    /// arguments must be an object carrying every `required` property.
    pub fn validate(&self, name: &str, args: &Value) -> bool {
        let Some(tool) = self.tools.get(name) else {
            return false;
        };
        let Some(obj) = args.as_object() else {
            return false;
        };
        match tool.info.parameters.get("required").and_then(Value::as_array) {
            Some(required) => required
                .iter()
                .filter_map(Value::as_str)
                .all(|key| obj.contains_key(key)),
            None => true,
        }
    }

    /// Dispatch a call.  Returns `None` iff the tool is unknown or disabled.
    /// Invalid arguments and tool errors are normalized into failure results.
    pub async fn execute(
        &self,
        name: &str,
        args: &Value,
        ctx: &ToolContext,
    ) -> Option<ToolResult> {
        let tool = self.tools.get(name)?;
        if !tool.info.enabled {
            debug!(tool = %name, "skipping disabled tool");
            return None;
        }
        if !self.validate(name, args) {
            return Some(ToolResult::err(name, "invalid arguments"));
        }
        match tool.instance.execute(args, ctx).await {
            Ok(result) => Some(result),
            Err(e) => {
                warn!(tool = %name, error = %e, "tool execution raised");
                Some(ToolResult::err(name, e.to_string()))
            }
        }
    }

    /// The LLM-facing catalogue: one schema entry per enabled tool.
    pub fn schema_list(&self) -> Vec<ToolSchema> {
        self.list(true)
            .into_iter()
            .map(|info| ToolSchema {
                name: info.name.clone(),
                description: info.description.clone(),
                parameters: info.parameters.clone(),
            })
            .collect()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
