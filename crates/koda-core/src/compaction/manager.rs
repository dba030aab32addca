// Copyright (c) 2025-2026 Koda Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::bail;
use tracing::{debug, error, info};

use super::strategy::{CompactResult, CompactionContext, CompactionStrategy, StrategyInfo};

/// Per-strategy counters exposed for diagnostics.
#[derive(Debug, Clone)]
pub struct CompactionMetrics {
    pub strategy_name: String,
    pub success_count: u64,
    pub failure_count: u64,
    pub total_tokens_saved: i64,
    pub total_duration: Duration,
    pub last_compaction: Option<Instant>,
}

impl CompactionMetrics {
    fn new(strategy_name: &str) -> Self {
        Self {
            strategy_name: strategy_name.to_string(),
            success_count: 0,
            failure_count: 0,
            total_tokens_saved: 0,
            total_duration: Duration::ZERO,
            last_compaction: None,
        }
    }

    pub fn success_rate(&self) -> f64 {
        let total = self.success_count + self.failure_count;
        if total == 0 {
            return 0.0;
        }
        self.success_count as f64 / total as f64
    }

    pub fn avg_duration(&self) -> Duration {
        if self.success_count == 0 {
            return Duration::ZERO;
        }
        self.total_duration / self.success_count as u32
    }
}

/// Registry of compaction strategies plus the run/record loop around them.
#[derive(Default)]
pub struct CompactionManager {
    strategies: HashMap<String, Arc<dyn CompactionStrategy>>,
    current: Option<String>,
    metrics: HashMap<String, CompactionMetrics>,
}

impl CompactionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_strategy(&mut self, strategy: Arc<dyn CompactionStrategy>) {
        let name = strategy.metadata().name;
        debug!(strategy = %name, "registering compaction strategy");
        self.metrics
            .entry(name.clone())
            .or_insert_with(|| CompactionMetrics::new(&name));
        self.strategies.insert(name, strategy);
    }

    pub fn set_strategy(&mut self, name: &str) -> anyhow::Result<()> {
        if !self.strategies.contains_key(name) {
            let mut available: Vec<&str> = self.strategies.keys().map(String::as_str).collect();
            available.sort();
            bail!(
                "unknown compaction strategy '{name}'; available: {}",
                available.join(", ")
            );
        }
        self.current = Some(name.to_string());
        Ok(())
    }

    pub fn current_strategy_name(&self) -> Option<&str> {
        self.current.as_deref()
    }

    pub fn list_strategies(&self) -> Vec<StrategyInfo> {
        let mut infos: Vec<StrategyInfo> =
            self.strategies.values().map(|s| s.metadata()).collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    pub fn metrics(&self, name: &str) -> Option<&CompactionMetrics> {
        self.metrics.get(name)
    }

    /// Run the current strategy when its trigger fires (or unconditionally
    /// with `force`).  Returns `None` when no compaction was needed.
    pub async fn check_and_compact(
        &mut self,
        ctx: &CompactionContext,
        force: bool,
    ) -> Option<CompactResult> {
        let name = self.current.clone()?;
        let strategy = self.strategies.get(&name)?.clone();

        if !force && !strategy.should_compact(ctx) {
            return None;
        }

        info!(strategy = %name, current_tokens = ctx.current_tokens, "running compaction");
        let started = Instant::now();
        let result = strategy.compact(ctx).await;
        let duration = started.elapsed();

        let metric = self
            .metrics
            .entry(name.clone())
            .or_insert_with(|| CompactionMetrics::new(&name));
        if result.success {
            metric.success_count += 1;
            metric.total_tokens_saved += result.tokens_saved;
            info!(
                removed = result.removed_count,
                tokens_saved = result.tokens_saved,
                ?duration,
                "compaction succeeded"
            );
        } else {
            metric.failure_count += 1;
            error!(error = ?result.error, "compaction failed");
        }
        metric.total_duration += duration;
        metric.last_compaction = Some(started);

        Some(result)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
