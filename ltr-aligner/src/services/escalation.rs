//! Conflict resolution escalation
//!
//! Runs a fixed sequence of detect/resolve passes over one batch (or the whole
//! document), widening the chain thresholds each time:
//!
//! | pass | min_chain_length | max_conflicts_len | edges | structural correction |
//! |------|------------------|-------------------|-------|-----------------------|
//! | 1    | 2                | 6                 | off   | no                    |
//! | 2    | 3                | 12                | off   | no                    |
//! | 3    | 4                | 18                | off   | no                    |
//! | 4    | 2                | 26                | off   | yes                   |
//! | 5    | 2                | 26                | on    | no                    |
//!
//! A history entry is appended after every pass, even when nothing was
//! detected. The first failing step aborts the sequence.

use anyhow::Context;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};

use super::alignment_store::AlignmentStore;
use super::collaborators::{ConflictResolver, DetectParams, ResolveOptions};
use crate::models::{BatchScope, ResolveWorkItem};

/// History operation name for every escalation pass
pub const RESOLVE_OPERATION: &str = "resolve";

/// Number of widening passes before the final sweeps
pub const ITERATIVE_PASSES: u32 = 3;

const FINAL_MIN_CHAIN_LENGTH: u32 = 2;
const FINAL_MAX_CONFLICTS_LEN: u32 = 26;

/// One detect/resolve pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EscalationPass {
    pub min_chain_length: u32,
    pub max_conflicts_len: u32,
    /// Detect with the item's edge flags instead of edges off
    pub edge_handling: bool,
    /// Structurally correct the chains outside the resolvable window first
    pub correct_structural: bool,
}

/// The fixed pass sequence
pub fn escalation_plan() -> Vec<EscalationPass> {
    let mut passes: Vec<EscalationPass> = (0..ITERATIVE_PASSES)
        .map(|i| EscalationPass {
            min_chain_length: 2 + i,
            max_conflicts_len: 6 * (i + 1),
            edge_handling: false,
            correct_structural: false,
        })
        .collect();

    passes.push(EscalationPass {
        min_chain_length: FINAL_MIN_CHAIN_LENGTH,
        max_conflicts_len: FINAL_MAX_CONFLICTS_LEN,
        edge_handling: false,
        correct_structural: true,
    });
    passes.push(EscalationPass {
        min_chain_length: FINAL_MIN_CHAIN_LENGTH,
        max_conflicts_len: FINAL_MAX_CONFLICTS_LEN,
        edge_handling: true,
        correct_structural: false,
    });

    passes
}

/// What one pass found
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassReport {
    pub pass: EscalationPass,
    pub resolved: usize,
    pub corrected: usize,
}

/// Drives the escalation sequence for resolve work items
#[derive(Clone)]
pub struct EscalationController {
    resolver: Arc<dyn ConflictResolver>,
    store: AlignmentStore,
    options: ResolveOptions,
}

impl EscalationController {
    pub fn new(
        resolver: Arc<dyn ConflictResolver>,
        store: AlignmentStore,
        options: ResolveOptions,
    ) -> Self {
        Self {
            resolver,
            store,
            options,
        }
    }

    /// Run every pass for one item
    pub async fn run(&self, item: &ResolveWorkItem) -> anyhow::Result<Vec<PassReport>> {
        let mut reports = Vec::new();

        for (number, pass) in escalation_plan().into_iter().enumerate() {
            let report = self
                .run_pass(item, pass)
                .await
                .with_context(|| format!("Escalation pass {} failed", number + 1))?;

            debug!(
                scope = item.scope.as_i64(),
                pass = number + 1,
                min_chain_length = pass.min_chain_length,
                max_conflicts_len = pass.max_conflicts_len,
                resolved = report.resolved,
                corrected = report.corrected,
                "Escalation pass finished"
            );
            reports.push(report);
        }

        info!(
            scope = item.scope.as_i64(),
            resolved = reports.iter().map(|r| r.resolved).sum::<usize>(),
            "Conflict resolution finished"
        );

        Ok(reports)
    }

    async fn run_pass(
        &self,
        item: &ResolveWorkItem,
        pass: EscalationPass,
    ) -> anyhow::Result<PassReport> {
        let store_path = self.store.path();

        let detect = DetectParams {
            batch_id: item.scope.as_i64(),
            min_chain_length: pass.min_chain_length,
            max_conflicts_len: pass.max_conflicts_len,
            handle_start: pass.edge_handling && item.handle_start,
            handle_finish: pass.edge_handling && item.handle_finish,
        };
        let found = self.resolver.detect_conflicts(store_path, &detect).await?;

        let mut corrected = 0;
        if pass.correct_structural {
            let correct = DetectParams {
                handle_start: item.handle_start,
                handle_finish: item.handle_finish,
                ..detect
            };
            self.resolver
                .correct_conflicts(store_path, &found.rest_conflicts, &correct)
                .await?;
            corrected = found.rest_conflicts.len();
        }

        self.resolver
            .resolve_conflicts(store_path, &found.conflicts, &self.options)
            .await?;

        self.store
            .append_history(
                RESOLVE_OPERATION,
                item.scope.as_i64(),
                &history_parameters(item, &pass),
            )
            .await?;

        Ok(PassReport {
            pass,
            resolved: found.conflicts.len(),
            corrected,
        })
    }
}

/// `{min_chain_length, max_conflicts_len}` plus `batch_amount` for whole-document runs
pub fn history_parameters(item: &ResolveWorkItem, pass: &EscalationPass) -> Value {
    let mut params = json!({
        "min_chain_length": pass.min_chain_length,
        "max_conflicts_len": pass.max_conflicts_len,
    });
    if item.scope == BatchScope::All {
        params["batch_amount"] = json!(item.batch_amount);
    }
    params
}
