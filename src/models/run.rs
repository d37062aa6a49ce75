use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::models::{CartLineResult, CartState, RunMode};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Partial,
    Aborted,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Success => f.write_str("success"),
            RunStatus::Partial => f.write_str("partial"),
            RunStatus::Aborted => f.write_str("aborted"),
        }
    }
}

/// Final report of one shopping run. Built once by the orchestrator, read-only afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunSummary {
    run_id: Uuid,
    mode: RunMode,
    started_at: DateTime<Utc>,
    completed_at: DateTime<Utc>,
    final_state: CartState,
    lines: Vec<CartLineResult>,
    status: RunStatus,
    reason: Option<String>,
    warnings: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: Uuid,
    pub mode: RunMode,
    pub started_at: DateTime<Utc>,
    pub final_state: CartState,
    pub lines: Vec<CartLineResult>,
    pub status: RunStatus,
    pub reason: Option<String>,
    pub warnings: Vec<String>,
}

impl RunSummary {
    pub fn finalize(outcome: RunOutcome) -> Self {
        Self {
            run_id: outcome.run_id,
            mode: outcome.mode,
            started_at: outcome.started_at,
            completed_at: Utc::now(),
            final_state: outcome.final_state,
            lines: outcome.lines,
            status: outcome.status,
            reason: outcome.reason,
            warnings: outcome.warnings,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn completed_at(&self) -> DateTime<Utc> {
        self.completed_at
    }

    pub fn final_state(&self) -> &CartState {
        &self.final_state
    }

    pub fn lines(&self) -> &[CartLineResult] {
        &self.lines
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn added(&self) -> impl Iterator<Item = &CartLineResult> {
        self.lines.iter().filter(|l| l.is_added())
    }

    pub fn failed(&self) -> impl Iterator<Item = &CartLineResult> {
        self.lines.iter().filter(|l| l.is_failed())
    }
}
