//! Run-level data types shared between the engine and its callers.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Step kinds
// ---------------------------------------------------------------------------

/// The kind of node a step occupies in a flow graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// Plain step: runs a handler and records its own name on completion.
    Task,
    /// Emits exactly one signal from a declared enumeration.
    Router,
    /// Fans out over a runtime collection and joins.
    Parallel,
    /// Re-enters an interior sequence until convergence or its cap.
    Loop,
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepKind::Task => write!(f, "task"),
            StepKind::Router => write!(f, "router"),
            StepKind::Parallel => write!(f, "parallel"),
            StepKind::Loop => write!(f, "loop"),
        }
    }
}

// ---------------------------------------------------------------------------
// Run status
// ---------------------------------------------------------------------------

/// Status of a run tracked by a scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Running => write!(f, "running"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Failed => write!(f, "failed"),
            RunStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

// ---------------------------------------------------------------------------
// Run records
// ---------------------------------------------------------------------------

/// Outcome of one loop controller within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopIterationRecord {
    /// Number of passes entered (1-based, never above the cap).
    pub iterations: u32,
    /// Whether the convergence predicate held when the loop released.
    pub converged: bool,
    /// The loop's configured cap.
    pub max_iterations: u32,
}

/// One entry in a run's completion history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: String,
    pub kind: StepKind,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// Signal emitted, for router steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal: Option<String>,
}

/// Serialisable view of a finished run without its typed state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub graph: String,
    pub status: RunStatus,
    pub output: serde_json::Value,
    pub history: Vec<StepRecord>,
    pub signals: Vec<String>,
    pub total_tokens: u64,
    pub elapsed_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_kind_display_matches_serde() {
        for kind in [
            StepKind::Task,
            StepKind::Router,
            StepKind::Parallel,
            StepKind::Loop,
        ] {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{kind}\""));
        }
    }

    #[test]
    fn run_status_serde() {
        let json = serde_json::to_string(&RunStatus::Cancelled).unwrap();
        assert_eq!(json, "\"cancelled\"");
        let parsed: RunStatus = serde_json::from_str("\"completed\"").unwrap();
        assert_eq!(parsed, RunStatus::Completed);
    }

    #[test]
    fn step_record_omits_missing_signal() {
        let record = StepRecord {
            step: "write_article".to_string(),
            kind: StepKind::Task,
            started_at: Utc::now(),
            duration_ms: 12,
            signal: None,
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(!json.contains("signal"));
    }
}
