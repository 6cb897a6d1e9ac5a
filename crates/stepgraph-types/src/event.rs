//! Lifecycle events for the stepgraph event bus.
//!
//! `FlowEvent` is broadcast by the scheduler while a run executes. All
//! variants are Clone + Send + Sync for use with tokio broadcast channels.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::flow::StepKind;

/// Events emitted during a run.
///
/// Subscribers (CLI progress output, tests, log sinks) receive these in the
/// order the scheduler publishes them for a single run. Events from
/// concurrent runs interleave.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FlowEvent {
    /// A run has started executing.
    RunStarted {
        run_id: Uuid,
        graph: String,
        /// Nesting depth; 0 for top-level runs.
        depth: u32,
    },

    /// A step has been launched.
    StepStarted {
        run_id: Uuid,
        step: String,
        kind: StepKind,
    },

    /// A step has completed and its update has been applied.
    StepCompleted {
        run_id: Uuid,
        step: String,
        duration_ms: u64,
    },

    /// A step has failed.
    StepFailed {
        run_id: Uuid,
        step: String,
        error: String,
    },

    /// A router emitted one of its declared signals.
    SignalEmitted {
        run_id: Uuid,
        router: String,
        signal: String,
    },

    /// A parallel group fanned out over its elements.
    CohortStarted {
        run_id: Uuid,
        group: String,
        size: usize,
    },

    /// A parallel group's join ran.
    CohortJoined {
        run_id: Uuid,
        group: String,
        succeeded: usize,
        failed: usize,
    },

    /// A loop controller entered a new pass.
    LoopIteration {
        run_id: Uuid,
        loop_name: String,
        iteration: u32,
        max_iterations: u32,
    },

    /// A terminal step completed and the run produced its output.
    RunCompleted {
        run_id: Uuid,
        terminal: String,
        total_tokens: u64,
        duration_ms: u64,
    },

    /// The run aborted with an error.
    RunFailed { run_id: Uuid, error: String },

    /// The run was cancelled by its caller.
    RunCancelled { run_id: Uuid, reason: String },
}

impl FlowEvent {
    /// Returns the run this event belongs to.
    pub fn run_id(&self) -> Uuid {
        match self {
            FlowEvent::RunStarted { run_id, .. }
            | FlowEvent::StepStarted { run_id, .. }
            | FlowEvent::StepCompleted { run_id, .. }
            | FlowEvent::StepFailed { run_id, .. }
            | FlowEvent::SignalEmitted { run_id, .. }
            | FlowEvent::CohortStarted { run_id, .. }
            | FlowEvent::CohortJoined { run_id, .. }
            | FlowEvent::LoopIteration { run_id, .. }
            | FlowEvent::RunCompleted { run_id, .. }
            | FlowEvent::RunFailed { run_id, .. }
            | FlowEvent::RunCancelled { run_id, .. } => *run_id,
        }
    }

    /// True for the events that end a run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FlowEvent::RunCompleted { .. }
                | FlowEvent::RunFailed { .. }
                | FlowEvent::RunCancelled { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_uuid() -> Uuid {
        Uuid::now_v7()
    }

    #[test]
    fn test_run_started_serde_roundtrip() {
        let event = FlowEvent::RunStarted {
            run_id: sample_uuid(),
            graph: "deep_research".to_string(),
            depth: 0,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"run_started\""));
        let parsed: FlowEvent = serde_json::from_str(&json).unwrap();
        assert!(matches!(parsed, FlowEvent::RunStarted { depth: 0, .. }));
    }

    #[test]
    fn test_step_started_serde_roundtrip() {
        let event = FlowEvent::StepStarted {
            run_id: sample_uuid(),
            step: "write_article".to_string(),
            kind: StepKind::Task,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"step_started\""));
        assert!(json.contains("\"kind\":\"task\""));
        let parsed: FlowEvent = serde_json::from_str(&json).unwrap();
        assert!(matches!(
            parsed,
            FlowEvent::StepStarted {
                kind: StepKind::Task,
                ..
            }
        ));
    }

    #[test]
    fn test_signal_emitted_serde_roundtrip() {
        let event = FlowEvent::SignalEmitted {
            run_id: sample_uuid(),
            router: "route_after_critique".to_string(),
            signal: "approved".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"signal_emitted\""));
        let parsed: FlowEvent = serde_json::from_str(&json).unwrap();
        match parsed {
            FlowEvent::SignalEmitted { signal, .. } => assert_eq!(signal, "approved"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_cohort_joined_serde_roundtrip() {
        let event = FlowEvent::CohortJoined {
            run_id: sample_uuid(),
            group: "research".to_string(),
            succeeded: 4,
            failed: 1,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"cohort_joined\""));
        let parsed: FlowEvent = serde_json::from_str(&json).unwrap();
        assert!(matches!(
            parsed,
            FlowEvent::CohortJoined {
                succeeded: 4,
                failed: 1,
                ..
            }
        ));
    }

    #[test]
    fn test_loop_iteration_serde_roundtrip() {
        let event = FlowEvent::LoopIteration {
            run_id: sample_uuid(),
            loop_name: "gap_check".to_string(),
            iteration: 2,
            max_iterations: 2,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"loop_iteration\""));
        let parsed: FlowEvent = serde_json::from_str(&json).unwrap();
        assert!(matches!(parsed, FlowEvent::LoopIteration { iteration: 2, .. }));
    }

    #[test]
    fn test_run_completed_serde_roundtrip() {
        let event = FlowEvent::RunCompleted {
            run_id: sample_uuid(),
            terminal: "finish".to_string(),
            total_tokens: 4200,
            duration_ms: 15000,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"run_completed\""));
        let parsed: FlowEvent = serde_json::from_str(&json).unwrap();
        assert!(parsed.is_terminal());
    }

    #[test]
    fn test_run_id_accessor() {
        let id = sample_uuid();
        let events = [
            FlowEvent::RunFailed {
                run_id: id,
                error: "dead end".to_string(),
            },
            FlowEvent::RunCancelled {
                run_id: id,
                reason: "user".to_string(),
            },
            FlowEvent::StepFailed {
                run_id: id,
                step: "publish".to_string(),
                error: "timeout".to_string(),
            },
        ];
        for event in &events {
            assert_eq!(event.run_id(), id);
        }
        assert!(!events[2].is_terminal());
    }
}
