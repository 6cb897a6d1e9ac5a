//! Fixture-backed executor for offline runs.
//!
//! A fixture file maps catalog task names to canned answers:
//!
//! ```json
//! {
//!   "planner": { "result": { "sub_questions": ["..."] }, "tokens": 120, "delay_ms": 40 },
//!   "critic":  { "fail": "model overloaded" }
//! }
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use stepgraph_core::task::StaticExecutor;

pub const BUNDLED_AGENTS: &str = include_str!("../config/deep_research_agents.yaml");
pub const BUNDLED_TASKS: &str = include_str!("../config/deep_research_tasks.yaml");
pub const BUNDLED_FIXTURES: &str = include_str!("../fixtures/deep_research.json");

#[derive(Debug, Clone, Deserialize)]
struct FixtureEntry {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    tokens: u64,
    #[serde(default)]
    delay_ms: Option<u64>,
    /// Fail every call to this task with the given message.
    #[serde(default)]
    fail: Option<String>,
}

/// Canned answers keyed by task name.
#[derive(Debug, Clone, Deserialize)]
#[serde(transparent)]
pub struct FixtureSet {
    entries: BTreeMap<String, FixtureEntry>,
}

impl FixtureSet {
    /// The fixtures compiled into the binary.
    pub fn bundled() -> Result<Self> {
        serde_json::from_str(BUNDLED_FIXTURES).context("bundled fixtures are malformed")
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read fixtures from {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse fixtures in {}", path.display()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn into_executor(self) -> StaticExecutor {
        let mut executor = StaticExecutor::new();
        for (task, entry) in self.entries {
            executor = match entry.fail {
                Some(message) => executor.with_failure(&task, &message),
                None => executor.with_result(&task, entry.result, entry.tokens),
            };
            if let Some(ms) = entry.delay_ms {
                executor = executor.with_delay(&task, Duration::from_millis(ms));
            }
        }
        executor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, json};
    use stepgraph_core::task::{TaskCatalog, TaskExecutor};
    use stepgraph_types::task::TaskSpec;

    #[test]
    fn bundled_catalog_has_every_research_task() {
        let catalog = TaskCatalog::from_yaml(BUNDLED_AGENTS, BUNDLED_TASKS).unwrap();
        for name in ["planner", "researcher", "gap_checker", "writer", "critic", "banner"] {
            assert!(catalog.spec(name).is_ok(), "missing {name}");
        }
    }

    #[test]
    fn bundled_fixtures_cover_the_catalog() {
        let fixtures = FixtureSet::bundled().unwrap();
        let catalog = TaskCatalog::from_yaml(BUNDLED_AGENTS, BUNDLED_TASKS).unwrap();
        assert_eq!(fixtures.len(), catalog.len());
        for name in catalog.names() {
            assert!(fixtures.entries.contains_key(name), "no fixture for {name}");
        }
    }

    #[tokio::test]
    async fn entries_become_results_and_failures() {
        let fixtures: FixtureSet = serde_json::from_value(json!({
            "writer": {"result": {"text": "draft"}, "tokens": 7},
            "critic": {"fail": "overloaded"}
        }))
        .unwrap();
        let executor = fixtures.into_executor();

        let output = executor
            .execute(&TaskSpec::named("writer"), Map::new())
            .await
            .unwrap();
        assert_eq!(output.text(), Some("draft"));
        assert_eq!(output.usage.tokens_consumed, 7);

        let err = executor
            .execute(&TaskSpec::named("critic"), Map::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("overloaded"));
    }

    #[tokio::test]
    async fn load_reports_the_path() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("fixtures.json");
        tokio::fs::write(&path, "{ not json").await.unwrap();

        let err = FixtureSet::load(&path).await.unwrap_err();
        assert!(format!("{err:#}").contains("fixtures.json"));
    }
}
