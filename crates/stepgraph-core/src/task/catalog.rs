//! Task catalog: agent personas and task definitions loaded from YAML.
//!
//! Two documents describe a flow's delegated work. The agents document maps
//! `<name>_agent` keys to personas; the tasks document maps `<name>_task`
//! keys to task definitions. A task pairs with the agent of the same name
//! unless it names another one explicitly.
//!
//! ```yaml
//! # agents.yaml
//! writer_agent:
//!   role: Technical writer
//!   goal: Turn research into an article
//!   backstory: ...
//!
//! # tasks.yaml
//! writer_task:
//!   description: Write about {question}
//!   expected_output: A markdown article
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use stepgraph_types::error::CatalogError;
use stepgraph_types::task::{AgentProfile, TaskSpec};

const AGENT_SUFFIX: &str = "_agent";
const TASK_SUFFIX: &str = "_task";

#[derive(Debug, Deserialize)]
struct TaskEntry {
    description: String,
    #[serde(default)]
    expected_output: String,
    /// Agent name (without suffix) when it differs from the task's own.
    #[serde(default)]
    agent: Option<String>,
}

/// Resolved task specs keyed by catalog name.
#[derive(Debug, Clone, Default)]
pub struct TaskCatalog {
    specs: BTreeMap<String, TaskSpec>,
}

impl TaskCatalog {
    /// Parse an agents document and a tasks document.
    ///
    /// Keys without the expected suffix are ignored so the documents can
    /// carry YAML anchors or unrelated entries.
    pub fn from_yaml(agents_yaml: &str, tasks_yaml: &str) -> Result<Self, CatalogError> {
        let agents: BTreeMap<String, AgentProfile> = serde_yaml_ng::from_str(agents_yaml)
            .map_err(|e| CatalogError::Parse(format!("agents: {e}")))?;
        let tasks: BTreeMap<String, TaskEntry> = serde_yaml_ng::from_str(tasks_yaml)
            .map_err(|e| CatalogError::Parse(format!("tasks: {e}")))?;

        let mut specs = BTreeMap::new();
        for (key, entry) in tasks {
            let Some(name) = key.strip_suffix(TASK_SUFFIX) else {
                tracing::debug!(key = %key, "skipping catalog key without _task suffix");
                continue;
            };
            let agent_name = entry.agent.as_deref().unwrap_or(name);
            let agent = agents
                .get(&format!("{agent_name}{AGENT_SUFFIX}"))
                .cloned()
                .ok_or_else(|| CatalogError::AgentNotFound {
                    task: name.to_string(),
                    agent: agent_name.to_string(),
                })?;

            specs.insert(
                name.to_string(),
                TaskSpec {
                    name: name.to_string(),
                    agent,
                    description: entry.description,
                    expected_output: entry.expected_output,
                },
            );
        }

        tracing::debug!(tasks = specs.len(), "task catalog loaded");
        Ok(Self { specs })
    }

    /// Read and parse the two documents from disk.
    pub async fn load(agents_path: &Path, tasks_path: &Path) -> Result<Self, CatalogError> {
        let agents = tokio::fs::read_to_string(agents_path)
            .await
            .map_err(|e| CatalogError::FileSystem(format!("{}: {e}", agents_path.display())))?;
        let tasks = tokio::fs::read_to_string(tasks_path)
            .await
            .map_err(|e| CatalogError::FileSystem(format!("{}: {e}", tasks_path.display())))?;
        Self::from_yaml(&agents, &tasks)
    }

    /// Look up a task by catalog name.
    pub fn spec(&self, name: &str) -> Result<&TaskSpec, CatalogError> {
        self.specs
            .get(name)
            .ok_or_else(|| CatalogError::TaskNotFound(name.to_string()))
    }

    /// Catalog names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.specs.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}
