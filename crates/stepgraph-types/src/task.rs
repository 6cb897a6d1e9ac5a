//! Task specification and result types for the `TaskExecutor` boundary.
//!
//! A `TaskSpec` is a named unit of delegated work: the agent persona that
//! performs it plus the task description and expected output. Executors
//! receive a spec and a map of inputs and return a `TaskOutput`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Persona of the agent that performs a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentProfile {
    pub role: String,
    pub goal: String,
    #[serde(default)]
    pub backstory: String,
}

/// A fully resolved task: what to do, who does it, what comes back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Catalog name (the `<name>` in `<name>_task`).
    pub name: String,
    pub agent: AgentProfile,
    pub description: String,
    #[serde(default)]
    pub expected_output: String,
}

impl TaskSpec {
    /// Create a spec with an empty persona. Mostly useful in tests and for
    /// executors that ignore personas.
    pub fn named(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            agent: AgentProfile {
                role: name.clone(),
                goal: String::new(),
                backstory: String::new(),
            },
            description: String::new(),
            expected_output: String::new(),
            name,
        }
    }

    /// Interpolate `{key}` placeholders in the description from `inputs`.
    ///
    /// String values are inserted verbatim, other values as compact JSON.
    /// Placeholders with no matching input are left untouched.
    pub fn render_description(&self, inputs: &Map<String, Value>) -> String {
        let mut rendered = String::with_capacity(self.description.len());
        let mut rest = self.description.as_str();

        while let Some(open) = rest.find('{') {
            rendered.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            match after.find('}') {
                Some(close) => {
                    let key = &after[..close];
                    match inputs.get(key) {
                        Some(Value::String(s)) => rendered.push_str(s),
                        Some(other) => rendered.push_str(&other.to_string()),
                        None => {
                            rendered.push('{');
                            rendered.push_str(key);
                            rendered.push('}');
                        }
                    }
                    rest = &after[close + 1..];
                }
                None => {
                    rendered.push_str(&rest[open..]);
                    rest = "";
                }
            }
        }
        rendered.push_str(rest);
        rendered
    }
}

/// Usage metadata reported by an executor for one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskUsage {
    pub tokens_consumed: u64,
}

/// Structured result of one executor call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutput {
    pub result: Value,
    #[serde(default)]
    pub usage: TaskUsage,
}

impl TaskOutput {
    pub fn new(result: Value, tokens_consumed: u64) -> Self {
        Self {
            result,
            usage: TaskUsage { tokens_consumed },
        }
    }

    /// The textual payload of the result.
    ///
    /// A bare string result is returned as-is; an object with a `text` (or
    /// `raw`) string field yields that field. Anything else is `None`.
    pub fn text(&self) -> Option<&str> {
        match &self.result {
            Value::String(s) => Some(s),
            Value::Object(map) => map
                .get("text")
                .or_else(|| map.get("raw"))
                .and_then(Value::as_str),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec_with(description: &str) -> TaskSpec {
        TaskSpec {
            description: description.to_string(),
            ..TaskSpec::named("writer")
        }
    }

    #[test]
    fn render_description_substitutes_known_keys() {
        let spec = spec_with("Answer {question} using {count} sources.");
        let mut inputs = Map::new();
        inputs.insert("question".into(), json!("what is Rust?"));
        inputs.insert("count".into(), json!(3));
        assert_eq!(
            spec.render_description(&inputs),
            "Answer what is Rust? using 3 sources."
        );
    }

    #[test]
    fn render_description_keeps_unknown_and_unclosed_placeholders() {
        let spec = spec_with("Use {missing} and {open");
        assert_eq!(spec.render_description(&Map::new()), "Use {missing} and {open");
    }

    #[test]
    fn task_output_text_variants() {
        assert_eq!(TaskOutput::new(json!("plain"), 1).text(), Some("plain"));
        assert_eq!(TaskOutput::new(json!({"text": "ok"}), 1).text(), Some("ok"));
        assert_eq!(TaskOutput::new(json!({"raw": "r"}), 1).text(), Some("r"));
        assert_eq!(TaskOutput::new(json!([1, 2]), 1).text(), None);
    }

    #[test]
    fn task_output_usage_defaults_when_missing() {
        let parsed: TaskOutput = serde_json::from_str(r#"{"result":{"text":"ok"}}"#).unwrap();
        assert_eq!(parsed.usage.tokens_consumed, 0);
    }
}
