//! Trigger expressions.
//!
//! A trigger is a small boolean tree over step completions and router
//! signals, evaluated against one run's ledger. There is deliberately no
//! general expression language: only names, `All` and `Any`.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// When a step becomes eligible to run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    /// Satisfied when the run starts. Exactly one step per graph uses it.
    Start,
    /// Satisfied once the named step has completed.
    Step(String),
    /// Satisfied once any router has emitted the named signal.
    Signal(String),
    /// Satisfied when every child is.
    All(Vec<Trigger>),
    /// Satisfied when at least one child is.
    Any(Vec<Trigger>),
}

impl Trigger {
    pub fn after(step: impl Into<String>) -> Self {
        Trigger::Step(step.into())
    }

    pub fn on_signal(signal: impl Into<String>) -> Self {
        Trigger::Signal(signal.into())
    }

    pub fn all_of<I>(triggers: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Trigger>,
    {
        Trigger::All(triggers.into_iter().map(Into::into).collect())
    }

    pub fn any_of<I>(triggers: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Trigger>,
    {
        Trigger::Any(triggers.into_iter().map(Into::into).collect())
    }

    /// Evaluate against a run's completed steps and emitted signals.
    pub fn is_satisfied(&self, completed: &BTreeSet<String>, signals: &BTreeSet<String>) -> bool {
        match self {
            Trigger::Start => true,
            Trigger::Step(name) => completed.contains(name),
            Trigger::Signal(name) => signals.contains(name),
            Trigger::All(children) => children.iter().all(|t| t.is_satisfied(completed, signals)),
            Trigger::Any(children) => children.iter().any(|t| t.is_satisfied(completed, signals)),
        }
    }

    pub fn is_start(&self) -> bool {
        matches!(self, Trigger::Start)
    }

    /// Step names referenced anywhere in the tree.
    pub fn step_refs(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.walk(&mut |t| {
            if let Trigger::Step(name) = t {
                out.push(name.as_str());
            }
        });
        out
    }

    /// Signal names referenced anywhere in the tree.
    pub fn signal_refs(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.walk(&mut |t| {
            if let Trigger::Signal(name) = t {
                out.push(name.as_str());
            }
        });
        out
    }

    /// True if `Start` appears below the root.
    pub(crate) fn has_nested_start(&self) -> bool {
        match self {
            Trigger::All(children) | Trigger::Any(children) => children
                .iter()
                .any(|c| c.is_start() || c.has_nested_start()),
            _ => false,
        }
    }

    pub(crate) fn has_empty_combinator(&self) -> bool {
        match self {
            Trigger::All(children) | Trigger::Any(children) => {
                children.is_empty() || children.iter().any(Trigger::has_empty_combinator)
            }
            _ => false,
        }
    }

    fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Trigger)) {
        visit(self);
        if let Trigger::All(children) | Trigger::Any(children) = self {
            for child in children {
                child.walk(visit);
            }
        }
    }
}

impl From<&str> for Trigger {
    fn from(step: &str) -> Self {
        Trigger::after(step)
    }
}

impl From<String> for Trigger {
    fn from(step: String) -> Self {
        Trigger::Step(step)
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn list(f: &mut fmt::Formatter<'_>, op: &str, children: &[Trigger]) -> fmt::Result {
            write!(f, "{op}(")?;
            for (i, child) in children.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{child}")?;
            }
            write!(f, ")")
        }

        match self {
            Trigger::Start => write!(f, "start"),
            Trigger::Step(name) => write!(f, "{name}"),
            Trigger::Signal(name) => write!(f, "signal:{name}"),
            Trigger::All(children) => list(f, "all", children),
            Trigger::Any(children) => list(f, "any", children),
        }
    }
}
