//! Guardrail checkpoint types.

use serde::{Deserialize, Serialize};

use std::fmt;

/// Replacement used when an intervened output carries no text of its own.
pub const DEFAULT_BLOCKED_RESPONSE: &str = "I cannot provide that response.";

/// Which side of a model call a guardrail check covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GuardrailDirection {
    /// Caller-supplied text, checked before the first step runs.
    Input,
    /// Executor responses, checked after each call.
    Output,
}

impl fmt::Display for GuardrailDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GuardrailDirection::Input => write!(f, "INPUT"),
            GuardrailDirection::Output => write!(f, "OUTPUT"),
        }
    }
}

/// Result of one guardrail check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardrailVerdict {
    pub allowed: bool,
    /// Text to use in place of the checked text. Equal to the input when
    /// `allowed` is true.
    pub sanitized_text: String,
}

impl GuardrailVerdict {
    pub fn allow(text: impl Into<String>) -> Self {
        Self {
            allowed: true,
            sanitized_text: text.into(),
        }
    }

    pub fn block(sanitized_text: impl Into<String>) -> Self {
        Self {
            allowed: false,
            sanitized_text: sanitized_text.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_serializes_uppercase() {
        let json = serde_json::to_string(&GuardrailDirection::Output).unwrap();
        assert_eq!(json, "\"OUTPUT\"");
        assert_eq!(GuardrailDirection::Input.to_string(), "INPUT");
    }

    #[test]
    fn verdict_constructors() {
        assert!(GuardrailVerdict::allow("x").allowed);
        let blocked = GuardrailVerdict::block(DEFAULT_BLOCKED_RESPONSE);
        assert!(!blocked.allowed);
        assert_eq!(blocked.sanitized_text, DEFAULT_BLOCKED_RESPONSE);
    }
}
