//! Term-matching guardrail.

use stepgraph_types::error::GuardrailError;
use stepgraph_types::guardrail::{DEFAULT_BLOCKED_RESPONSE, GuardrailDirection, GuardrailVerdict};

use super::Guardrail;

/// Blocks text containing any configured term (case-insensitive).
///
/// Blocked output is replaced with `replacement`; blocked input carries the
/// same replacement as its reason.
#[derive(Debug, Clone)]
pub struct KeywordGuardrail {
    blocked_terms: Vec<String>,
    replacement: String,
}

impl KeywordGuardrail {
    pub fn new<I, T>(blocked_terms: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            blocked_terms: blocked_terms
                .into_iter()
                .map(|t| t.into().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect(),
            replacement: DEFAULT_BLOCKED_RESPONSE.to_string(),
        }
    }

    pub fn with_replacement(mut self, replacement: impl Into<String>) -> Self {
        self.replacement = replacement.into();
        self
    }

    fn matched_term(&self, text: &str) -> Option<&str> {
        let lowered = text.to_lowercase();
        self.blocked_terms
            .iter()
            .find(|term| lowered.contains(term.as_str()))
            .map(String::as_str)
    }
}

impl Guardrail for KeywordGuardrail {
    async fn check(
        &self,
        text: &str,
        direction: GuardrailDirection,
    ) -> Result<GuardrailVerdict, GuardrailError> {
        match self.matched_term(text) {
            Some(term) => {
                tracing::warn!(direction = %direction, term = %term, "guardrail intervened");
                Ok(GuardrailVerdict::block(self.replacement.clone()))
            }
            None => Ok(GuardrailVerdict::allow(text)),
        }
    }
}
