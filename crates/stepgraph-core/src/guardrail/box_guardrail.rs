//! BoxGuardrail -- object-safe wrapper for Guardrail.

use std::future::Future;
use std::pin::Pin;

use stepgraph_types::error::GuardrailError;
use stepgraph_types::guardrail::{GuardrailDirection, GuardrailVerdict};

use super::Guardrail;

/// Object-safe version of [`Guardrail`] with boxed futures.
pub trait GuardrailDyn: Send + Sync {
    fn check_boxed<'a>(
        &'a self,
        text: &'a str,
        direction: GuardrailDirection,
    ) -> Pin<Box<dyn Future<Output = Result<GuardrailVerdict, GuardrailError>> + Send + 'a>>;
}

impl<T: Guardrail> GuardrailDyn for T {
    fn check_boxed<'a>(
        &'a self,
        text: &'a str,
        direction: GuardrailDirection,
    ) -> Pin<Box<dyn Future<Output = Result<GuardrailVerdict, GuardrailError>> + Send + 'a>> {
        Box::pin(self.check(text, direction))
    }
}

/// Type-erased guardrail held by the scheduler.
pub struct BoxGuardrail {
    inner: Box<dyn GuardrailDyn + Send + Sync>,
}

impl BoxGuardrail {
    pub fn new<T: Guardrail + 'static>(guardrail: T) -> Self {
        Self {
            inner: Box::new(guardrail),
        }
    }

    pub async fn check(
        &self,
        text: &str,
        direction: GuardrailDirection,
    ) -> Result<GuardrailVerdict, GuardrailError> {
        self.inner.check_boxed(text, direction).await
    }
}

impl std::fmt::Debug for BoxGuardrail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxGuardrail").finish_non_exhaustive()
    }
}
