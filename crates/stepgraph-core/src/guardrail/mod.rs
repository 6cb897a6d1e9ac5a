//! Content-safety guardrail collaborator.
//!
//! The scheduler consults a guardrail at two checkpoints: the graph's input
//! text before the first step runs, and every executor response inside
//! `StepContext::execute`.

pub mod box_guardrail;
pub mod keyword;

pub use box_guardrail::BoxGuardrail;
pub use keyword::KeywordGuardrail;

use stepgraph_types::error::GuardrailError;
use stepgraph_types::guardrail::{GuardrailDirection, GuardrailVerdict};

/// Checks text flowing into or out of delegated work.
pub trait Guardrail: Send + Sync {
    fn check(
        &self,
        text: &str,
        direction: GuardrailDirection,
    ) -> impl std::future::Future<Output = Result<GuardrailVerdict, GuardrailError>> + Send;
}
