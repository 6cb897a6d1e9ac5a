//! MemoryStore trait definition.
//!
//! Conversation memory consulted by a flow's initializing step and written
//! by its finishing step. The engine never reads or interprets the content.

use stepgraph_types::error::MemoryError;
use stepgraph_types::memory::SessionKey;

/// Short-term conversation memory keyed by session.
///
/// Uses native async fn in traits (RPITIT); wrap in
/// [`super::BoxMemoryStore`] for dynamic dispatch.
pub trait MemoryStore: Send + Sync {
    /// Render recent history for `key` as context text.
    ///
    /// Returns an empty string for an unknown session.
    fn load(
        &self,
        key: &SessionKey,
    ) -> impl std::future::Future<Output = Result<String, MemoryError>> + Send;

    /// Record one user/response exchange for `key`.
    fn save(
        &self,
        key: &SessionKey,
        user_text: &str,
        response_text: &str,
    ) -> impl std::future::Future<Output = Result<(), MemoryError>> + Send;
}
