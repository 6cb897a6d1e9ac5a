//! Process-local `MemoryStore`.

use dashmap::DashMap;
use stepgraph_types::error::MemoryError;
use stepgraph_types::memory::{ConversationTurn, DEFAULT_MEMORY_TURNS, SessionKey};

use super::store::MemoryStore;

/// Keeps the last `k` turns of each session in memory.
#[derive(Debug)]
pub struct InMemoryMemoryStore {
    sessions: DashMap<SessionKey, Vec<ConversationTurn>>,
    recent_turns: usize,
}

impl InMemoryMemoryStore {
    pub fn new() -> Self {
        Self::with_recent_turns(DEFAULT_MEMORY_TURNS)
    }

    /// Retain and render at most `k` turns per session.
    pub fn with_recent_turns(k: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            recent_turns: k,
        }
    }

    /// Number of turns stored for `key`.
    pub fn turn_count(&self, key: &SessionKey) -> usize {
        self.sessions.get(key).map(|turns| turns.len()).unwrap_or(0)
    }
}

impl Default for InMemoryMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore for InMemoryMemoryStore {
    async fn load(&self, key: &SessionKey) -> Result<String, MemoryError> {
        let Some(turns) = self.sessions.get(key) else {
            return Ok(String::new());
        };
        let skip = turns.len().saturating_sub(self.recent_turns);
        Ok(turns[skip..].iter().map(ConversationTurn::render).collect())
    }

    async fn save(
        &self,
        key: &SessionKey,
        user_text: &str,
        response_text: &str,
    ) -> Result<(), MemoryError> {
        let mut turns = self.sessions.entry(key.clone()).or_default();
        turns.push(ConversationTurn::new(user_text, response_text));
        let excess = turns.len().saturating_sub(self.recent_turns);
        turns.drain(..excess);
        tracing::debug!(session = %key, "memory turn saved");
        Ok(())
    }
}
