//! BoxMemoryStore -- object-safe wrapper for MemoryStore.

use std::future::Future;
use std::pin::Pin;

use stepgraph_types::error::MemoryError;
use stepgraph_types::memory::SessionKey;

use super::store::MemoryStore;

/// Object-safe version of [`MemoryStore`] with boxed futures.
pub trait MemoryStoreDyn: Send + Sync {
    fn load_boxed<'a>(
        &'a self,
        key: &'a SessionKey,
    ) -> Pin<Box<dyn Future<Output = Result<String, MemoryError>> + Send + 'a>>;

    fn save_boxed<'a>(
        &'a self,
        key: &'a SessionKey,
        user_text: &'a str,
        response_text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), MemoryError>> + Send + 'a>>;
}

impl<T: MemoryStore> MemoryStoreDyn for T {
    fn load_boxed<'a>(
        &'a self,
        key: &'a SessionKey,
    ) -> Pin<Box<dyn Future<Output = Result<String, MemoryError>> + Send + 'a>> {
        Box::pin(self.load(key))
    }

    fn save_boxed<'a>(
        &'a self,
        key: &'a SessionKey,
        user_text: &'a str,
        response_text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), MemoryError>> + Send + 'a>> {
        Box::pin(self.save(key, user_text, response_text))
    }
}

/// Type-erased memory store held by the scheduler.
pub struct BoxMemoryStore {
    inner: Box<dyn MemoryStoreDyn + Send + Sync>,
}

impl BoxMemoryStore {
    pub fn new<T: MemoryStore + 'static>(store: T) -> Self {
        Self {
            inner: Box::new(store),
        }
    }

    pub async fn load(&self, key: &SessionKey) -> Result<String, MemoryError> {
        self.inner.load_boxed(key).await
    }

    pub async fn save(
        &self,
        key: &SessionKey,
        user_text: &str,
        response_text: &str,
    ) -> Result<(), MemoryError> {
        self.inner.save_boxed(key, user_text, response_text).await
    }
}

impl std::fmt::Debug for BoxMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxMemoryStore").finish_non_exhaustive()
    }
}
