//! Conversation memory collaborator.
//!
//! Defines the `MemoryStore` trait, its type-erased wrapper, and a
//! process-local implementation.

pub mod box_store;
pub mod in_memory;
pub mod store;

pub use box_store::BoxMemoryStore;
pub use in_memory::InMemoryMemoryStore;
pub use store::MemoryStore;
