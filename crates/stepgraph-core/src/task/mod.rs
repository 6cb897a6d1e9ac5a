//! The task execution boundary.
//!
//! `TaskExecutor` is the collaborator steps call to delegate work;
//! `BoxTaskExecutor` erases it for storage in the scheduler; `StaticExecutor`
//! answers from fixtures; `TaskCatalog` loads task specs from YAML.

pub mod box_executor;
pub mod catalog;
pub mod executor;
pub mod static_executor;

pub use box_executor::BoxTaskExecutor;
pub use catalog::TaskCatalog;
pub use executor::TaskExecutor;
pub use static_executor::{RecordedCall, StaticExecutor};
