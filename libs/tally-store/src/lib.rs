pub mod config;
pub mod context;
pub mod error;
pub mod memory;
pub mod mongo;
pub mod redis;
pub mod repo;
pub mod store;
pub mod types;

#[cfg(test)]
mod live_tests;

pub use config::{Backend, StoreConfig, UpdateMode};
pub use context::OpContext;
pub use error::{ErrorKind, StoreError};
pub use memory::MemoryRepo;
pub use repo::SubmissionRepo;
pub use store::{Store, PAGE_SIZE};
pub use types::{
    next_cursor, CaseResult, JudgeUpdate, Language, ResourceTotals, Submission, SubmissionId,
    STATUS_PENDING,
};

pub use tokio_util::sync::CancellationToken;
