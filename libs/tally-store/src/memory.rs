use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::context::OpContext;
use crate::error::StoreError;
use crate::repo::{SubmissionRepo, UpdateOutcome};
use crate::types::{IdFilter, JudgementPatch, NewSubmission, PageFilter, Submission, SubmissionId};

#[derive(Debug, thiserror::Error)]
#[error("memory store is offline")]
pub struct Offline;

#[derive(Debug, Default)]
struct Shared {
    records: Mutex<BTreeMap<SubmissionId, Submission>>,
    offline: AtomicBool,
    reads: AtomicUsize,
}

/// In-process backend. Clones share the same records.
#[derive(Debug, Clone, Default)]
pub struct MemoryRepo {
    shared: Arc<Shared>,
}

impl MemoryRepo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate losing the backend: every call fails with `StorageUnavailable`.
    pub fn set_offline(&self, offline: bool) {
        self.shared.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of read calls that reached the records.
    pub fn reads(&self) -> usize {
        self.shared.reads.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn records(&self) -> MutexGuard<'_, BTreeMap<SubmissionId, Submission>> {
        // a panic mid-operation cannot leave a record half-written
        self.shared.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_online(&self, op: &'static str) -> Result<(), StoreError> {
        if self.shared.offline.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable(op)(Offline));
        }
        Ok(())
    }
}

#[async_trait]
impl SubmissionRepo for MemoryRepo {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn insert(
        &self,
        _ctx: &OpContext,
        draft: NewSubmission,
    ) -> Result<Submission, StoreError> {
        self.check_online("insert")?;
        let mut records = self.records();
        let submission = draft.into_submission(SubmissionId::generate());
        records.insert(submission.id, submission.clone());
        Ok(submission)
    }

    async fn set_judgement(
        &self,
        _ctx: &OpContext,
        filter: IdFilter,
        patch: &JudgementPatch,
    ) -> Result<UpdateOutcome, StoreError> {
        self.check_online("update")?;
        let mut records = self.records();
        match records.get_mut(&filter.0) {
            Some(submission) => {
                patch.apply_to(submission);
                Ok(UpdateOutcome { matched: true })
            }
            None => Ok(UpdateOutcome { matched: false }),
        }
    }

    async fn find_page(
        &self,
        _ctx: &OpContext,
        filter: PageFilter,
    ) -> Result<Vec<Submission>, StoreError> {
        self.check_online("query")?;
        self.shared.reads.fetch_add(1, Ordering::SeqCst);
        let records = self.records();
        let page = match filter.older_than {
            Some(cursor) => records.range(..cursor),
            None => records.range(..),
        }
        .rev()
        .take(filter.limit)
        .map(|(_, s)| s.clone())
        .collect();
        Ok(page)
    }

    async fn find_one(
        &self,
        _ctx: &OpContext,
        filter: IdFilter,
    ) -> Result<Option<Submission>, StoreError> {
        self.check_online("load")?;
        self.shared.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.records().get(&filter.0).cloned())
    }

    async fn ping(&self, _ctx: &OpContext) -> Result<(), StoreError> {
        self.check_online("ping")
    }

    async fn close(&self) {}
}
