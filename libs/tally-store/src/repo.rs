use async_trait::async_trait;

use crate::context::OpContext;
use crate::error::StoreError;
use crate::types::{IdFilter, JudgementPatch, NewSubmission, PageFilter, Submission};

/// Whether an update found its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateOutcome {
    pub matched: bool,
}

/// A backend holding one logical collection of submissions.
///
/// Implementations must make each call atomic with respect to a single
/// record and must never create a record from `set_judgement`.
#[async_trait]
pub trait SubmissionRepo: std::fmt::Debug + Send + Sync {
    fn backend(&self) -> &'static str;

    /// Persist `draft` under a freshly generated identity.
    async fn insert(&self, ctx: &OpContext, draft: NewSubmission) -> Result<Submission, StoreError>;

    async fn set_judgement(
        &self,
        ctx: &OpContext,
        filter: IdFilter,
        patch: &JudgementPatch,
    ) -> Result<UpdateOutcome, StoreError>;

    /// Records admitted by `filter`, newest first, at most `filter.limit`.
    async fn find_page(
        &self,
        ctx: &OpContext,
        filter: PageFilter,
    ) -> Result<Vec<Submission>, StoreError>;

    async fn find_one(
        &self,
        ctx: &OpContext,
        filter: IdFilter,
    ) -> Result<Option<Submission>, StoreError>;

    async fn ping(&self, ctx: &OpContext) -> Result<(), StoreError>;

    /// Release connections. The repo must not be used afterwards.
    async fn close(&self);
}
