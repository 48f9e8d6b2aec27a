use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::config::{Backend, StoreConfig, UpdateMode};
use crate::context::OpContext;
use crate::error::StoreError;
use crate::memory::MemoryRepo;
use crate::mongo::MongoRepo;
use crate::redis::RedisRepo;
use crate::repo::SubmissionRepo;
use crate::types::{
    CaseResult, IdFilter, JudgeUpdate, JudgementPatch, Language, NewSubmission, PageFilter,
    Submission, SubmissionId,
};

/// Records returned by one Query call.
pub const PAGE_SIZE: usize = 10;

/// Handle to the submission store.
///
/// Built once at startup and cloned into whoever needs it; clones share the
/// underlying connection. Call [`Store::shutdown`] when done serving.
#[derive(Debug, Clone)]
pub struct Store {
    repo: Arc<dyn SubmissionRepo>,
    update_mode: UpdateMode,
    op_timeout: Duration,
}

impl Store {
    /// Connect to the backend named by `config.uri`. Any failure here is fatal
    /// for the caller; nothing is retried.
    #[instrument(skip(config), fields(backend = ?config.backend))]
    pub async fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
        let ctx = OpContext::with_timeout(config.connect_timeout);
        let repo: Arc<dyn SubmissionRepo> = match config.backend {
            Backend::Mongo => Arc::new(
                ctx.run("connect", MongoRepo::connect(config, &ctx))
                    .await
                    .map_err(into_init_failure)?,
            ),
            Backend::Redis => Arc::new(
                ctx.run("connect", RedisRepo::connect(config, &ctx))
                    .await
                    .map_err(into_init_failure)?,
            ),
            Backend::Memory => Arc::new(MemoryRepo::new()),
        };
        info!(backend = repo.backend(), collection = %config.collection, "submission store ready");
        Ok(Self::from_repo(repo, config))
    }

    pub fn from_repo(repo: Arc<dyn SubmissionRepo>, config: &StoreConfig) -> Self {
        Self {
            repo,
            update_mode: config.update_mode,
            op_timeout: config.op_timeout,
        }
    }

    pub fn backend(&self) -> &'static str {
        self.repo.backend()
    }

    /// Fresh context bounded by the configured operation timeout.
    pub fn context(&self) -> OpContext {
        OpContext::with_timeout(self.op_timeout)
    }

    /// Store a new submission; it is readable immediately with status `pending`.
    #[instrument(
        skip(self, ctx, language, source),
        fields(language = %language.name, source_len = source.len())
    )]
    pub async fn add(
        &self,
        ctx: &OpContext,
        language: Language,
        source: String,
    ) -> Result<Submission, StoreError> {
        let draft = NewSubmission::new(language, source);
        let submission = ctx.run("add", self.repo.insert(ctx, draft)).await?;
        info!(id = %submission.id, "submission stored");
        Ok(submission)
    }

    /// Replace status and results of the submission with identity `id`.
    ///
    /// Totals recorded by an earlier [`Store::apply`] are cleared. In permissive
    /// mode an unknown identity is not an error; nothing is written in that case.
    pub async fn update(
        &self,
        ctx: &OpContext,
        id: &str,
        status: impl Into<String>,
        results: Vec<CaseResult>,
    ) -> Result<(), StoreError> {
        let id = SubmissionId::parse(id)?;
        self.patch(ctx, id, JudgementPatch::new(status, results)).await
    }

    /// Apply a worker's judge update. Totals it carries are stored, totals it
    /// lacks are cleared.
    pub async fn apply(&self, ctx: &OpContext, update: &JudgeUpdate) -> Result<(), StoreError> {
        self.patch(ctx, update.id, update.patch()).await
    }

    #[instrument(
        skip(self, ctx, patch),
        fields(id = %id, status = %patch.status, results = patch.results.len())
    )]
    async fn patch(
        &self,
        ctx: &OpContext,
        id: SubmissionId,
        patch: JudgementPatch,
    ) -> Result<(), StoreError> {
        let outcome = ctx
            .run("update", self.repo.set_judgement(ctx, IdFilter(id), &patch))
            .await?;
        if outcome.matched {
            debug!("judgement recorded");
            return Ok(());
        }
        match self.update_mode {
            UpdateMode::Permissive => {
                warn!("update matched no submission");
                Ok(())
            }
            UpdateMode::RequireExisting => Err(StoreError::NotFound { id }),
        }
    }

    /// Up to [`PAGE_SIZE`] submissions strictly older than `cursor`, newest first.
    /// `None` or an empty cursor starts from the newest submission.
    #[instrument(skip(self, ctx))]
    pub async fn query(
        &self,
        ctx: &OpContext,
        cursor: Option<&str>,
    ) -> Result<Vec<Submission>, StoreError> {
        let filter = match cursor.filter(|c| !c.is_empty()) {
            Some(raw) => PageFilter::older_than(SubmissionId::parse(raw)?, PAGE_SIZE),
            None => PageFilter::first(PAGE_SIZE),
        };
        let page = ctx.run("query", self.repo.find_page(ctx, filter)).await?;
        debug!(returned = page.len(), "page read");
        Ok(page)
    }

    /// Point read by identity.
    #[instrument(skip(self, ctx))]
    pub async fn load(&self, ctx: &OpContext, id: &str) -> Result<Option<Submission>, StoreError> {
        let id = SubmissionId::parse(id)?;
        ctx.run("load", self.repo.find_one(ctx, IdFilter(id))).await
    }

    pub async fn ping(&self, ctx: &OpContext) -> Result<(), StoreError> {
        ctx.run("ping", self.repo.ping(ctx)).await
    }

    /// Release the backend connection. Other clones of this handle must not be
    /// used afterwards.
    pub async fn shutdown(self) {
        self.repo.close().await;
        info!(backend = self.repo.backend(), "submission store shut down");
    }
}

fn into_init_failure(err: StoreError) -> StoreError {
    match err {
        StoreError::StorageUnavailable { source, .. } => {
            StoreError::InitializationFailure { source }
        }
        other => other,
    }
}
