// CLI commands, one store operation each
use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;
use tally_store::{
    next_cursor, CancellationToken, JudgeUpdate, OpContext, Store, Submission, SubmissionId,
};
use tracing::{debug, info};

use crate::language_config::LanguageCatalog;

/// Upper bound on pages walked by `query --all`.
const MAX_PAGES: usize = 10_000;

/// A connected store plus the token that Ctrl-C trips.
pub struct Session {
    store: Store,
    cancel: CancellationToken,
}

impl Session {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            cancel: CancellationToken::new(),
        }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn ctx(&self) -> OpContext {
        self.store.context().with_cancellation(&self.cancel)
    }

    pub async fn add(&self, languages: &Path, lang: &str, source: &Path) -> Result<()> {
        let catalog = LanguageCatalog::load(languages)?;
        let language = catalog.get(lang)?.clone();
        let source = read_input(source)?;

        let submission = self
            .store
            .add(&self.ctx(), language, source)
            .await
            .context("Failed to store submission")?;
        info!(id = %submission.id, language = %submission.language.name, "Submission stored");
        print_json(&submission)
    }

    pub async fn update(&self, file: &Path, derive_totals: bool) -> Result<()> {
        let raw = read_input(file)?;
        let value: serde_json::Value =
            serde_json::from_str(&raw).context("Failed to parse judge update")?;
        // surface a bad id as the store's error, not as a JSON shape error
        if let Some(id) = value.get("id").and_then(serde_json::Value::as_str) {
            SubmissionId::parse(id)?;
        }
        let mut update: JudgeUpdate =
            serde_json::from_value(value).context("Failed to parse judge update")?;
        if derive_totals {
            update.derive_missing_totals();
        }

        self.store
            .apply(&self.ctx(), &update)
            .await
            .with_context(|| format!("Failed to update submission {}", update.id))?;
        info!(
            id = %update.id,
            status = %update.status,
            results = update.results.len(),
            "Judge update applied"
        );
        print_json(&update)
    }

    pub async fn query(&self, cursor: Option<String>, all: bool) -> Result<()> {
        let mut cursor = cursor;
        let mut pages = 0;
        loop {
            let page = self
                .store
                .query(&self.ctx(), cursor.as_deref())
                .await
                .context("Failed to query submissions")?;
            pages += 1;
            debug!(page = pages, records = page.len(), "Fetched page");
            print_page(&page)?;

            cursor = match next_cursor(&page) {
                Some(next) if all && pages < MAX_PAGES => Some(next.to_hex()),
                _ => break,
            };
        }
        Ok(())
    }

    pub async fn show(&self, id: &str) -> Result<()> {
        match self.store.load(&self.ctx(), id).await? {
            Some(submission) => print_json(&submission),
            None => bail!("No submission with id {}", id),
        }
    }

    pub async fn ping(&self) -> Result<()> {
        self.store.ping(&self.ctx()).await?;
        println!("ok ({})", self.store.backend());
        Ok(())
    }
}

pub fn list_languages(path: &Path) -> Result<()> {
    let catalog = LanguageCatalog::load(path)?;
    print_json(&catalog.languages())
}

fn read_input(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read stdin")?;
        return Ok(buf);
    }
    fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let mut out = io::stdout().lock();
    serde_json::to_writer_pretty(&mut out, value)?;
    writeln!(out)?;
    Ok(())
}

/// One JSON object per line, so pages concatenate cleanly.
fn print_page(page: &[Submission]) -> Result<()> {
    let mut out = io::stdout().lock();
    for submission in page {
        serde_json::to_writer(&mut out, submission)?;
        writeln!(out)?;
    }
    Ok(())
}
