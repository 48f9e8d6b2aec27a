// MongoDB backend

use async_trait::async_trait;
use bson::oid::ObjectId;
use bson::{doc, Document};
use chrono::{DateTime, Utc};
use futures_util::TryStreamExt;
use mongodb::error::ErrorKind as MongoErrorKind;
use mongodb::options::{ClientOptions, FindOneOptions, FindOptions};
use mongodb::{Client, Collection};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument};

use crate::config::StoreConfig;
use crate::context::OpContext;
use crate::error::StoreError;
use crate::repo::{SubmissionRepo, UpdateOutcome};
use crate::types::{
    CaseResult, IdFilter, JudgementPatch, Language, NewSubmission, PageFilter, Submission,
    SubmissionId,
};

/// Document shape of a submission in the collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SubmissionDoc {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub language: Language,
    pub source: String,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_time: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_memory: Option<u64>,
    // stored as null by older writers
    #[serde(default, deserialize_with = "null_as_empty")]
    pub results: Vec<CaseResult>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<CaseResult>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Vec<CaseResult>>::deserialize(deserializer)?.unwrap_or_default())
}

impl From<NewSubmission> for SubmissionDoc {
    fn from(draft: NewSubmission) -> Self {
        Self {
            id: None,
            language: draft.language,
            source: draft.source,
            date: draft.date,
            status: draft.status,
            total_time: None,
            max_memory: None,
            results: Vec::new(),
        }
    }
}

impl TryFrom<SubmissionDoc> for Submission {
    type Error = StoreError;

    fn try_from(doc: SubmissionDoc) -> Result<Self, Self::Error> {
        let id = doc
            .id
            .ok_or_else(|| StoreError::corrupt("decode")("document without _id"))?;
        Ok(Submission {
            id: SubmissionId::from_object_id(id),
            language: doc.language,
            source: doc.source,
            date: doc.date,
            status: doc.status,
            total_time: doc.total_time,
            max_memory: doc.max_memory,
            results: doc.results,
        })
    }
}

impl IdFilter {
    pub(crate) fn to_document(self) -> Document {
        doc! { "_id": self.0.object_id() }
    }
}

impl PageFilter {
    pub(crate) fn to_document(self) -> Document {
        match self.older_than {
            Some(cursor) => doc! { "_id": { "$lt": cursor.object_id() } },
            None => Document::new(),
        }
    }
}

impl JudgementPatch {
    /// `$set` of status, results and present totals; absent totals are `$unset`.
    pub(crate) fn to_update_document(&self) -> Result<Document, StoreError> {
        let results = bson::to_bson(&self.results).map_err(StoreError::corrupt("encode"))?;
        let mut set = doc! {
            "status": self.status.as_str(),
            "results": results,
        };
        let mut unset = Document::new();
        for (field, value) in [("totalTime", self.total_time), ("maxMemory", self.max_memory)] {
            match value {
                Some(v) => set.insert(field, to_int64(v)?),
                None => unset.insert(field, ""),
            };
        }
        let mut update = doc! { "$set": set };
        // older servers reject an empty operator document
        if !unset.is_empty() {
            update.insert("$unset", unset);
        }
        Ok(update)
    }
}

fn to_int64(v: u64) -> Result<i64, StoreError> {
    i64::try_from(v).map_err(StoreError::corrupt("encode"))
}

/// Server-side `maxTimeMS` for the time left in `ctx`. Zero means "no limit"
/// to the server, so the value never drops below one millisecond.
fn max_time(ctx: &OpContext) -> Duration {
    ctx.remaining().max(Duration::from_millis(1))
}

fn classify(op: &'static str) -> impl FnOnce(mongodb::error::Error) -> StoreError {
    move |e| match *e.kind {
        MongoErrorKind::BsonDeserialization(_) | MongoErrorKind::BsonSerialization(_) => {
            StoreError::corrupt(op)(e)
        }
        _ => StoreError::unavailable(op)(e),
    }
}

pub struct MongoRepo {
    client: Client,
    collection: Collection<SubmissionDoc>,
}

impl std::fmt::Debug for MongoRepo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MongoRepo")
            .field("collection", &self.collection.name())
            .finish()
    }
}

impl MongoRepo {
    /// Connect and verify the server answers within `ctx`.
    #[instrument(
        skip(config, ctx),
        fields(database = %config.database, collection = %config.collection)
    )]
    pub async fn connect(config: &StoreConfig, ctx: &OpContext) -> Result<Self, StoreError> {
        let mut options = ClientOptions::parse(&config.uri)
            .await
            .map_err(StoreError::init)?;
        options.app_name = Some("tally".to_string());
        options.retry_writes = Some(false);
        options.connect_timeout = Some(config.connect_timeout);
        options.server_selection_timeout = Some(config.connect_timeout);

        let client = Client::with_options(options).map_err(StoreError::init)?;
        let database = client.database(&config.database);
        let repo = Self {
            collection: database.collection(&config.collection),
            client,
        };
        repo.ping(ctx).await?;
        debug!("mongo ping ok");
        Ok(repo)
    }
}

#[async_trait]
impl SubmissionRepo for MongoRepo {
    fn backend(&self) -> &'static str {
        "mongodb"
    }

    async fn insert(
        &self,
        _ctx: &OpContext,
        draft: NewSubmission,
    ) -> Result<Submission, StoreError> {
        let doc = SubmissionDoc::from(draft.clone());
        let inserted = self
            .collection
            .insert_one(&doc, None)
            .await
            .map_err(classify("insert"))?;
        let id = inserted
            .inserted_id
            .as_object_id()
            .ok_or_else(|| StoreError::corrupt("insert")("server assigned a non-ObjectId _id"))?;
        Ok(draft.into_submission(SubmissionId::from_object_id(id)))
    }

    async fn set_judgement(
        &self,
        _ctx: &OpContext,
        filter: IdFilter,
        patch: &JudgementPatch,
    ) -> Result<UpdateOutcome, StoreError> {
        let update = patch.to_update_document()?;
        let res = self
            .collection
            .update_one(filter.to_document(), update, None)
            .await
            .map_err(classify("update"))?;
        Ok(UpdateOutcome {
            matched: res.matched_count > 0,
        })
    }

    async fn find_page(
        &self,
        ctx: &OpContext,
        filter: PageFilter,
    ) -> Result<Vec<Submission>, StoreError> {
        let limit = i64::try_from(filter.limit).unwrap_or(i64::MAX);
        let options = FindOptions::builder()
            .sort(doc! { "_id": -1 })
            .limit(limit)
            .max_time(max_time(ctx))
            .build();
        let mut cursor = self
            .collection
            .find(filter.to_document(), options)
            .await
            .map_err(classify("query"))?;

        let mut page = Vec::with_capacity(filter.limit);
        while let Some(doc) = cursor.try_next().await.map_err(classify("query"))? {
            page.push(Submission::try_from(doc)?);
        }
        Ok(page)
    }

    async fn find_one(
        &self,
        ctx: &OpContext,
        filter: IdFilter,
    ) -> Result<Option<Submission>, StoreError> {
        let options = FindOneOptions::builder().max_time(max_time(ctx)).build();
        let doc = self
            .collection
            .find_one(filter.to_document(), options)
            .await
            .map_err(classify("load"))?;
        doc.map(Submission::try_from).transpose()
    }

    async fn ping(&self, _ctx: &OpContext) -> Result<(), StoreError> {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 }, None)
            .await
            .map_err(classify("ping"))?;
        Ok(())
    }

    async fn close(&self) {
        self.client.clone().shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::Bson;

    fn sample_draft() -> NewSubmission {
        NewSubmission::new(
            Language {
                name: "c++17".to_string(),
                source_file_name: "a.cc".to_string(),
                compile_cmd: "g++ -O2 -std=c++17 -o a a.cc".to_string(),
                executables: "a".to_string(),
                run_cmd: "./a".to_string(),
            },
            "int main() {}\r\n".to_string(),
        )
    }

    #[test]
    fn test_new_document_has_no_id() {
        let doc = bson::to_document(&SubmissionDoc::from(sample_draft())).unwrap();
        assert!(!doc.contains_key("_id"));
        assert_eq!(doc.get_str("status").unwrap(), "pending");
        assert!(matches!(doc.get("date"), Some(Bson::DateTime(_))));
        assert_eq!(
            doc.get_document("language").unwrap().get_str("sourceFileName").unwrap(),
            "a.cc"
        );
        assert!(doc.get_array("results").unwrap().is_empty());
        assert!(!doc.contains_key("totalTime"));
    }

    #[test]
    fn test_stored_document_decodes_into_submission() {
        let draft = sample_draft();
        let oid = ObjectId::new();
        let mut doc = bson::to_document(&SubmissionDoc::from(draft.clone())).unwrap();
        doc.insert("_id", oid);
        doc.insert("results", Bson::Null);
        doc.insert("totalTime", 0_i64);

        let decoded: SubmissionDoc = bson::from_document(doc).unwrap();
        let submission = Submission::try_from(decoded).unwrap();
        assert_eq!(submission.id.object_id(), oid);
        assert_eq!(submission.source, draft.source);
        assert_eq!(submission.date, draft.date);
        assert!(submission.results.is_empty());
        assert_eq!(submission.total_time, Some(0));
    }

    #[test]
    fn test_document_without_id_is_corrupt() {
        let decoded = SubmissionDoc::from(sample_draft());
        let err = Submission::try_from(decoded).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Corrupt);
    }

    #[test]
    fn test_page_filter_documents() {
        assert!(PageFilter::first(10).to_document().is_empty());

        let cursor = SubmissionId::generate();
        let filter = PageFilter::older_than(cursor, 10).to_document();
        let bound = filter.get_document("_id").unwrap();
        assert_eq!(bound.get_object_id("$lt").unwrap(), cursor.object_id());
    }

    #[test]
    fn test_update_document_sets_only_judgement_fields() {
        let patch = JudgementPatch::new(
            "wrong answer",
            vec![
                CaseResult { time: 3, stdout: "1\n".to_string(), ..Default::default() },
                CaseResult { time: 4, stdout: "2\n".to_string(), ..Default::default() },
            ],
        );
        let update = patch.to_update_document().unwrap();
        let ops: Vec<&str> = update.keys().map(String::as_str).collect();
        assert_eq!(ops, vec!["$set", "$unset"]);
        let set = update.get_document("$set").unwrap();
        let keys: Vec<&str> = set.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["status", "results"]);
        let results = set.get_array("results").unwrap();
        assert_eq!(results[0].as_document().unwrap().get_str("stdout").unwrap(), "1\n");
        assert_eq!(results[1].as_document().unwrap().get_str("stdout").unwrap(), "2\n");
        let unset = update.get_document("$unset").unwrap();
        let cleared: Vec<&str> = unset.keys().map(String::as_str).collect();
        assert_eq!(cleared, vec!["totalTime", "maxMemory"]);
    }

    #[test]
    fn test_update_document_with_totals() {
        let mut patch = JudgementPatch::new("accepted", vec![]);
        patch.total_time = Some(30);
        patch.max_memory = Some(2048);
        let update = patch.to_update_document().unwrap();
        assert!(!update.contains_key("$unset"));
        let set = update.get_document("$set").unwrap();
        assert_eq!(set.get_i64("totalTime").unwrap(), 30);
        assert_eq!(set.get_i64("maxMemory").unwrap(), 2048);
    }

    #[test]
    fn test_update_document_clears_only_missing_total() {
        let mut patch = JudgementPatch::new("accepted", vec![]);
        patch.total_time = Some(30);
        let update = patch.to_update_document().unwrap();
        assert_eq!(update.get_document("$set").unwrap().get_i64("totalTime").unwrap(), 30);
        let unset = update.get_document("$unset").unwrap();
        assert_eq!(unset.len(), 1);
        assert!(unset.contains_key("maxMemory"));
    }

    #[test]
    fn test_max_time_never_reaches_zero() {
        let expired = OpContext::with_timeout(Duration::ZERO);
        assert_eq!(max_time(&expired), Duration::from_millis(1));

        let roomy = OpContext::with_timeout(Duration::from_secs(5));
        assert!(max_time(&roomy) > Duration::from_secs(4));
    }
}
