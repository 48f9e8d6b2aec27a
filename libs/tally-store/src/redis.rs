use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use std::collections::HashMap;
use tracing::debug;

use crate::config::StoreConfig;
use crate::context::OpContext;
use crate::error::StoreError;
use crate::repo::{SubmissionRepo, UpdateOutcome};
use crate::types::{IdFilter, JudgementPatch, NewSubmission, PageFilter, Submission, SubmissionId};

/// Redis key layout - one hash per submission plus one lexicographic index.
/// Index members all score 0, so ZRANGEBYLEX order is hex identity order,
/// which is creation order.
pub const KEY_PREFIX: &str = "tally";

const F_LANGUAGE: &str = "language";
const F_SOURCE: &str = "source";
const F_DATE: &str = "date";
const F_STATUS: &str = "status";
const F_TOTAL_TIME: &str = "totalTime";
const F_MAX_MEMORY: &str = "maxMemory";
const F_RESULTS: &str = "results";

// Replace judgement fields only if the hash exists; never creates a record.
// An empty total argument removes that total.
const SET_JUDGEMENT_LUA: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then
  return 0
end
redis.call('HSET', KEYS[1], 'status', ARGV[1], 'results', ARGV[2])
if ARGV[3] ~= '' then
  redis.call('HSET', KEYS[1], 'totalTime', ARGV[3])
else
  redis.call('HDEL', KEYS[1], 'totalTime')
end
if ARGV[4] ~= '' then
  redis.call('HSET', KEYS[1], 'maxMemory', ARGV[4])
else
  redis.call('HDEL', KEYS[1], 'maxMemory')
end
return 1
"#;

/// Deterministic keys for one collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpace {
    namespace: String,
}

impl KeySpace {
    pub fn new(collection: &str) -> Self {
        Self {
            namespace: format!("{}:{}", KEY_PREFIX, collection),
        }
    }

    /// Hash holding one submission
    pub fn submission_key(&self, id: &SubmissionId) -> String {
        format!("{}:{}", self.namespace, id)
    }

    /// Sorted set of every identity in the collection
    pub fn index_key(&self) -> String {
        format!("{}:index", self.namespace)
    }
}

/// Upper ZREVRANGEBYLEX bound for a page.
fn lex_upper_bound(filter: &PageFilter) -> String {
    match &filter.older_than {
        Some(cursor) => format!("({}", cursor),
        None => "+".to_string(),
    }
}

fn encode_fields(submission: &Submission) -> Result<Vec<(&'static str, String)>, StoreError> {
    let mut fields = vec![
        (
            F_LANGUAGE,
            serde_json::to_string(&submission.language).map_err(StoreError::corrupt("encode"))?,
        ),
        (F_SOURCE, submission.source.clone()),
        (F_DATE, submission.date.timestamp_millis().to_string()),
        (F_STATUS, submission.status.clone()),
        (
            F_RESULTS,
            serde_json::to_string(&submission.results).map_err(StoreError::corrupt("encode"))?,
        ),
    ];
    if let Some(total_time) = submission.total_time {
        fields.push((F_TOTAL_TIME, total_time.to_string()));
    }
    if let Some(max_memory) = submission.max_memory {
        fields.push((F_MAX_MEMORY, max_memory.to_string()));
    }
    Ok(fields)
}

fn decode_fields(
    id: SubmissionId,
    mut fields: HashMap<String, String>,
) -> Result<Submission, StoreError> {
    let op = "decode";
    let mut take = |name: &'static str| {
        fields
            .remove(name)
            .ok_or_else(|| StoreError::corrupt(op)(format!("{} missing field {}", id, name)))
    };
    let language = serde_json::from_str(&take(F_LANGUAGE)?).map_err(StoreError::corrupt(op))?;
    let source = take(F_SOURCE)?;
    let millis: i64 = take(F_DATE)?.parse().map_err(StoreError::corrupt(op))?;
    let date = DateTime::<Utc>::from_timestamp_millis(millis)
        .ok_or_else(|| StoreError::corrupt(op)(format!("{} has out-of-range date", id)))?;
    let status = take(F_STATUS).unwrap_or_default();
    let results = match take(F_RESULTS) {
        Ok(raw) => serde_json::from_str(&raw).map_err(StoreError::corrupt(op))?,
        Err(_) => Vec::new(),
    };
    let total_time = take(F_TOTAL_TIME)
        .ok()
        .map(|v| v.parse::<u64>())
        .transpose()
        .map_err(StoreError::corrupt(op))?;
    let max_memory = take(F_MAX_MEMORY)
        .ok()
        .map(|v| v.parse::<u64>())
        .transpose()
        .map_err(StoreError::corrupt(op))?;

    Ok(Submission {
        id,
        language,
        source,
        date,
        status,
        total_time,
        max_memory,
        results,
    })
}

pub struct RedisRepo {
    conn: ConnectionManager,
    keys: KeySpace,
    set_judgement: Script,
}

impl std::fmt::Debug for RedisRepo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisRepo").field("keys", &self.keys).finish()
    }
}

impl RedisRepo {
    pub async fn connect(config: &StoreConfig, ctx: &OpContext) -> Result<Self, StoreError> {
        let client = redis::Client::open(config.uri.as_str()).map_err(StoreError::init)?;
        let conn = ConnectionManager::new(client).await.map_err(StoreError::init)?;
        let repo = Self {
            conn,
            keys: KeySpace::new(&config.collection),
            set_judgement: Script::new(SET_JUDGEMENT_LUA),
        };
        repo.ping(ctx).await?;
        debug!(index = %repo.keys.index_key(), "redis ping ok");
        Ok(repo)
    }

    async fn load_many(&self, ids: Vec<SubmissionId>) -> Result<Vec<Submission>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut pipe = redis::pipe();
        for id in &ids {
            pipe.hgetall(self.keys.submission_key(id));
        }
        let mut conn = self.conn.clone();
        let hashes: Vec<HashMap<String, String>> = pipe
            .query_async(&mut conn)
            .await
            .map_err(StoreError::unavailable("query"))?;

        let mut page = Vec::with_capacity(ids.len());
        for (id, fields) in ids.into_iter().zip(hashes) {
            if fields.is_empty() {
                // index entry without its hash; skip rather than fail the page
                tracing::warn!(id = %id, "indexed submission has no record");
                continue;
            }
            page.push(decode_fields(id, fields)?);
        }
        Ok(page)
    }
}

#[async_trait]
impl SubmissionRepo for RedisRepo {
    fn backend(&self) -> &'static str {
        "redis"
    }

    async fn insert(
        &self,
        _ctx: &OpContext,
        draft: NewSubmission,
    ) -> Result<Submission, StoreError> {
        let submission = draft.into_submission(SubmissionId::generate());
        let fields = encode_fields(&submission)?;
        let mut conn = self.conn.clone();
        // Hash and index entry land together or not at all
        let _: () = redis::pipe()
            .atomic()
            .hset_multiple(self.keys.submission_key(&submission.id), &fields)
            .ignore()
            .zadd(self.keys.index_key(), submission.id.to_hex(), 0)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(StoreError::unavailable("insert"))?;
        Ok(submission)
    }

    async fn set_judgement(
        &self,
        _ctx: &OpContext,
        filter: IdFilter,
        patch: &JudgementPatch,
    ) -> Result<UpdateOutcome, StoreError> {
        let results = serde_json::to_string(&patch.results).map_err(StoreError::corrupt("encode"))?;
        let total_time = patch.total_time.map(|v| v.to_string()).unwrap_or_default();
        let max_memory = patch.max_memory.map(|v| v.to_string()).unwrap_or_default();
        let mut conn = self.conn.clone();
        let matched: i64 = self
            .set_judgement
            .key(self.keys.submission_key(&filter.0))
            .arg(&patch.status)
            .arg(results)
            .arg(total_time)
            .arg(max_memory)
            .invoke_async(&mut conn)
            .await
            .map_err(StoreError::unavailable("update"))?;
        Ok(UpdateOutcome { matched: matched == 1 })
    }

    async fn find_page(
        &self,
        _ctx: &OpContext,
        filter: PageFilter,
    ) -> Result<Vec<Submission>, StoreError> {
        let count = isize::try_from(filter.limit).unwrap_or(isize::MAX);
        let mut conn = self.conn.clone();
        let members: Vec<String> = conn
            .zrevrangebylex_limit(self.keys.index_key(), lex_upper_bound(&filter), "-", 0, count)
            .await
            .map_err(StoreError::unavailable("query"))?;
        let ids = members
            .iter()
            .map(|m| SubmissionId::parse(m).map_err(StoreError::corrupt("query")))
            .collect::<Result<Vec<_>, _>>()?;
        self.load_many(ids).await
    }

    async fn find_one(
        &self,
        _ctx: &OpContext,
        filter: IdFilter,
    ) -> Result<Option<Submission>, StoreError> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = conn
            .hgetall(self.keys.submission_key(&filter.0))
            .await
            .map_err(StoreError::unavailable("load"))?;
        if fields.is_empty() {
            return Ok(None);
        }
        decode_fields(filter.0, fields).map(Some)
    }

    async fn ping(&self, _ctx: &OpContext) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(StoreError::unavailable("ping"))?;
        Ok(())
    }

    async fn close(&self) {
        // ConnectionManager closes once the last clone is dropped
        debug!("redis repo closed");
    }
}
