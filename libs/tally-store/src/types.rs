use bson::oid::ObjectId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::StoreError;

/// Status written by Add. Everything after that is supplied by the judging worker.
pub const STATUS_PENDING: &str = "pending";

/// Identity of a stored submission.
///
/// Wraps a BSON ObjectId, so ordering by identity is ordering by creation:
/// the leading four bytes are a timestamp and the trailing three a counter.
/// The textual form is 24 lowercase hex characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubmissionId(ObjectId);

impl SubmissionId {
    /// Fresh identity, generated in-process.
    pub fn generate() -> Self {
        Self(ObjectId::new())
    }

    pub fn from_object_id(oid: ObjectId) -> Self {
        Self(oid)
    }

    pub fn object_id(&self) -> ObjectId {
        self.0
    }

    pub fn to_hex(&self) -> String {
        self.0.to_hex()
    }

    /// Parse an identity coming from a caller. An empty string is rejected too;
    /// "no cursor" is expressed with `Option`, not with an empty id.
    pub fn parse(input: &str) -> Result<Self, StoreError> {
        ObjectId::parse_str(input)
            .map(Self)
            .map_err(|source| StoreError::MalformedIdentity {
                input: input.to_string(),
                source,
            })
    }
}

impl fmt::Display for SubmissionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_hex())
    }
}

impl FromStr for SubmissionId {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for SubmissionId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_hex())
    }
}

impl<'de> Deserialize<'de> for SubmissionId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        ObjectId::parse_str(&raw)
            .map(Self)
            .map_err(serde::de::Error::custom)
    }
}

/// How a submission is compiled and run. Opaque to the store; the judging
/// worker is the only consumer of these fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Language {
    pub name: String,
    pub source_file_name: String,
    pub compile_cmd: String,
    pub executables: String,
    pub run_cmd: String,
}

fn is_zero(v: &u64) -> bool {
    *v == 0
}

/// Outcome of one test case, as reported by the judging worker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseResult {
    #[serde(default, skip_serializing_if = "is_zero")]
    pub time: u64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub memory: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stdin: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stdout: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stderr: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub log: String,
}

/// Aggregate resource usage of a judged submission.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceTotals {
    pub total_time: u64,
    pub max_memory: u64,
}

impl ResourceTotals {
    /// Sum of case times and peak case memory.
    pub fn from_results(results: &[CaseResult]) -> Self {
        results.iter().fold(Self::default(), |acc, r| Self {
            total_time: acc.total_time.saturating_add(r.time),
            max_memory: acc.max_memory.max(r.memory),
        })
    }
}

/// A submission before the store has assigned it an identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSubmission {
    pub language: Language,
    pub source: String,
    pub date: DateTime<Utc>,
    pub status: String,
}

impl NewSubmission {
    pub fn new(language: Language, source: String) -> Self {
        Self {
            language,
            source,
            date: now_millis(),
            status: STATUS_PENDING.to_string(),
        }
    }

    /// Attach the identity assigned by the backend.
    pub fn into_submission(self, id: SubmissionId) -> Submission {
        Submission {
            id,
            language: self.language,
            source: self.source,
            date: self.date,
            status: self.status,
            total_time: None,
            max_memory: None,
            results: Vec::new(),
        }
    }
}

/// A stored submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub id: SubmissionId,
    pub language: Language,
    pub source: String,
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_time: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_memory: Option<u64>,
    #[serde(default)]
    pub results: Vec<CaseResult>,
}

/// Payload sent by a judging worker once a submission has been run.
///
/// Workers also send `type`, `date` and `language`; those are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JudgeUpdate {
    pub id: SubmissionId,
    pub status: String,
    #[serde(default)]
    pub results: Vec<CaseResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_time: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_memory: Option<u64>,
}

impl JudgeUpdate {
    /// Fill missing totals from the results list.
    pub fn derive_missing_totals(&mut self) {
        if self.results.is_empty() {
            return;
        }
        let totals = ResourceTotals::from_results(&self.results);
        self.total_time.get_or_insert(totals.total_time);
        self.max_memory.get_or_insert(totals.max_memory);
    }

    pub fn patch(&self) -> JudgementPatch {
        JudgementPatch {
            status: self.status.clone(),
            results: self.results.clone(),
            total_time: self.total_time,
            max_memory: self.max_memory,
        }
    }
}

/// Fields replaced by an update. Nothing else on the record is ever touched.
///
/// Totals are replaced too: a patch without them clears whatever an earlier
/// judgement recorded, so a re-judge never leaves stale figures behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JudgementPatch {
    pub status: String,
    pub results: Vec<CaseResult>,
    pub total_time: Option<u64>,
    pub max_memory: Option<u64>,
}

impl JudgementPatch {
    pub fn new(status: impl Into<String>, results: Vec<CaseResult>) -> Self {
        Self {
            status: status.into(),
            results,
            total_time: None,
            max_memory: None,
        }
    }

    pub(crate) fn apply_to(&self, submission: &mut Submission) {
        submission.status = self.status.clone();
        submission.results = self.results.clone();
        submission.total_time = self.total_time;
        submission.max_memory = self.max_memory;
    }
}

/// Single-record selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdFilter(pub SubmissionId);

/// One page of the reverse-chronological feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageFilter {
    /// Exclusive upper bound; `None` starts from the newest record.
    pub older_than: Option<SubmissionId>,
    pub limit: usize,
}

impl PageFilter {
    pub fn first(limit: usize) -> Self {
        Self {
            older_than: None,
            limit,
        }
    }

    pub fn older_than(cursor: SubmissionId, limit: usize) -> Self {
        Self {
            older_than: Some(cursor),
            limit,
        }
    }

    pub fn admits(&self, id: &SubmissionId) -> bool {
        match &self.older_than {
            Some(cursor) => id < cursor,
            None => true,
        }
    }
}

/// Cursor for the page after `page`: the identity of its oldest record.
pub fn next_cursor(page: &[Submission]) -> Option<SubmissionId> {
    page.last().map(|s| s.id)
}

/// Current time at the millisecond precision every backend persists.
pub(crate) fn now_millis() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::<Utc>::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}
