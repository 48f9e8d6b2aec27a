use thiserror::Error;

use crate::types::SubmissionId;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Coarse classification of a [`StoreError`], for callers that branch on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    StorageUnavailable,
    MalformedIdentity,
    InitializationFailure,
    Cancelled,
    NotFound,
    Corrupt,
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend could not be reached or did not answer in time.
    #[error("storage unavailable during {op}: {source}")]
    StorageUnavailable {
        op: &'static str,
        #[source]
        source: BoxError,
    },

    #[error("malformed submission id {input:?}: {source}")]
    MalformedIdentity {
        input: String,
        #[source]
        source: bson::oid::Error,
    },

    #[error("failed to initialize submission store: {source}")]
    InitializationFailure {
        #[source]
        source: BoxError,
    },

    #[error("{op} was cancelled")]
    Cancelled { op: &'static str },

    /// Only raised when updates are configured to require an existing record.
    #[error("no submission with id {id}")]
    NotFound { id: SubmissionId },

    /// A stored record could not be encoded or decoded.
    #[error("corrupt submission record during {op}: {source}")]
    Corrupt {
        op: &'static str,
        #[source]
        source: BoxError,
    },
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::StorageUnavailable { .. } => ErrorKind::StorageUnavailable,
            StoreError::MalformedIdentity { .. } => ErrorKind::MalformedIdentity,
            StoreError::InitializationFailure { .. } => ErrorKind::InitializationFailure,
            StoreError::Cancelled { .. } => ErrorKind::Cancelled,
            StoreError::NotFound { .. } => ErrorKind::NotFound,
            StoreError::Corrupt { .. } => ErrorKind::Corrupt,
        }
    }

    pub(crate) fn unavailable<E>(op: &'static str) -> impl FnOnce(E) -> StoreError
    where
        E: Into<BoxError>,
    {
        move |e| StoreError::StorageUnavailable {
            op,
            source: e.into(),
        }
    }

    pub(crate) fn corrupt<E>(op: &'static str) -> impl FnOnce(E) -> StoreError
    where
        E: Into<BoxError>,
    {
        move |e| StoreError::Corrupt {
            op,
            source: e.into(),
        }
    }

    pub(crate) fn init<E>(e: E) -> StoreError
    where
        E: Into<BoxError>,
    {
        StoreError::InitializationFailure { source: e.into() }
    }
}
