use thiserror::Error;
use uuid::Uuid;

use crate::model::ClassifiedAd;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    /// Busy, locked, I/O or timeout: the same write may succeed later.
    #[error("transient sink failure: {0}")]
    Transient(String),
    /// Constraint or shape violation: retrying the same record cannot help.
    #[error("persistent sink failure: {0}")]
    Persistent(String),
}

impl SinkError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Result of a batch upsert that was accepted as a whole call but may have
/// refused individual records.
#[derive(Debug, Default)]
pub struct UpsertReport {
    pub succeeded: usize,
    pub failed: Vec<(Uuid, SinkError)>,
}

impl UpsertReport {
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Backing store with upsert-by-id semantics. Upserting the same record
/// twice leaves exactly one copy holding the latest values.
pub trait RecordSink {
    fn upsert(&mut self, records: &[ClassifiedAd]) -> Result<UpsertReport, SinkError>;
}
