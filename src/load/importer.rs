use std::collections::HashSet;
use std::slice;

use tracing::{debug, warn};

use super::retry::RetryPolicy;
use super::sink::{RecordSink, SinkError};
use crate::model::{ClassifiedAd, QuarantineEntry};

pub const DEFAULT_CHUNK_SIZE: usize = 100;

#[derive(Debug, Default)]
pub struct ImportOutcome {
    pub loaded: usize,
    pub quarantined: Vec<QuarantineEntry>,
    pub chunks: usize,
    pub degraded_chunks: usize,
}

/// Upserts one record through the retry policy. A report that refuses the
/// record counts as a failure of that attempt.
pub fn upsert_record(
    sink: &mut dyn RecordSink,
    retry: &RetryPolicy,
    record: &ClassifiedAd,
) -> Result<(), (SinkError, u32)> {
    retry.run(|| {
        let report = sink.upsert(slice::from_ref(record))?;
        match report.failed.into_iter().next() {
            Some((_, err)) => Err(err),
            None => Ok(()),
        }
    })
}

#[derive(Debug, Clone)]
pub struct BatchImporter {
    chunk_size: usize,
    retry: RetryPolicy,
}

impl BatchImporter {
    pub fn new(chunk_size: usize, retry: RetryPolicy) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            retry,
        }
    }

    /// Loads `records` chunk by chunk. A failing chunk degrades to
    /// per-record upserts; records that still fail are returned as
    /// quarantine entries and never stop the remaining chunks. Records the
    /// sink refused persistently in a partial report are quarantined without
    /// another write.
    pub fn import(&self, sink: &mut dyn RecordSink, records: &[ClassifiedAd]) -> ImportOutcome {
        let mut outcome = ImportOutcome::default();

        for chunk in records.chunks(self.chunk_size) {
            outcome.chunks += 1;

            let retry_individually: Vec<&ClassifiedAd> =
                match self.retry.run(|| sink.upsert(chunk)) {
                    Ok(report) if report.all_succeeded() => {
                        outcome.loaded += report.succeeded;
                        continue;
                    }
                    Ok(report) => {
                        outcome.loaded += report.succeeded;
                        let mut retryable = HashSet::new();
                        for (id, err) in report.failed {
                            if err.is_retryable() {
                                retryable.insert(id);
                                continue;
                            }
                            if let Some(record) = chunk.iter().find(|record| record.id == id) {
                                quarantine(&mut outcome, record, err, 1);
                            }
                        }
                        chunk
                            .iter()
                            .filter(|record| retryable.contains(&record.id))
                            .collect()
                    }
                    Err((err, attempts)) => {
                        debug!(
                            records = chunk.len(),
                            attempts,
                            error = %err,
                            "chunk upsert failed, degrading to per-record writes"
                        );
                        chunk.iter().collect()
                    }
                };

            if retry_individually.is_empty() {
                continue;
            }
            outcome.degraded_chunks += 1;
            for record in retry_individually {
                match upsert_record(sink, &self.retry, record) {
                    Ok(()) => outcome.loaded += 1,
                    Err((err, attempts)) => quarantine(&mut outcome, record, err, attempts),
                }
            }
        }

        outcome
    }
}

fn quarantine(outcome: &mut ImportOutcome, record: &ClassifiedAd, err: SinkError, attempts: u32) {
    warn!(
        record = %record.id,
        edition = %record.source_edition,
        page = record.source_page,
        attempts,
        error = %err,
        "quarantined record"
    );
    outcome.quarantined.push(QuarantineEntry {
        record: record.clone(),
        last_error: err.to_string(),
        attempt_count: 1,
    });
}
