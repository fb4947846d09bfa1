use std::path::Path;

use anyhow::Result;
use tracing::{info, warn};

use super::importer::upsert_record;
use super::progress::ProgressStore;
use super::quarantine;
use super::retry::RetryPolicy;
use super::sink::RecordSink;
use crate::model::{QuarantineEntry, QuarantineFile};
use crate::util::read_json;

#[derive(Debug, Default)]
pub struct ReplayOutcome {
    pub recovered: usize,
    /// Entries left alone because they already reached the attempt limit.
    pub skipped: usize,
    pub remaining: Vec<QuarantineEntry>,
}

/// Retries quarantined records one by one. Entries at `max_attempts` are kept
/// untouched; failures come back with a higher attempt count and the latest
/// error. Replaying the remainder again is always safe.
pub fn replay_entries(
    entries: Vec<QuarantineEntry>,
    max_attempts: u32,
    sink: &mut dyn RecordSink,
    retry: &RetryPolicy,
) -> ReplayOutcome {
    let mut outcome = ReplayOutcome::default();

    for mut entry in entries {
        if entry.attempt_count >= max_attempts {
            outcome.skipped += 1;
            outcome.remaining.push(entry);
            continue;
        }

        match upsert_record(sink, retry, &entry.record) {
            Ok(()) => outcome.recovered += 1,
            Err((err, _)) => {
                entry.attempt_count += 1;
                entry.last_error = err.to_string();
                warn!(
                    record = %entry.record.id,
                    attempt_count = entry.attempt_count,
                    error = %err,
                    "replay failed"
                );
                outcome.remaining.push(entry);
            }
        }
    }

    outcome
}

/// Moves recovered records from the unit's quarantined count to its loaded
/// count. Units the store does not know are left alone.
fn credit_recovered<S: ProgressStore + ?Sized>(
    store: &mut S,
    unit_id: &str,
    recovered: usize,
) -> Result<()> {
    let unit = store.unit(unit_id).filter(|_| recovered > 0);
    if let Some(mut unit) = unit {
        unit.ads_loaded += recovered;
        unit.quarantined = unit.quarantined.saturating_sub(recovered);
        store.set_unit(unit)?;
    }
    Ok(())
}

/// Replays an explicit quarantine file and rewrites it in place, deleting it
/// once empty. The owning unit's counters are updated like `replay_unit`.
pub fn replay_file<S: ProgressStore + ?Sized>(
    store: &mut S,
    path: &Path,
    max_attempts: u32,
    sink: &mut dyn RecordSink,
    retry: &RetryPolicy,
) -> Result<ReplayOutcome> {
    let file: QuarantineFile = read_json(path)?;
    let outcome = replay_entries(file.entries, max_attempts, sink, retry);
    quarantine::write_entries(path, &file.unit_id, outcome.remaining.clone())?;
    credit_recovered(store, &file.unit_id, outcome.recovered)?;

    info!(
        unit = %file.unit_id,
        path = %path.display(),
        recovered = outcome.recovered,
        skipped = outcome.skipped,
        remaining = outcome.remaining.len(),
        "replayed quarantine file"
    );
    Ok(outcome)
}

/// Replays a unit's backlog through the progress store and moves recovered
/// records from the unit's quarantined count to its loaded count.
pub fn replay_unit<S: ProgressStore + ?Sized>(
    store: &mut S,
    unit_id: &str,
    max_attempts: u32,
    sink: &mut dyn RecordSink,
    retry: &RetryPolicy,
) -> Result<ReplayOutcome> {
    let entries = store.load_quarantine(unit_id)?;
    if entries.is_empty() {
        return Ok(ReplayOutcome::default());
    }

    let outcome = replay_entries(entries, max_attempts, sink, retry);
    store.replace_quarantine(unit_id, outcome.remaining.clone())?;
    credit_recovered(store, unit_id, outcome.recovered)?;

    info!(
        unit = %unit_id,
        recovered = outcome.recovered,
        skipped = outcome.skipped,
        remaining = outcome.remaining.len(),
        "replayed quarantine"
    );
    Ok(outcome)
}
