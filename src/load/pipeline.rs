use std::sync::{Mutex, MutexGuard};

use anyhow::{Result, anyhow};
use tracing::{info, warn};

use super::importer::BatchImporter;
use super::progress::ProgressStore;
use super::sink::RecordSink;
use crate::extract::{PageContext, PageExtraction, extract_page};
use crate::model::{ImportUnitProgress, UnitStatus};
use crate::rules::CompiledRules;
use crate::source::EditionSource;
use crate::util::now_utc_string;

#[derive(Debug)]
pub enum UnitOutcome {
    /// Already completed from an earlier run.
    Skipped,
    Completed(ImportUnitProgress),
    Failed(ImportUnitProgress),
}

pub fn lock_store<S: ?Sized>(store: &Mutex<S>) -> Result<MutexGuard<'_, S>> {
    store
        .lock()
        .map_err(|_| anyhow!("progress store lock poisoned"))
}

/// Runs every extraction stage over all pages of an edition.
pub fn extract_edition(rules: &CompiledRules, source: &EditionSource) -> PageExtraction {
    let mut total = PageExtraction::default();
    for page in &source.pages {
        let ctx = PageContext {
            edition_id: &source.edition_id,
            page: page.number,
            published_at: source.published_at,
        };
        total.absorb(extract_page(rules, &ctx, &page.text));
    }
    total
}

/// Imports one edition as a resumable unit: skipped when already completed,
/// checkpointed as in progress before any write, completed once every chunk
/// was attempted. A rerun starts from fresh counters and an empty backlog.
pub fn run_unit<S: ProgressStore + ?Sized>(
    rules: &CompiledRules,
    source: &EditionSource,
    store: &Mutex<S>,
    sink: &mut dyn RecordSink,
    importer: &BatchImporter,
    reprocess: bool,
) -> Result<UnitOutcome> {
    let unit_id = source.edition_id.as_str();

    if let Some(previous) = lock_store(store)?.unit(unit_id) {
        if previous.status == UnitStatus::Completed && !reprocess {
            if previous.source_sha256.as_deref() != Some(source.sha256.as_str()) {
                warn!(
                    unit = %unit_id,
                    "source changed since the unit completed; rerun with --reprocess to reload it"
                );
            }
            info!(unit = %unit_id, "unit already completed, skipping");
            return Ok(UnitOutcome::Skipped);
        }
    }

    let mut progress = ImportUnitProgress {
        status: UnitStatus::InProgress,
        source_sha256: Some(source.sha256.clone()),
        started_at: Some(now_utc_string()),
        errors: source.warnings.clone(),
        ..ImportUnitProgress::pending(unit_id)
    };
    {
        let mut guard = lock_store(store)?;
        guard.set_unit(progress.clone())?;
        guard.replace_quarantine(unit_id, Vec::new())?;
    }
    info!(unit = %unit_id, pages = source.pages.len(), "starting unit");

    let extraction = extract_edition(rules, source);
    let outcome = importer.import(sink, &extraction.ads);

    progress.pages_processed = source.pages.len();
    progress.rows_seen = extraction.rows_seen;
    progress.noise_dropped = extraction.noise_dropped;
    progress.ads_extracted = extraction.ads_extracted;
    progress.rejected = extraction.rejected;
    progress.ads_loaded = outcome.loaded;
    progress.quarantined = outcome.quarantined.len();
    progress.errors.extend(
        outcome
            .quarantined
            .iter()
            .map(|entry| format!("{}: {}", entry.record.id, entry.last_error)),
    );

    let quarantined = lock_store(store)?.append_quarantine(unit_id, outcome.quarantined);
    if let Err(err) = quarantined {
        progress.status = UnitStatus::Failed;
        progress.errors.push(format!("failed to persist quarantine: {err:#}"));
        warn!(unit = %unit_id, error = %err, "unit failed");
        lock_store(store)?.set_unit(progress.clone())?;
        return Ok(UnitOutcome::Failed(progress));
    }

    progress.status = UnitStatus::Completed;
    progress.completed_at = Some(now_utc_string());
    lock_store(store)?.set_unit(progress.clone())?;

    info!(
        unit = %unit_id,
        rows_seen = progress.rows_seen,
        extracted = progress.ads_extracted,
        rejected = progress.rejected,
        loaded = progress.ads_loaded,
        quarantined = progress.quarantined,
        chunks = outcome.chunks,
        degraded_chunks = outcome.degraded_chunks,
        "unit completed"
    );
    Ok(UnitOutcome::Completed(progress))
}

/// Records a unit that could not even be read from disk.
pub fn mark_failed<S: ProgressStore + ?Sized>(
    store: &Mutex<S>,
    unit_id: &str,
    error: &anyhow::Error,
) -> Result<ImportUnitProgress> {
    let mut guard = lock_store(store)?;
    let mut progress = guard
        .unit(unit_id)
        .unwrap_or_else(|| ImportUnitProgress::pending(unit_id));
    progress.status = UnitStatus::Failed;
    progress.errors.push(format!("{error:#}"));
    guard.set_unit(progress.clone())?;
    Ok(progress)
}
