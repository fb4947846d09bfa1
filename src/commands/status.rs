use std::time::Duration;

use anyhow::Result;
use tracing::{info, warn};

use crate::cli::StatusArgs;
use crate::commands::ingest::default_db_path;
use crate::commands::inventory::default_manifest_path;
use crate::load::progress::{JsonProgressStore, ProgressStore, progress_path};
use crate::load::sqlite_sink::SqliteSink;
use crate::model::EditionInventoryManifest;
use crate::util::read_json;

pub fn run(args: StatusArgs) -> Result<()> {
    let progress_file = progress_path(&args.cache_root);
    let inventory_path = default_manifest_path(&args.cache_root);
    let db_path = args
        .db_path
        .clone()
        .unwrap_or_else(|| default_db_path(&args.cache_root));

    info!(cache_root = %args.cache_root.display(), "status requested");

    if inventory_path.exists() {
        let inventory: EditionInventoryManifest = read_json(&inventory_path)?;
        info!(
            generated_at = %inventory.generated_at,
            edition_count = inventory.edition_count,
            warnings = inventory.warnings.len(),
            "loaded inventory manifest"
        );
    } else {
        warn!(path = %inventory_path.display(), "inventory manifest missing");
    }

    let store = JsonProgressStore::open(&args.cache_root)?;
    if progress_file.exists() {
        let run = store.run();
        info!(
            run_id = %run.run_id,
            started_at = %run.started_at,
            updated_at = %run.updated_at,
            units = run.totals.units_total,
            completed = run.totals.units_completed,
            failed = run.totals.units_failed,
            in_progress = run.totals.units_in_progress,
            extracted = run.totals.ads_extracted,
            rejected = run.totals.rejected,
            loaded = run.totals.ads_loaded,
            quarantined = run.totals.quarantined,
            "loaded import progress"
        );
        for unit in run.units.values() {
            info!(
                unit = %unit.unit_id,
                status = unit.status.as_str(),
                pages = unit.pages_processed,
                rows_seen = unit.rows_seen,
                loaded = unit.ads_loaded,
                quarantined = unit.quarantined,
                errors = unit.errors.len(),
                "unit progress"
            );
        }
    } else {
        warn!(path = %progress_file.display(), "import progress missing");
    }

    let backlog = store.quarantine_units()?;
    for unit_id in &backlog {
        let entries = store.load_quarantine(unit_id)?;
        info!(unit = %unit_id, entries = entries.len(), "quarantine backlog");
    }
    if backlog.is_empty() {
        info!("quarantine empty");
    }

    if db_path.exists() {
        let sink = SqliteSink::open(&db_path, Duration::from_secs(5))?;
        let ads = sink.count_ads()?;
        let active = sink.count_active_ads()?;
        info!(path = %db_path.display(), ads, active, "database status");
    } else {
        warn!(path = %db_path.display(), "database file missing");
    }

    Ok(())
}
