use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use rayon::prelude::*;
use tracing::{error, info, warn};

use crate::cli::IngestArgs;
use crate::commands::inventory;
use crate::load::importer::BatchImporter;
use crate::load::pipeline::{UnitOutcome, extract_edition, mark_failed, run_unit};
use crate::load::progress::JsonProgressStore;
use crate::load::retry::RetryPolicy;
use crate::load::sqlite_sink::SqliteSink;
use crate::model::{ClassifiedAd, EditionEntry, EditionInventoryManifest};
use crate::rules::CompiledRules;
use crate::source::load_edition;
use crate::util::{ensure_directory, read_json, write_json_pretty};

pub fn default_db_path(cache_root: &Path) -> PathBuf {
    cache_root.join("ads.sqlite")
}

pub fn run(args: IngestArgs) -> Result<()> {
    if args.edition.is_none() && !args.all {
        bail!("select a unit with --edition <ID> or pass --all");
    }

    let cache_root = args.cache_root.clone();
    ensure_directory(&cache_root.join("manifests"))?;

    let editions_dir = inventory::editions_dir(&cache_root, args.editions_dir.as_deref());
    let inventory_manifest_path = args
        .inventory_manifest_path
        .clone()
        .unwrap_or_else(|| inventory::default_manifest_path(&cache_root));
    let db_path = args
        .db_path
        .clone()
        .unwrap_or_else(|| default_db_path(&cache_root));

    info!(cache_root = %cache_root.display(), dry_run = args.dry_run, "starting ingest");

    let rules = CompiledRules::load_or_default(args.rules_path.as_deref())?;
    let inventory = load_or_refresh_inventory(
        &editions_dir,
        &inventory_manifest_path,
        args.refresh_inventory,
        args.year,
    )?;
    let selected = select_editions(&inventory, args.edition.as_deref())?;

    if args.dry_run {
        return dry_run(&rules, &selected, args.year, args.preview_path.as_deref());
    }

    let sink_timeout = Duration::from_millis(args.sink_timeout_ms);
    // Fail before any unit when the sink cannot be opened at all.
    SqliteSink::open(&db_path, sink_timeout)?;

    let store = Mutex::new(JsonProgressStore::open(&cache_root)?);
    let importer = BatchImporter::new(
        args.chunk_size,
        RetryPolicy::new(args.max_attempts, Duration::from_millis(args.backoff_ms)),
    );

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(args.jobs.max(1))
        .build()
        .context("failed to build ingest thread pool")?;

    let results: Vec<(String, Result<UnitOutcome>)> = pool.install(|| {
        selected
            .par_iter()
            .map(|entry| {
                let result = process_edition(
                    &rules,
                    entry,
                    args.year,
                    &store,
                    &db_path,
                    sink_timeout,
                    &importer,
                    args.reprocess,
                );
                (entry.edition_id.clone(), result)
            })
            .collect()
    });

    let mut completed = 0;
    let mut skipped = 0;
    let mut failed = 0;
    let mut loaded = 0;
    let mut quarantined = 0;
    for (unit_id, result) in results {
        match result {
            Ok(UnitOutcome::Completed(progress)) => {
                completed += 1;
                loaded += progress.ads_loaded;
                quarantined += progress.quarantined;
            }
            Ok(UnitOutcome::Skipped) => skipped += 1,
            Ok(UnitOutcome::Failed(progress)) => {
                failed += 1;
                warn!(unit = %unit_id, errors = ?progress.errors, "unit failed");
            }
            Err(err) => {
                failed += 1;
                error!(unit = %unit_id, error = %err, "unit aborted");
            }
        }
    }

    info!(
        completed,
        skipped,
        failed,
        loaded,
        quarantined,
        db_path = %db_path.display(),
        "ingest completed"
    );

    if failed > 0 {
        bail!("{failed} unit(s) failed; rerun ingest to resume them");
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn process_edition(
    rules: &CompiledRules,
    entry: &EditionEntry,
    year: Option<i32>,
    store: &Mutex<JsonProgressStore>,
    db_path: &Path,
    sink_timeout: Duration,
    importer: &BatchImporter,
    reprocess: bool,
) -> Result<UnitOutcome> {
    let source = match load_edition(Path::new(&entry.directory), year) {
        Ok(source) => source,
        Err(err) => {
            let progress = mark_failed(store, &entry.edition_id, &err)?;
            return Ok(UnitOutcome::Failed(progress));
        }
    };

    let mut sink = SqliteSink::open(db_path, sink_timeout)?;
    run_unit(rules, &source, store, &mut sink, importer, reprocess)
}

fn load_or_refresh_inventory(
    editions_dir: &Path,
    inventory_manifest_path: &Path,
    refresh_inventory: bool,
    year: Option<i32>,
) -> Result<EditionInventoryManifest> {
    if refresh_inventory || !inventory_manifest_path.exists() {
        let manifest = inventory::build_manifest(editions_dir, year)?;
        write_json_pretty(inventory_manifest_path, &manifest)?;
        info!(
            path = %inventory_manifest_path.display(),
            edition_count = manifest.edition_count,
            "refreshed inventory manifest"
        );
        return Ok(manifest);
    }

    let manifest: EditionInventoryManifest = read_json(inventory_manifest_path)?;
    info!(
        path = %inventory_manifest_path.display(),
        edition_count = manifest.edition_count,
        "loaded existing inventory manifest"
    );
    Ok(manifest)
}

/// One edition by id or folder name, or all of them in inventory order.
fn select_editions(
    inventory: &EditionInventoryManifest,
    edition: Option<&str>,
) -> Result<Vec<EditionEntry>> {
    let Some(wanted) = edition else {
        return Ok(inventory.editions.clone());
    };

    let found = inventory.editions.iter().find(|entry| {
        entry.edition_id == wanted
            || Path::new(&entry.directory)
                .file_name()
                .and_then(|name| name.to_str())
                == Some(wanted)
    });

    match found {
        Some(entry) => Ok(vec![entry.clone()]),
        None => bail!("edition {wanted} is not in the inventory; rerun with --refresh-inventory"),
    }
}

fn dry_run(
    rules: &CompiledRules,
    editions: &[EditionEntry],
    year: Option<i32>,
    preview_path: Option<&Path>,
) -> Result<()> {
    let mut preview: Vec<ClassifiedAd> = Vec::new();

    for entry in editions {
        let source = match load_edition(Path::new(&entry.directory), year) {
            Ok(source) => source,
            Err(err) => {
                warn!(edition = %entry.edition_id, error = %err, "skipping unreadable edition");
                continue;
            }
        };
        let extraction = extract_edition(rules, &source);
        info!(
            edition = %source.edition_id,
            pages = source.pages.len(),
            boilerplate_removed = extraction.boilerplate_removed,
            rows_seen = extraction.rows_seen,
            noise_dropped = extraction.noise_dropped,
            extracted = extraction.ads_extracted,
            rejected = extraction.rejected,
            valid = extraction.ads.len(),
            "dry-run extraction"
        );
        preview.extend(extraction.ads);
    }

    if let Some(path) = preview_path {
        write_json_pretty(path, &preview)?;
        info!(path = %path.display(), records = preview.len(), "wrote dry-run preview");
    }

    info!(editions = editions.len(), records = preview.len(), "ingest dry-run complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::load::progress::ProgressStore;
    use crate::model::UnitStatus;

    const PAGE: &str = "\
VENDO CASA EN WANCHAQ
Amplia casa de tres pisos con cochera y jardín
Razón Cel: 987654321
TERRENO EN SAN JERÓNIMO
Lote de 200 m2 con título de propiedad
Razón Cel: 912345678";

    fn args(cache_root: &Path) -> IngestArgs {
        IngestArgs {
            cache_root: cache_root.to_path_buf(),
            editions_dir: None,
            inventory_manifest_path: None,
            db_path: None,
            rules_path: None,
            refresh_inventory: false,
            edition: None,
            all: true,
            year: None,
            dry_run: false,
            reprocess: false,
            chunk_size: 100,
            jobs: 2,
            max_attempts: 3,
            backoff_ms: 0,
            sink_timeout_ms: 1000,
            preview_path: None,
        }
    }

    fn seed(cache_root: &Path) {
        for folder in ["R2561-Sep16-18", "R2562-Sep23-18"] {
            let dir = cache_root.join("editions").join(folder);
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join("page-1.txt"), PAGE).unwrap();
        }
    }

    #[test]
    fn ingest_all_loads_every_edition_and_records_progress() {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path());

        run(args(dir.path())).unwrap();

        let sink = SqliteSink::open(&default_db_path(dir.path()), Duration::from_secs(1)).unwrap();
        assert_eq!(sink.count_ads().unwrap(), 4);

        let store = JsonProgressStore::open(dir.path()).unwrap();
        assert_eq!(store.unit("R2561").unwrap().status, UnitStatus::Completed);
        assert_eq!(store.unit("R2562").unwrap().ads_loaded, 2);
        assert_eq!(store.run().totals.units_completed, 2);

        run(args(dir.path())).unwrap();
        assert_eq!(sink.count_ads().unwrap(), 4);
    }

    #[test]
    fn dry_run_leaves_sink_and_progress_untouched() {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path());
        let preview = dir.path().join("preview.json");

        let mut dry = args(dir.path());
        dry.dry_run = true;
        dry.preview_path = Some(preview.clone());
        run(dry).unwrap();

        assert!(!default_db_path(dir.path()).exists());
        assert!(!crate::load::progress::progress_path(dir.path()).exists());
        let records: Vec<ClassifiedAd> = read_json(&preview).unwrap();
        assert_eq!(records.len(), 4);
    }

    #[test]
    fn unit_selection_is_required() {
        let dir = tempfile::tempdir().unwrap();
        let mut no_selection = args(dir.path());
        no_selection.all = false;
        assert!(run(no_selection).is_err());
    }

    #[test]
    fn single_edition_by_folder_name() {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path());
        let mut one = args(dir.path());
        one.all = false;
        one.edition = Some("R2562-Sep23-18".to_string());

        run(one).unwrap();

        let store = JsonProgressStore::open(dir.path()).unwrap();
        assert!(store.unit("R2561").is_none());
        assert_eq!(store.unit("R2562").unwrap().status, UnitStatus::Completed);
    }
}
