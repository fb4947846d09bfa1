use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use tracing::{info, warn};

use crate::cli::InventoryArgs;
use crate::model::EditionInventoryManifest;
use crate::source::{discover_edition_dirs, load_edition};
use crate::util::{now_utc_string, write_json_pretty};

pub const INVENTORY_VERSION: u32 = 1;

pub fn run(args: InventoryArgs) -> Result<()> {
    let editions_dir = editions_dir(&args.cache_root, args.editions_dir.as_deref());
    let manifest = build_manifest(&editions_dir, args.year)?;

    if args.dry_run {
        info!(
            edition_count = manifest.edition_count,
            warnings = manifest.warnings.len(),
            source = %manifest.source_directory,
            "inventory dry-run complete"
        );
        return Ok(());
    }

    let manifest_path = args
        .manifest_path
        .unwrap_or_else(|| default_manifest_path(&args.cache_root));

    write_json_pretty(&manifest_path, &manifest)?;
    info!(path = %manifest_path.display(), "wrote inventory manifest");
    info!(edition_count = manifest.edition_count, "inventory completed");

    Ok(())
}

pub fn editions_dir(cache_root: &Path, override_dir: Option<&Path>) -> PathBuf {
    override_dir
        .map(Path::to_path_buf)
        .unwrap_or_else(|| cache_root.join("editions"))
}

pub fn default_manifest_path(cache_root: &Path) -> PathBuf {
    cache_root.join("manifests").join("edition_inventory.json")
}

/// Hashes and dates every edition folder. Unreadable folders become
/// warnings so one bad edition does not hide the rest.
pub fn build_manifest(editions_dir: &Path, year: Option<i32>) -> Result<EditionInventoryManifest> {
    let dirs = discover_edition_dirs(editions_dir)?;
    if dirs.is_empty() {
        bail!("no edition folders found in {}", editions_dir.display());
    }

    let mut editions = Vec::with_capacity(dirs.len());
    let mut warnings = Vec::new();
    for dir in dirs {
        match load_edition(&dir, year) {
            Ok(source) => {
                warnings.extend(source.warnings.iter().cloned());
                editions.push(source.to_entry());
            }
            Err(err) => {
                warn!(directory = %dir.display(), error = %err, "skipping unreadable edition");
                warnings.push(format!("{}: {err:#}", dir.display()));
            }
        }
    }

    editions.sort_by(|a, b| {
        a.published_at
            .cmp(&b.published_at)
            .then(a.edition_id.cmp(&b.edition_id))
    });

    Ok(EditionInventoryManifest {
        manifest_version: INVENTORY_VERSION,
        generated_at: now_utc_string(),
        source_directory: editions_dir.display().to_string(),
        edition_count: editions.len(),
        editions,
        warnings,
    })
}
