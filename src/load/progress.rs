use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;

use super::quarantine;
use crate::model::{ImportRun, ImportUnitProgress, QuarantineEntry, QuarantineFile, RunTotals};
use crate::util::{
    file_stem_for, now_utc_string, read_json, utc_compact_string, write_json_pretty,
};

pub const PROGRESS_VERSION: u32 = 1;

/// Durable per-unit import state plus the quarantine backlog.
pub trait ProgressStore {
    fn unit(&self, unit_id: &str) -> Option<ImportUnitProgress>;

    /// Records the unit's new state and persists the whole document.
    fn set_unit(&mut self, progress: ImportUnitProgress) -> Result<()>;

    fn append_quarantine(&mut self, unit_id: &str, entries: Vec<QuarantineEntry>) -> Result<()>;

    fn load_quarantine(&self, unit_id: &str) -> Result<Vec<QuarantineEntry>>;

    /// Replaces the unit's backlog; an empty list removes it.
    fn replace_quarantine(&mut self, unit_id: &str, entries: Vec<QuarantineEntry>) -> Result<()>;

    fn quarantine_units(&self) -> Result<Vec<String>>;
}

/// Keeps `manifests/import_progress.json` and `quarantine/<unit>.json` under
/// the cache root.
#[derive(Debug)]
pub struct JsonProgressStore {
    path: PathBuf,
    quarantine_dir: PathBuf,
    run: ImportRun,
}

pub fn progress_path(cache_root: &Path) -> PathBuf {
    cache_root.join("manifests").join("import_progress.json")
}

pub fn quarantine_dir(cache_root: &Path) -> PathBuf {
    cache_root.join("quarantine")
}

impl JsonProgressStore {
    pub fn open(cache_root: &Path) -> Result<Self> {
        let path = progress_path(cache_root);
        let run = if path.exists() {
            read_json(&path).context("failed to load import progress")?
        } else {
            let started_at = now_utc_string();
            ImportRun {
                manifest_version: PROGRESS_VERSION,
                run_id: format!("run-{}", utc_compact_string(Utc::now())),
                started_at: started_at.clone(),
                updated_at: started_at,
                totals: RunTotals::default(),
                units: BTreeMap::new(),
            }
        };

        Ok(Self {
            path,
            quarantine_dir: quarantine_dir(cache_root),
            run,
        })
    }

    pub fn run(&self) -> &ImportRun {
        &self.run
    }

    pub fn quarantine_path(&self, unit_id: &str) -> PathBuf {
        self.quarantine_dir
            .join(format!("{}.json", file_stem_for(unit_id)))
    }

    fn persist(&mut self) -> Result<()> {
        self.run.updated_at = now_utc_string();
        self.run.recompute_totals();
        write_json_pretty(&self.path, &self.run)
    }
}

impl ProgressStore for JsonProgressStore {
    fn unit(&self, unit_id: &str) -> Option<ImportUnitProgress> {
        self.run.units.get(unit_id).cloned()
    }

    fn set_unit(&mut self, mut progress: ImportUnitProgress) -> Result<()> {
        progress.updated_at = Some(now_utc_string());
        self.run.units.insert(progress.unit_id.clone(), progress);
        self.persist()
    }

    fn append_quarantine(&mut self, unit_id: &str, entries: Vec<QuarantineEntry>) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let path = self.quarantine_path(unit_id);
        let mut existing = quarantine::read_entries(&path)?;
        quarantine::merge_entries(&mut existing, entries);
        quarantine::write_entries(&path, unit_id, existing)
    }

    fn load_quarantine(&self, unit_id: &str) -> Result<Vec<QuarantineEntry>> {
        quarantine::read_entries(&self.quarantine_path(unit_id))
    }

    fn replace_quarantine(&mut self, unit_id: &str, entries: Vec<QuarantineEntry>) -> Result<()> {
        quarantine::write_entries(&self.quarantine_path(unit_id), unit_id, entries)
    }

    fn quarantine_units(&self) -> Result<Vec<String>> {
        if !self.quarantine_dir.exists() {
            return Ok(Vec::new());
        }

        let mut units = Vec::new();
        let entries = fs::read_dir(&self.quarantine_dir)
            .with_context(|| format!("failed to read {}", self.quarantine_dir.display()))?;
        for entry in entries {
            let entry = entry.with_context(|| {
                format!("failed to read entry in {}", self.quarantine_dir.display())
            })?;
            let path = entry.path();
            let is_json = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
            if !is_json {
                continue;
            }
            let file: QuarantineFile = read_json(&path)?;
            units.push(file.unit_id);
        }

        units.sort();
        Ok(units)
    }
}
