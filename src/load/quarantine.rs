use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use crate::model::{QuarantineEntry, QuarantineFile};
use crate::util::{now_utc_string, read_json, write_json_pretty};

pub const QUARANTINE_VERSION: u32 = 1;

pub fn read_entries(path: &Path) -> Result<Vec<QuarantineEntry>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file: QuarantineFile = read_json(path)?;
    Ok(file.entries)
}

/// Rewrites the quarantine file for `unit_id`, or removes it once nothing is
/// left to replay.
pub fn write_entries(path: &Path, unit_id: &str, entries: Vec<QuarantineEntry>) -> Result<()> {
    if entries.is_empty() {
        if path.exists() {
            fs::remove_file(path)
                .with_context(|| format!("failed to remove {}", path.display()))?;
        }
        return Ok(());
    }

    let file = QuarantineFile {
        manifest_version: QUARANTINE_VERSION,
        unit_id: unit_id.to_string(),
        updated_at: now_utc_string(),
        entries,
    };
    write_json_pretty(path, &file)
}

/// Adds `incoming` to `existing`; an entry for a record id already present
/// replaces the older one in place.
pub fn merge_entries(existing: &mut Vec<QuarantineEntry>, incoming: Vec<QuarantineEntry>) {
    for entry in incoming {
        match existing
            .iter_mut()
            .find(|current| current.record.id == entry.record.id)
        {
            Some(current) => *current = entry,
            None => existing.push(entry),
        }
    }
}
