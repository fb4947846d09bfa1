use std::time::Duration;

use anyhow::{Result, bail};
use tracing::{info, warn};

use crate::cli::ReplayArgs;
use crate::commands::ingest::default_db_path;
use crate::load::progress::{JsonProgressStore, ProgressStore};
use crate::load::replay::{replay_file, replay_unit};
use crate::load::retry::RetryPolicy;
use crate::load::sqlite_sink::SqliteSink;

pub fn run(args: ReplayArgs) -> Result<()> {
    let db_path = args
        .db_path
        .clone()
        .unwrap_or_else(|| default_db_path(&args.cache_root));
    let mut sink = SqliteSink::open(&db_path, Duration::from_millis(args.sink_timeout_ms))?;
    let retry = RetryPolicy::new(args.max_attempts, Duration::from_millis(args.backoff_ms));

    let mut store = JsonProgressStore::open(&args.cache_root)?;

    if let Some(path) = &args.quarantine_path {
        let outcome = replay_file(&mut store, path, args.max_attempts, &mut sink, &retry)?;
        if !outcome.remaining.is_empty() {
            warn!(remaining = outcome.remaining.len(), "records still quarantined");
        }
        return Ok(());
    }

    let units = match (&args.edition, args.all) {
        (Some(edition), _) => vec![edition.clone()],
        (None, true) => store.quarantine_units()?,
        (None, false) => bail!("select --edition <ID>, --all or --quarantine-path <FILE>"),
    };

    if units.is_empty() {
        info!("no quarantined records to replay");
        return Ok(());
    }

    let mut recovered = 0;
    let mut skipped = 0;
    let mut remaining = 0;
    for unit_id in &units {
        let outcome = replay_unit(&mut store, unit_id, args.max_attempts, &mut sink, &retry)?;
        recovered += outcome.recovered;
        skipped += outcome.skipped;
        remaining += outcome.remaining.len();
    }

    info!(
        units = units.len(),
        recovered,
        skipped,
        remaining,
        "replay completed"
    );
    Ok(())
}
