use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::NaiveDate;
use uuid::Uuid;

use super::importer::BatchImporter;
use super::pipeline::{UnitOutcome, lock_store, run_unit};
use super::progress::{JsonProgressStore, ProgressStore};
use super::replay::{replay_entries, replay_file, replay_unit};
use super::retry::RetryPolicy;
use super::sink::{RecordSink, SinkError, UpsertReport};
use super::sqlite_sink::SqliteSink;
use crate::model::{
    Category, ClassifiedAd, Contact, ContactKind, ImportUnitProgress, Location, QuarantineEntry,
    SizeTier, UnitStatus,
};
use crate::rules::{CompiledRules, RuleSet};
use crate::source::{EditionSource, SourcePage};

/// Scripted sink: ids in `fail_ids` fail persistently (the whole call fails,
/// like a rolled-back transaction); `transient_failures` calls fail first.
/// `refused_ids` and `flaky_ids` come back in a partial report instead, the
/// flaky ones only once.
#[derive(Default)]
struct MemorySink {
    rows: HashMap<Uuid, ClassifiedAd>,
    fail_ids: HashSet<Uuid>,
    refused_ids: HashSet<Uuid>,
    flaky_ids: HashSet<Uuid>,
    transient_failures: usize,
    calls: usize,
}

impl RecordSink for MemorySink {
    fn upsert(&mut self, records: &[ClassifiedAd]) -> Result<UpsertReport, SinkError> {
        self.calls += 1;
        if self.transient_failures > 0 {
            self.transient_failures -= 1;
            return Err(SinkError::Transient("database is locked".into()));
        }
        if let Some(bad) = records.iter().find(|record| self.fail_ids.contains(&record.id)) {
            return Err(SinkError::Persistent(format!("constraint failed for {}", bad.id)));
        }
        let mut report = UpsertReport::default();
        for record in records {
            if self.refused_ids.contains(&record.id) {
                let err = SinkError::Persistent("CHECK constraint failed".into());
                report.failed.push((record.id, err));
                continue;
            }
            if self.flaky_ids.remove(&record.id) {
                let err = SinkError::Transient("database is busy".into());
                report.failed.push((record.id, err));
                continue;
            }
            self.rows.insert(record.id, record.clone());
            report.succeeded += 1;
        }
        Ok(report)
    }
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn ad(n: u128, title: &str) -> ClassifiedAd {
    ClassifiedAd {
        id: Uuid::from_u128(n),
        category: Category::RealEstate,
        title: title.to_string(),
        description: "Casa de dos pisos con cochera".to_string(),
        contacts: vec![Contact {
            kind: ContactKind::Phone,
            value: "987654321".to_string(),
            is_primary: true,
        }],
        location: Location::Text {
            text: "Cusco, Perú".to_string(),
        },
        size_tier: SizeTier::Small,
        price_text: None,
        published_at: date(2018, 9, 16),
        expires_at: date(2018, 9, 30),
        source_edition: "R2561".to_string(),
        source_page: 3,
        is_historic: true,
        is_active: false,
    }
}

fn importer() -> BatchImporter {
    BatchImporter::new(100, RetryPolicy::immediate(3))
}

fn rules() -> CompiledRules {
    CompiledRules::compile(&RuleSet::default()).unwrap()
}

fn edition_source(pages: &[&str]) -> EditionSource {
    EditionSource {
        edition_id: "R2561".to_string(),
        directory: PathBuf::from("R2561-Sep16-18"),
        published_at: date(2018, 9, 16),
        date_source: "folder_name".to_string(),
        pages: pages
            .iter()
            .enumerate()
            .map(|(index, text)| SourcePage {
                number: index as u32 + 1,
                text: text.to_string(),
            })
            .collect(),
        files: Vec::new(),
        sha256: "abc".to_string(),
        warnings: Vec::new(),
    }
}

const TWO_ADS: &str = "\
VENDO CASA EN WANCHAQ
Amplia casa de tres pisos con cochera y jardín
Razón Cel: 987654321
TERRENO EN SAN JERÓNIMO
Lote de 200 m2 con título de propiedad
Razón Cel: 912345678
ALQUILO
Cel: 984000111 ok 984000222 ok";

#[test]
fn constraint_failures_are_quarantined_without_blocking_the_batch() {
    let mut sink = SqliteSink::open_in_memory().unwrap();
    let records: Vec<ClassifiedAd> = (0..100)
        .map(|n| {
            if matches!(n, 10 | 50 | 90) {
                ad(n, "ab")
            } else {
                ad(n, "CASA EN VENTA")
            }
        })
        .collect();

    let outcome = importer().import(&mut sink, &records);

    assert_eq!(outcome.loaded, 97);
    assert_eq!(outcome.quarantined.len(), 3);
    assert_eq!(outcome.degraded_chunks, 1);
    assert!(outcome.quarantined.iter().all(|entry| entry.attempt_count == 1));
    let ids: HashSet<Uuid> = outcome.quarantined.iter().map(|entry| entry.record.id).collect();
    assert!(ids.contains(&Uuid::from_u128(50)));
    assert_eq!(sink.count_ads().unwrap(), 97);
}

#[test]
fn importing_twice_keeps_one_row_per_id() {
    let mut sink = SqliteSink::open_in_memory().unwrap();
    let records: Vec<ClassifiedAd> = (0..250).map(|n| ad(n, "CASA EN VENTA")).collect();

    let first = importer().import(&mut sink, &records);
    let mut changed = records.clone();
    changed[0].title = "CASA REMODELADA".to_string();
    let second = importer().import(&mut sink, &changed);

    assert_eq!(first.chunks, 3);
    assert_eq!(first.loaded, 250);
    assert_eq!(second.loaded, 250);
    assert_eq!(sink.count_ads().unwrap(), 250);
    assert_eq!(sink.count_active_ads().unwrap(), 0);

    let title: String = sink
        .connection()
        .query_row(
            "SELECT title FROM ads WHERE id = ?1",
            [Uuid::from_u128(0).to_string()],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(title, "CASA REMODELADA");
}

#[test]
fn transient_failures_are_retried() {
    let mut sink = MemorySink {
        transient_failures: 2,
        ..MemorySink::default()
    };
    let records: Vec<ClassifiedAd> = (0..10).map(|n| ad(n, "CASA EN VENTA")).collect();

    let outcome = importer().import(&mut sink, &records);

    assert_eq!(outcome.loaded, 10);
    assert!(outcome.quarantined.is_empty());
    assert_eq!(outcome.degraded_chunks, 0);
    assert_eq!(sink.calls, 3);
}

#[test]
fn exhausted_transient_failures_degrade_then_recover() {
    let mut sink = MemorySink {
        transient_failures: 3,
        ..MemorySink::default()
    };
    let records: Vec<ClassifiedAd> = (0..4).map(|n| ad(n, "CASA EN VENTA")).collect();

    let outcome = importer().import(&mut sink, &records);

    assert_eq!(outcome.degraded_chunks, 1);
    assert_eq!(outcome.loaded, 4);
    assert_eq!(sink.rows.len(), 4);
}

#[test]
fn persistently_refused_records_are_quarantined_without_rewrite() {
    let mut sink = MemorySink::default();
    sink.refused_ids.insert(Uuid::from_u128(2));
    let records: Vec<ClassifiedAd> = (0..5).map(|n| ad(n, "CASA EN VENTA")).collect();

    let outcome = importer().import(&mut sink, &records);

    assert_eq!(outcome.loaded, 4);
    assert_eq!(outcome.quarantined.len(), 1);
    assert_eq!(outcome.quarantined[0].record.id, Uuid::from_u128(2));
    assert_eq!(outcome.quarantined[0].attempt_count, 1);
    assert_eq!(outcome.degraded_chunks, 0);
    assert_eq!(sink.calls, 1);
}

#[test]
fn transiently_refused_records_are_retried_one_by_one() {
    let mut sink = MemorySink::default();
    sink.flaky_ids.insert(Uuid::from_u128(3));
    let records: Vec<ClassifiedAd> = (0..5).map(|n| ad(n, "CASA EN VENTA")).collect();

    let outcome = importer().import(&mut sink, &records);

    assert_eq!(outcome.loaded, 5);
    assert!(outcome.quarantined.is_empty());
    assert_eq!(outcome.degraded_chunks, 1);
    assert_eq!(sink.calls, 2);
    assert_eq!(sink.rows.len(), 5);
}

#[test]
fn completed_unit_is_not_reprocessed() {
    let dir = tempfile::tempdir().unwrap();
    let store = Mutex::new(JsonProgressStore::open(dir.path()).unwrap());
    let source = edition_source(&[TWO_ADS]);
    let mut sink = MemorySink::default();

    let first = run_unit(&rules(), &source, &store, &mut sink, &importer(), false).unwrap();
    assert!(matches!(first, UnitOutcome::Completed(_)));
    let calls_after_first = sink.calls;

    let second = run_unit(&rules(), &source, &store, &mut sink, &importer(), false).unwrap();
    assert!(matches!(second, UnitOutcome::Skipped));
    assert_eq!(sink.calls, calls_after_first);

    let third = run_unit(&rules(), &source, &store, &mut sink, &importer(), true).unwrap();
    assert!(matches!(third, UnitOutcome::Completed(_)));
    assert_eq!(sink.rows.len(), 2);
}

#[test]
fn unit_counters_are_conserved() {
    let dir = tempfile::tempdir().unwrap();
    let store = Mutex::new(JsonProgressStore::open(dir.path()).unwrap());
    let source = edition_source(&[TWO_ADS, "12\nLA RADIO"]);
    let mut sink = MemorySink::default();
    let extraction = super::pipeline::extract_edition(&rules(), &source);
    sink.fail_ids.insert(extraction.ads[1].id);

    let UnitOutcome::Completed(progress) =
        run_unit(&rules(), &source, &store, &mut sink, &importer(), false).unwrap()
    else {
        panic!("unit should complete");
    };

    assert_eq!(progress.pages_processed, 2);
    assert_eq!(progress.ads_extracted, 3);
    assert_eq!(progress.rejected, 1);
    assert_eq!(progress.ads_loaded, 1);
    assert_eq!(progress.quarantined, 1);
    assert_eq!(
        progress.ads_loaded + progress.quarantined + progress.rejected,
        progress.ads_extracted
    );

    let store = store.into_inner().unwrap();
    assert_eq!(store.unit("R2561").unwrap().status, UnitStatus::Completed);
    assert_eq!(store.load_quarantine("R2561").unwrap().len(), 1);
    assert_eq!(store.quarantine_units().unwrap(), vec!["R2561".to_string()]);
}

#[test]
fn replay_converges_once_the_sink_accepts() {
    let dir = tempfile::tempdir().unwrap();
    let store = Mutex::new(JsonProgressStore::open(dir.path()).unwrap());
    let source = edition_source(&[TWO_ADS]);
    let mut sink = MemorySink::default();
    for ad in super::pipeline::extract_edition(&rules(), &source).ads {
        sink.fail_ids.insert(ad.id);
    }

    run_unit(&rules(), &source, &store, &mut sink, &importer(), false).unwrap();
    let mut store = store.into_inner().unwrap();
    assert_eq!(store.load_quarantine("R2561").unwrap().len(), 2);

    sink.fail_ids.clear();
    let retry = RetryPolicy::immediate(3);
    let outcome = replay_unit(&mut store, "R2561", 3, &mut sink, &retry).unwrap();
    assert_eq!(outcome.recovered, 2);
    assert!(outcome.remaining.is_empty());
    assert!(!store.quarantine_path("R2561").exists());

    let unit = store.unit("R2561").unwrap();
    assert_eq!(unit.ads_loaded, 2);
    assert_eq!(unit.quarantined, 0);

    let again = replay_unit(&mut store, "R2561", 3, &mut sink, &retry).unwrap();
    assert_eq!(again.recovered, 0);
}

#[test]
fn reprocessing_a_unit_drops_its_stale_backlog() {
    let dir = tempfile::tempdir().unwrap();
    let store = Mutex::new(JsonProgressStore::open(dir.path()).unwrap());
    let source = edition_source(&[TWO_ADS]);
    let mut sink = MemorySink::default();
    let extraction = super::pipeline::extract_edition(&rules(), &source);
    sink.fail_ids.insert(extraction.ads[0].id);

    run_unit(&rules(), &source, &store, &mut sink, &importer(), false).unwrap();
    assert_eq!(lock_store(&store).unwrap().load_quarantine("R2561").unwrap().len(), 1);

    sink.fail_ids.clear();
    let UnitOutcome::Completed(progress) =
        run_unit(&rules(), &source, &store, &mut sink, &importer(), true).unwrap()
    else {
        panic!("unit should complete");
    };
    assert_eq!(progress.ads_loaded, 2);
    assert_eq!(progress.quarantined, 0);

    let mut store = store.into_inner().unwrap();
    assert!(store.load_quarantine("R2561").unwrap().is_empty());
    assert!(!store.quarantine_path("R2561").exists());

    let retry = RetryPolicy::immediate(3);
    let replayed = replay_unit(&mut store, "R2561", 3, &mut sink, &retry).unwrap();
    assert_eq!(replayed.recovered, 0);

    let unit = store.unit("R2561").unwrap();
    assert_eq!(unit.ads_loaded + unit.quarantined + unit.rejected, unit.ads_extracted);
}

#[test]
fn replay_stops_at_max_attempts() {
    let mut sink = MemorySink::default();
    let stuck = ad(1, "CASA EN VENTA");
    sink.fail_ids.insert(stuck.id);
    let retry = RetryPolicy::immediate(1);

    let mut entries = vec![QuarantineEntry {
        record: stuck,
        last_error: "constraint".to_string(),
        attempt_count: 1,
    }];

    for expected in 2..=3 {
        let outcome = replay_entries(entries, 3, &mut sink, &retry);
        assert_eq!(outcome.remaining[0].attempt_count, expected);
        entries = outcome.remaining;
    }

    let calls = sink.calls;
    let outcome = replay_entries(entries, 3, &mut sink, &retry);
    assert_eq!(outcome.skipped, 1);
    assert_eq!(outcome.remaining[0].attempt_count, 3);
    assert_eq!(sink.calls, calls);
}

#[test]
fn replay_file_deletes_empty_backlog_and_credits_the_unit() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = JsonProgressStore::open(dir.path()).unwrap();
    store
        .append_quarantine(
            "R2561",
            vec![QuarantineEntry {
                record: ad(7, "CASA EN VENTA"),
                last_error: "database is locked".to_string(),
                attempt_count: 1,
            }],
        )
        .unwrap();
    let mut unit = ImportUnitProgress::pending("R2561");
    unit.status = UnitStatus::Completed;
    unit.ads_extracted = 1;
    unit.quarantined = 1;
    store.set_unit(unit).unwrap();
    let path = store.quarantine_path("R2561");
    assert!(path.exists());

    let mut sink = MemorySink::default();
    let outcome =
        replay_file(&mut store, &path, 3, &mut sink, &RetryPolicy::immediate(3)).unwrap();
    assert_eq!(outcome.recovered, 1);
    assert!(!path.exists());

    let unit = store.unit("R2561").unwrap();
    assert_eq!(unit.ads_loaded, 1);
    assert_eq!(unit.quarantined, 0);
}

#[test]
fn quarantine_append_merges_by_record_id() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = JsonProgressStore::open(dir.path()).unwrap();
    let entry = |error: &str| QuarantineEntry {
        record: ad(3, "CASA EN VENTA"),
        last_error: error.to_string(),
        attempt_count: 1,
    };

    store.append_quarantine("R2561", vec![entry("first")]).unwrap();
    store.append_quarantine("R2561", vec![entry("second")]).unwrap();

    let entries = store.load_quarantine("R2561").unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].last_error, "second");
}
