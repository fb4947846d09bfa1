use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use rusqlite::{Connection, ErrorCode, params};

use super::sink::{RecordSink, SinkError, UpsertReport};
use crate::model::ClassifiedAd;

/// SQLite-backed sink. The `ads` table mirrors the record invariants as
/// CHECK constraints, so a malformed record fails persistently at write time.
pub struct SqliteSink {
    connection: Connection,
}

impl SqliteSink {
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self> {
        if let Some(parent) = path.parent() {
            crate::util::ensure_directory(parent)?;
        }
        let connection = Connection::open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        connection
            .busy_timeout(busy_timeout)
            .context("failed to set busy_timeout")?;
        configure_connection(&connection)?;
        ensure_schema(&connection)?;
        Ok(Self { connection })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let connection =
            Connection::open_in_memory().context("failed to open in-memory database")?;
        ensure_schema(&connection)?;
        Ok(Self { connection })
    }

    pub fn count_ads(&self) -> Result<i64> {
        query_count(&self.connection, "SELECT COUNT(*) FROM ads")
    }

    pub fn count_active_ads(&self) -> Result<i64> {
        query_count(&self.connection, "SELECT COUNT(*) FROM ads WHERE is_active = 1")
    }

    #[cfg(test)]
    pub fn connection(&self) -> &Connection {
        &self.connection
    }
}

fn configure_connection(connection: &Connection) -> Result<()> {
    connection
        .pragma_update(None, "journal_mode", "WAL")
        .context("failed to set journal_mode=WAL")?;
    connection
        .pragma_update(None, "synchronous", "NORMAL")
        .context("failed to set synchronous=NORMAL")?;
    Ok(())
}

fn ensure_schema(connection: &Connection) -> Result<()> {
    connection
        .execute_batch(
            "
        CREATE TABLE IF NOT EXISTS ads (
          id TEXT PRIMARY KEY,
          category TEXT NOT NULL CHECK (category IN (
            'jobs', 'real-estate', 'vehicles', 'services',
            'goods', 'events', 'businesses', 'community'
          )),
          title TEXT NOT NULL CHECK (length(title) BETWEEN 3 AND 100),
          description TEXT NOT NULL CHECK (length(description) BETWEEN 10 AND 2000),
          contacts_json TEXT NOT NULL CHECK (json_array_length(contacts_json) > 0),
          primary_contact TEXT,
          location_json TEXT NOT NULL,
          location_text TEXT NOT NULL,
          size_tier TEXT NOT NULL CHECK (size_tier IN ('tiny', 'small', 'medium', 'large', 'huge')),
          price_text TEXT,
          published_at TEXT NOT NULL,
          expires_at TEXT NOT NULL CHECK (expires_at > published_at),
          source_edition TEXT NOT NULL,
          source_page INTEGER NOT NULL,
          is_historic INTEGER NOT NULL,
          is_active INTEGER NOT NULL,
          updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_ads_category ON ads(category);
        CREATE INDEX IF NOT EXISTS idx_ads_source ON ads(source_edition, source_page);
        ",
        )
        .context("failed to create ads schema")
}

fn query_count(connection: &Connection, sql: &str) -> Result<i64> {
    let count = connection.query_row(sql, [], |row| row.get(0))?;
    Ok(count)
}

fn classify_error(err: &rusqlite::Error) -> SinkError {
    let transient = matches!(
        err.sqlite_error_code(),
        Some(
            ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked
                | ErrorCode::SystemIoFailure
                | ErrorCode::OperationInterrupted
                | ErrorCode::CannotOpen
        )
    );
    if transient {
        SinkError::Transient(err.to_string())
    } else {
        SinkError::Persistent(err.to_string())
    }
}

fn encode(err: serde_json::Error) -> SinkError {
    SinkError::Persistent(format!("failed to encode record: {err}"))
}

impl RecordSink for SqliteSink {
    /// Writes the whole slice in one transaction. Any failing statement
    /// rolls the transaction back and fails the call.
    fn upsert(&mut self, records: &[ClassifiedAd]) -> Result<UpsertReport, SinkError> {
        let updated_at = crate::util::now_utc_string();
        let tx = self
            .connection
            .transaction()
            .map_err(|err| classify_error(&err))?;

        {
            let mut stmt = tx
                .prepare_cached(
                    "
                INSERT INTO ads(
                  id, category, title, description, contacts_json, primary_contact,
                  location_json, location_text, size_tier, price_text,
                  published_at, expires_at, source_edition, source_page,
                  is_historic, is_active, updated_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
                ON CONFLICT(id) DO UPDATE SET
                  category=excluded.category,
                  title=excluded.title,
                  description=excluded.description,
                  contacts_json=excluded.contacts_json,
                  primary_contact=excluded.primary_contact,
                  location_json=excluded.location_json,
                  location_text=excluded.location_text,
                  size_tier=excluded.size_tier,
                  price_text=excluded.price_text,
                  published_at=excluded.published_at,
                  expires_at=excluded.expires_at,
                  source_edition=excluded.source_edition,
                  source_page=excluded.source_page,
                  is_historic=excluded.is_historic,
                  is_active=excluded.is_active,
                  updated_at=excluded.updated_at
                ",
                )
                .map_err(|err| classify_error(&err))?;

            for record in records {
                let contacts_json = serde_json::to_string(&record.contacts).map_err(encode)?;
                let location_json = serde_json::to_string(&record.location).map_err(encode)?;
                stmt.execute(params![
                    record.id.to_string(),
                    record.category.as_str(),
                    record.title,
                    record.description,
                    contacts_json,
                    record.primary_contact().map(|contact| contact.value.clone()),
                    location_json,
                    record.location.display_text(),
                    record.size_tier.as_str(),
                    record.price_text,
                    record.published_at,
                    record.expires_at,
                    record.source_edition,
                    record.source_page,
                    record.is_historic,
                    record.is_active,
                    updated_at,
                ])
                .map_err(|err| classify_error(&err))?;
            }
        }

        tx.commit().map_err(|err| classify_error(&err))?;

        Ok(UpsertReport {
            succeeded: records.len(),
            failed: Vec::new(),
        })
    }
}
