//! Loading validated ads into the record sink: chunked idempotent upserts,
//! per-record fallback, retries, quarantine, resumable progress and replay.

pub mod importer;
pub mod pipeline;
pub mod progress;
pub mod quarantine;
pub mod replay;
pub mod retry;
pub mod sink;
pub mod sqlite_sink;
#[cfg(test)]
mod tests;
