use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::load::importer::DEFAULT_CHUNK_SIZE;

#[derive(Parser, Debug)]
#[command(
    name = "adingest",
    version,
    about = "Classified-ad extraction and resilient import for OCR'd magazine editions"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Inventory(InventoryArgs),
    Ingest(IngestArgs),
    Replay(ReplayArgs),
    Status(StatusArgs),
}

#[derive(Args, Debug, Clone)]
pub struct InventoryArgs {
    #[arg(long, default_value = ".cache/adingest")]
    pub cache_root: PathBuf,

    /// Defaults to `<cache_root>/editions`.
    #[arg(long)]
    pub editions_dir: Option<PathBuf>,

    #[arg(long)]
    pub manifest_path: Option<PathBuf>,

    /// Year for folder names whose date carries none.
    #[arg(long)]
    pub year: Option<i32>,

    #[arg(long, default_value_t = false)]
    pub dry_run: bool,
}

#[derive(Args, Debug, Clone)]
pub struct IngestArgs {
    #[arg(long, default_value = ".cache/adingest")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub editions_dir: Option<PathBuf>,

    #[arg(long)]
    pub inventory_manifest_path: Option<PathBuf>,

    #[arg(long)]
    pub db_path: Option<PathBuf>,

    /// JSON rule set replacing the built-in tables.
    #[arg(long)]
    pub rules_path: Option<PathBuf>,

    #[arg(long, default_value_t = false)]
    pub refresh_inventory: bool,

    #[arg(long, conflicts_with = "all")]
    pub edition: Option<String>,

    #[arg(long, default_value_t = false)]
    pub all: bool,

    #[arg(long)]
    pub year: Option<i32>,

    /// Extract and classify without touching the sink or progress files.
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,

    /// Process units even when they already completed.
    #[arg(long, default_value_t = false)]
    pub reprocess: bool,

    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: usize,

    #[arg(long, default_value_t = 1)]
    pub jobs: usize,

    #[arg(long, default_value_t = 3)]
    pub max_attempts: u32,

    #[arg(long, default_value_t = 2000)]
    pub backoff_ms: u64,

    #[arg(long, default_value_t = 5000)]
    pub sink_timeout_ms: u64,

    /// Dry-run only: write the extracted records here as JSON.
    #[arg(long)]
    pub preview_path: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct ReplayArgs {
    #[arg(long, default_value = ".cache/adingest")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub db_path: Option<PathBuf>,

    #[arg(long, conflicts_with_all = ["all", "quarantine_path"])]
    pub edition: Option<String>,

    #[arg(long, default_value_t = false, conflicts_with = "quarantine_path")]
    pub all: bool,

    #[arg(long)]
    pub quarantine_path: Option<PathBuf>,

    #[arg(long, default_value_t = 3)]
    pub max_attempts: u32,

    #[arg(long, default_value_t = 2000)]
    pub backoff_ms: u64,

    #[arg(long, default_value_t = 5000)]
    pub sink_timeout_ms: u64,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[arg(long, default_value = ".cache/adingest")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub db_path: Option<PathBuf>,
}
