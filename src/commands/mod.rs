pub mod ingest;
pub mod inventory;
pub mod replay;
pub mod status;
