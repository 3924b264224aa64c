// Snapshot I/O - export, import and backend-to-backend migration

pub mod export;
pub mod import;
pub mod migrate;

pub use export::{AccountSnapshot, Exporter};
pub use import::{ImportError, ImportOptions, ImportResult, Importer};
pub use migrate::{MigrationReport, migrate};
