use anyhow::{Context, Result};
use tracing::info;

use crate::storage::StorageBackend;

/// Outcome of copying one backend into another
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub copied: usize,
    /// Rows the target already held at the same or a newer version
    pub skipped: usize,
}

/// Copy every account row from `source` into `target`.
///
/// Rows keep their balance and version, so running the migration twice is a
/// no-op and a target that moved on is never rolled back.
pub async fn migrate(
    source: &dyn StorageBackend,
    target: &dyn StorageBackend,
) -> Result<MigrationReport> {
    let accounts = source
        .load_all()
        .await
        .with_context(|| format!("Failed to read accounts from {}", source.kind()))?;

    let mut report = MigrationReport::default();
    for account in &accounts {
        let written = target
            .restore(account)
            .await
            .with_context(|| format!("Failed to copy account {} to {}", account.id, target.kind()))?;
        if written {
            report.copied += 1;
        } else {
            report.skipped += 1;
        }
    }

    info!(
        from = %source.kind(),
        to = %target.kind(),
        copied = report.copied,
        skipped = report.skipped,
        "storage migrated"
    );
    Ok(report)
}
