use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;

use crate::application::LedgerService;
use crate::domain::AccountRecord;

/// Columns written by [`Exporter::export_accounts_csv`], in order.
pub const CSV_HEADER: [&str; 5] = ["id", "name", "balance", "version", "updated_at"];

/// Full ledger snapshot for export/import
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub version: String,
    pub exported_at: DateTime<Utc>,
    pub backend: String,
    pub accounts: Vec<AccountRecord>,
}

/// Exporter for writing ledger accounts to various formats
pub struct Exporter<'a> {
    service: &'a LedgerService,
}

impl<'a> Exporter<'a> {
    pub fn new(service: &'a LedgerService) -> Self {
        Self { service }
    }

    /// Export every account to CSV, balances in minor units
    pub async fn export_accounts_csv<W: Write>(&self, writer: W) -> Result<usize> {
        let accounts = self.service.accounts().await?;
        let mut csv_writer = csv::Writer::from_writer(writer);

        csv_writer.write_record(CSV_HEADER)?;

        let mut count = 0;
        for account in &accounts {
            csv_writer.write_record(&[
                account.id.to_string(),
                account.name.clone().unwrap_or_default(),
                account.balance.to_string(),
                account.version.to_string(),
                account.updated_at.to_rfc3339(),
            ])?;
            count += 1;
        }

        csv_writer.flush()?;
        Ok(count)
    }

    /// Export every account as a JSON snapshot
    pub async fn export_json<W: Write>(&self, mut writer: W) -> Result<AccountSnapshot> {
        let snapshot = AccountSnapshot {
            version: env!("CARGO_PKG_VERSION").to_string(),
            exported_at: Utc::now(),
            backend: self.service.backend().kind().to_string(),
            accounts: self.service.accounts().await?,
        };

        let json = serde_json::to_string_pretty(&snapshot)?;
        writer.write_all(json.as_bytes())?;
        writer.flush()?;

        Ok(snapshot)
    }
}
