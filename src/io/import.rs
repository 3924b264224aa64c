use anyhow::{Result, bail};
use chrono::{DateTime, NaiveDate, Utc};
use std::io::Read;

use crate::application::{LedgerService, ensure_above_floor};
use crate::domain::{AccountId, AccountRecord, Cents, INITIAL_VERSION, Version};
use crate::io::export::AccountSnapshot;

/// Result of an import operation
#[derive(Debug, Clone, Default)]
pub struct ImportResult {
    pub imported: usize,
    /// Rows whose stored version was already as new or newer
    pub skipped: usize,
    pub errors: Vec<ImportError>,
}

/// Error that occurred during import
#[derive(Debug, Clone)]
pub struct ImportError {
    pub line: usize,
    pub field: Option<String>,
    pub error: String,
}

/// Options for import operations
#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    pub dry_run: bool,
}

/// Importer for loading exported accounts back into the ledger
pub struct Importer<'a> {
    service: &'a LedgerService,
}

impl<'a> Importer<'a> {
    pub fn new(service: &'a LedgerService) -> Self {
        Self { service }
    }

    /// Import accounts from CSV written by the exporter
    pub async fn import_accounts_csv<R: Read>(
        &self,
        reader: R,
        options: ImportOptions,
    ) -> Result<ImportResult> {
        let mut csv_reader = csv::Reader::from_reader(reader);
        let mut result = ImportResult::default();

        for (line_num, row) in csv_reader.records().enumerate() {
            let line = line_num + 2; // +2 for header and 0-indexing

            let row = match row {
                Ok(r) => r,
                Err(e) => {
                    result.errors.push(ImportError {
                        line,
                        field: None,
                        error: format!("CSV parse error: {}", e),
                    });
                    continue;
                }
            };

            let field = |index: usize| row.get(index).unwrap_or("").trim();
            match parse_row(
                field(0),
                field(1),
                field(2),
                field(3),
                field(4),
            ) {
                Ok(record) => self.apply(record, line, &options, &mut result).await,
                Err((name, error)) => result.errors.push(ImportError {
                    line,
                    field: Some(name.to_string()),
                    error,
                }),
            }
        }

        Ok(result)
    }

    /// Import accounts from a JSON snapshot
    pub async fn import_json<R: Read>(
        &self,
        reader: R,
        options: ImportOptions,
    ) -> Result<ImportResult> {
        let snapshot: AccountSnapshot = serde_json::from_reader(reader)?;
        let mut result = ImportResult::default();

        for (index, record) in snapshot.accounts.into_iter().enumerate() {
            let line = index + 1;
            if let Err(error) = validate(&record) {
                result.errors.push(ImportError {
                    line,
                    field: None,
                    error,
                });
                continue;
            }
            self.apply(record, line, &options, &mut result).await;
        }

        Ok(result)
    }

    async fn apply(
        &self,
        record: AccountRecord,
        line: usize,
        options: &ImportOptions,
        result: &mut ImportResult,
    ) {
        if let Err(e) = ensure_above_floor(record.balance, self.service.rules()) {
            result.errors.push(ImportError {
                line,
                field: Some("balance".to_string()),
                error: e.to_string(),
            });
            return;
        }
        if options.dry_run {
            result.imported += 1;
            return;
        }

        match self.service.restore_account(&record).await {
            Ok(true) => result.imported += 1,
            Ok(false) => result.skipped += 1,
            Err(e) => result.errors.push(ImportError {
                line,
                field: None,
                error: format!("Restore failed: {}", e),
            }),
        }
    }
}

fn parse_row(
    id: &str,
    name: &str,
    balance: &str,
    version: &str,
    updated_at: &str,
) -> Result<AccountRecord, (&'static str, String)> {
    let balance: Cents = balance
        .parse()
        .map_err(|e| ("balance", format!("Invalid balance '{}': {}", balance, e)))?;
    let version: Version = version
        .parse()
        .map_err(|e| ("version", format!("Invalid version '{}': {}", version, e)))?;
    if version < INITIAL_VERSION {
        return Err(("version", format!("Invalid version {}", version)));
    }
    let updated_at = if updated_at.is_empty() {
        Utc::now()
    } else {
        parse_timestamp(updated_at).map_err(|e| ("updated_at", e.to_string()))?
    };

    let record = AccountRecord {
        id: AccountId::from(id),
        name: (!name.is_empty()).then(|| name.to_string()),
        balance,
        version,
        updated_at,
    };
    validate(&record).map_err(|e| ("id", e))?;
    Ok(record)
}

fn validate(record: &AccountRecord) -> Result<(), String> {
    if record.id.as_str().trim().is_empty() {
        return Err("Account id is empty".to_string());
    }
    if record.version < INITIAL_VERSION {
        return Err(format!(
            "Account {} has invalid version {}",
            record.id, record.version
        ));
    }
    Ok(())
}

// Helper function to parse timestamp
fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    // Try RFC3339 first
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    // Try YYYY-MM-DD format
    if let Some(dt) = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
    {
        return Ok(dt.and_utc());
    }

    bail!("Invalid timestamp format: {}", s)
}
