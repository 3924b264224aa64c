mod common;

use aconomy::application::LedgerError;
use aconomy::config::EconomyRules;
use aconomy::domain::AccountRecord;
use aconomy::io::{Exporter, ImportOptions, Importer, migrate};
use aconomy::storage::{Backend, BackendKind, StorageBackend};
use anyhow::Result;
use tempfile::TempDir;

use common::{id, test_config, test_service, test_service_with};

#[tokio::test]
async fn test_csv_export_import_roundtrip() -> Result<()> {
    let (source, _source_dir) = test_service(BackendKind::Sqlite).await?;
    source.ensure_account(&id("alice"), Some("Alice")).await?;
    source.set(&id("alice"), 1_250).await?;
    source.add(&id("bob"), 75).await?;
    source.subtract(&id("bob"), 25).await?;

    let mut buffer = Vec::new();
    let exported = Exporter::new(&source).export_accounts_csv(&mut buffer).await?;
    assert_eq!(exported, 2);
    let csv = String::from_utf8(buffer.clone())?;
    assert!(csv.starts_with("id,name,balance,version,updated_at"));

    let (target, _target_dir) = test_service(BackendKind::DuckDb).await?;
    let importer = Importer::new(&target);
    let result = importer
        .import_accounts_csv(buffer.as_slice(), ImportOptions::default())
        .await?;
    assert_eq!(result.imported, 2);
    assert!(result.errors.is_empty(), "{:?}", result.errors);

    let alice = target.account(&id("alice")).await?;
    assert_eq!(alice.balance, 1_250);
    assert_eq!(alice.name.as_deref(), Some("Alice"));
    let bob = target.account(&id("bob")).await?;
    assert_eq!(bob.balance, 50);
    assert_eq!(bob.version, source.account(&id("bob")).await?.version);

    // Same versions again: nothing to write.
    let again = importer
        .import_accounts_csv(buffer.as_slice(), ImportOptions::default())
        .await?;
    assert_eq!((again.imported, again.skipped), (0, 2));
    Ok(())
}

#[tokio::test]
async fn test_json_snapshot_roundtrip() -> Result<()> {
    let (source, _source_dir) = test_service(BackendKind::DuckDb).await?;
    source.set(&id("alice"), 300).await?;
    source.set(&id("carol"), 9_000).await?;

    let mut buffer = Vec::new();
    let snapshot = Exporter::new(&source).export_json(&mut buffer).await?;
    assert_eq!(snapshot.accounts.len(), 2);
    assert_eq!(snapshot.backend, "duckdb");

    let (target, _target_dir) = test_service(BackendKind::Sqlite).await?;
    let result = Importer::new(&target)
        .import_json(buffer.as_slice(), ImportOptions::default())
        .await?;
    assert_eq!(result.imported, 2);
    assert_eq!(target.get_balance(&id("carol")).await?, 9_000);
    assert_eq!(target.account(&id("alice")).await?.version, 2);
    Ok(())
}

#[tokio::test]
async fn test_import_reports_bad_rows_and_keeps_going() -> Result<()> {
    let (service, _temp) = test_service(BackendKind::Sqlite).await?;
    let csv = "\
id,name,balance,version,updated_at
alice,Alice,100,3,2024-01-15T10:00:00Z
bob,,lots,1,2024-01-15T10:00:00Z
carol,,5,0,2024-01-15T10:00:00Z
dave,Dave,42,1,2024-01-15T10:00:00Z
";
    let result = Importer::new(&service)
        .import_accounts_csv(csv.as_bytes(), ImportOptions::default())
        .await?;

    assert_eq!(result.imported, 2);
    assert_eq!(result.errors.len(), 2);
    assert_eq!(result.errors[0].line, 3);
    assert_eq!(result.errors[0].field.as_deref(), Some("balance"));
    assert_eq!(result.errors[1].field.as_deref(), Some("version"));

    assert_eq!(service.account(&id("alice")).await?.version, 3);
    assert_eq!(service.get_balance(&id("dave")).await?, 42);
    assert!(!service.has_account(&id("bob")).await?);
    Ok(())
}

#[tokio::test]
async fn test_import_rejects_balances_below_floor() -> Result<()> {
    let (service, _temp) = test_service(BackendKind::Sqlite).await?;
    let csv = "\
id,name,balance,version,updated_at
alice,,-500,5,
bob,Bob,20,2,
";
    for dry_run in [true, false] {
        let result = Importer::new(&service)
            .import_accounts_csv(csv.as_bytes(), ImportOptions { dry_run })
            .await?;
        assert_eq!(result.imported, 1, "dry_run={dry_run}");
        assert_eq!(result.errors.len(), 1, "dry_run={dry_run}");
        assert_eq!(result.errors[0].line, 2);
        assert_eq!(result.errors[0].field.as_deref(), Some("balance"));
    }
    assert!(!service.has_account(&id("alice")).await?);
    assert_eq!(service.get_balance(&id("bob")).await?, 20);

    // The ledger itself refuses the row too.
    let record = AccountRecord {
        balance: -9_000,
        version: 3,
        ..service.account(&id("carol")).await?
    };
    assert!(matches!(
        service.restore_account(&record).await,
        Err(LedgerError::InvalidAmount(_))
    ));
    assert_eq!(service.get_balance(&id("carol")).await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_import_below_floor_allowed_with_overdraft() -> Result<()> {
    let rules = EconomyRules {
        allow_overdraft: true,
        ..EconomyRules::default()
    };
    let (service, _temp) = test_service_with(BackendKind::Sqlite, rules).await?;
    let csv = "\
id,name,balance,version,updated_at
alice,,-500,5,
";
    let result = Importer::new(&service)
        .import_accounts_csv(csv.as_bytes(), ImportOptions::default())
        .await?;
    assert_eq!(result.imported, 1);
    assert_eq!(service.get_balance(&id("alice")).await?, -500);
    Ok(())
}

#[tokio::test]
async fn test_dry_run_writes_nothing() -> Result<()> {
    let (service, _temp) = test_service(BackendKind::Sqlite).await?;
    let csv = "\
id,name,balance,version,updated_at
alice,Alice,100,1,2024-01-15T10:00:00Z
";
    let result = Importer::new(&service)
        .import_accounts_csv(csv.as_bytes(), ImportOptions { dry_run: true })
        .await?;

    assert_eq!(result.imported, 1);
    assert!(!service.has_account(&id("alice")).await?);
    Ok(())
}

#[tokio::test]
async fn test_migrate_between_backends() -> Result<()> {
    let temp = TempDir::new()?;
    let sqlite = Backend::open(&test_config(BackendKind::Sqlite).storage, temp.path()).await?;
    let duckdb = Backend::open(&test_config(BackendKind::DuckDb).storage, temp.path()).await?;

    let alice = sqlite.create_if_absent(&id("alice"), Some("Alice"), 0).await?;
    sqlite.store(&alice.id, 640, alice.version).await?;
    sqlite.create_if_absent(&id("bob"), None, 15).await?;

    let report = migrate(&sqlite, &duckdb).await?;
    assert_eq!((report.copied, report.skipped), (2, 0));

    let copied = duckdb.load(&id("alice")).await?.expect("alice copied");
    assert_eq!(copied.balance, 640);
    assert_eq!(copied.version, 2);
    assert_eq!(copied.name.as_deref(), Some("Alice"));

    let report = migrate(&sqlite, &duckdb).await?;
    assert_eq!((report.copied, report.skipped), (0, 2));

    sqlite.close().await?;
    duckdb.close().await?;
    Ok(())
}
