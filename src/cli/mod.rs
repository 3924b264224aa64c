use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

use crate::application::LedgerService;
use crate::config::EconomyConfig;
use crate::domain::{AccountId, Cents, Currency, parse_minor};
use crate::plugin::{Aconomy, PluginLifecycle};
use crate::storage::{Backend, BackendKind, StorageBackend};

/// Leaderboard size when none (or a non-positive one) is given
const DEFAULT_TOP_SIZE: i64 = 10;
const MAX_TOP_SIZE: i64 = 100;

/// Aconomy - economy ledger administration
#[derive(Parser)]
#[command(name = "aconomy")]
#[command(about = "Inspect and administer an Aconomy economy ledger")]
#[command(version)]
pub struct Cli {
    /// Data directory holding config.json and the database
    #[arg(short, long, env = "ACONOMY_DATA_DIR", default_value = "aconomy")]
    pub data_dir: PathBuf,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the data directory, default config and database
    Init,

    /// Show the balance of an account, or of every account
    Balance {
        /// Account id or name (omit for all accounts)
        account: Option<String>,
    },

    /// Add money to an account
    Deposit {
        /// Account id or name
        account: String,

        /// Amount (e.g., "50.00" or "50")
        amount: String,
    },

    /// Take money from an account
    Withdraw {
        /// Account id or name
        account: String,

        /// Amount (e.g., "50.00" or "50")
        amount: String,
    },

    /// Overwrite the balance of an account
    Set {
        /// Account id or name
        account: String,

        /// New balance
        amount: String,
    },

    /// Move money between two accounts
    Transfer {
        /// Amount to transfer
        amount: String,

        /// Source account id or name
        #[arg(long)]
        from: String,

        /// Destination account id or name
        #[arg(long)]
        to: String,
    },

    /// Show the richest accounts
    Top {
        /// Number of accounts to show (1-100)
        #[arg(default_value_t = DEFAULT_TOP_SIZE, allow_negative_numbers = true)]
        size: i64,
    },

    /// Change the display name of an account
    Rename {
        /// Account id or current name
        account: String,

        /// New name
        name: String,
    },

    /// Delete an account
    Delete {
        /// Account id or name
        account: String,
    },

    /// Export every account to CSV or JSON
    Export {
        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Format: csv, json
        #[arg(short, long, default_value = "csv")]
        format: String,
    },

    /// Import accounts from a previous export
    Import {
        /// Input file (stdin if omitted)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Format: csv, json
        #[arg(short, long, default_value = "csv")]
        format: String,

        /// Validate without writing anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Copy every account into another storage backend
    Migrate {
        /// Target backend: sqlite, duckdb
        #[arg(long)]
        to: String,

        /// Also switch config.json to the target backend
        #[arg(long)]
        switch: bool,
    },
}

/// Clamp a requested leaderboard size the way the in-game command does.
pub fn top_size(requested: i64) -> usize {
    let size = if requested <= 0 {
        DEFAULT_TOP_SIZE
    } else {
        requested.min(MAX_TOP_SIZE)
    };
    size as usize
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        if let Commands::Migrate { to, switch } = &self.command {
            return run_migrate_command(&self.data_dir, to, *switch).await;
        }

        let mut plugin = Aconomy::start(&self.data_dir).await?;
        let result = run_command(&plugin, self.command).await;
        plugin.shutdown().await?;
        result
    }
}

async fn run_command(plugin: &Aconomy, command: Commands) -> Result<()> {
    let ledger = plugin.ledger()?;
    let currency = &plugin.config()?.currency;

    match command {
        Commands::Init => {
            let config = plugin.config()?;
            println!(
                "Economy initialized: {}",
                config.storage.kind.database_path(plugin.data_dir()).display()
            );
        }

        Commands::Balance { account } => {
            run_balance_command(ledger, currency, account.as_deref()).await?;
        }

        Commands::Deposit { account, amount } => {
            let id = resolve_account(ledger, &account).await?;
            let amount = parse_amount(&amount, currency)?;
            let record = ledger.add(&id, amount).await?;
            println!(
                "Deposited {} to {}: balance {}",
                currency.format(amount),
                record.display_name(),
                currency.format(record.balance)
            );
        }

        Commands::Withdraw { account, amount } => {
            let id = resolve_account(ledger, &account).await?;
            let amount = parse_amount(&amount, currency)?;
            let record = ledger.subtract(&id, amount).await?;
            println!(
                "Withdrew {} from {}: balance {}",
                currency.format(amount),
                record.display_name(),
                currency.format(record.balance)
            );
        }

        Commands::Set { account, amount } => {
            let id = resolve_account(ledger, &account).await?;
            let amount = parse_amount(&amount, currency)?;
            let record = ledger.set(&id, amount).await?;
            println!(
                "{}'s balance has been set to {}",
                record.display_name(),
                currency.format(record.balance)
            );
        }

        Commands::Transfer { amount, from, to } => {
            let from = resolve_account(ledger, &from).await?;
            let to = resolve_account(ledger, &to).await?;
            let amount = parse_amount(&amount, currency)?;
            let receipt = ledger.transfer(&from, &to, amount).await?;
            println!(
                "Transferred {} {} -> {} ({})",
                currency.format(receipt.amount),
                receipt.from.display_name(),
                receipt.to.display_name(),
                receipt.request_id
            );
        }

        Commands::Top { size } => {
            let accounts = ledger.top_accounts(top_size(size)).await?;
            if accounts.is_empty() {
                println!("No accounts found.");
            } else {
                println!("Top {} richest accounts", accounts.len());
                for (rank, account) in accounts.iter().enumerate() {
                    println!(
                        "{:>3}. {:<24} {:>14}",
                        rank + 1,
                        truncate(account.display_name(), 24),
                        currency.format(account.balance)
                    );
                }
            }
        }

        Commands::Rename { account, name } => {
            let id = resolve_account(ledger, &account).await?;
            let record = ledger.rename_account(&id, &name).await?;
            println!("Renamed {} to {}", record.id, record.display_name());
        }

        Commands::Delete { account } => {
            let id = resolve_account(ledger, &account).await?;
            if ledger.delete_account(&id).await? {
                println!("Deleted account {}", id);
            } else {
                bail!("Account not found: {}", account);
            }
        }

        Commands::Export { output, format } => {
            run_export_command(ledger, output.as_deref(), &format).await?;
        }

        Commands::Import {
            input,
            format,
            dry_run,
        } => {
            run_import_command(ledger, input.as_deref(), &format, dry_run).await?;
        }

        Commands::Migrate { .. } => bail!("migrate cannot run while the ledger is open"),
    }

    Ok(())
}

/// Accept either a stored display name or a raw account id.
async fn resolve_account(ledger: &LedgerService, account: &str) -> Result<AccountId> {
    if let Some(record) = ledger.find_by_name(account).await? {
        return Ok(record.id);
    }
    Ok(AccountId::from(account))
}

fn parse_amount(amount: &str, currency: &Currency) -> Result<Cents> {
    parse_minor(amount, currency.fraction_digits).with_context(|| {
        format!(
            "Invalid amount '{}'. Use up to {} decimal places, e.g. '50.00'",
            amount, currency.fraction_digits
        )
    })
}

async fn run_balance_command(
    ledger: &LedgerService,
    currency: &Currency,
    account: Option<&str>,
) -> Result<()> {
    match account {
        Some(account) => {
            let id = resolve_account(ledger, account).await?;
            let record = ledger.account(&id).await?;
            println!(
                "{}: {}",
                record.display_name(),
                currency.format(record.balance)
            );
        }
        None => {
            let accounts = ledger.accounts().await?;
            if accounts.is_empty() {
                println!("No accounts found.");
            } else {
                println!("{:<38} {:<20} {:>14}", "ACCOUNT", "NAME", "BALANCE");
                println!("{}", "-".repeat(74));
                for account in accounts {
                    println!(
                        "{:<38} {:<20} {:>14}",
                        account.id,
                        truncate(account.name.as_deref().unwrap_or(""), 20),
                        currency.format(account.balance)
                    );
                }
            }
        }
    }
    Ok(())
}

async fn run_export_command(
    ledger: &LedgerService,
    output: Option<&Path>,
    format: &str,
) -> Result<()> {
    use crate::io::Exporter;
    use std::fs::File;
    use std::io::{Write, stdout};

    let exporter = Exporter::new(ledger);

    // Determine output writer
    let writer: Box<dyn Write> = match output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create output file: {}", path.display()))?;
            Box::new(file)
        }
        None => Box::new(stdout()),
    };

    let count = match format {
        "csv" => exporter.export_accounts_csv(writer).await?,
        "json" => exporter.export_json(writer).await?.accounts.len(),
        _ => bail!("Invalid export format '{}'. Valid formats: csv, json", format),
    };

    if output.is_some() {
        eprintln!("Exported {} accounts", count);
    }
    Ok(())
}

async fn run_import_command(
    ledger: &LedgerService,
    input: Option<&Path>,
    format: &str,
    dry_run: bool,
) -> Result<()> {
    use crate::io::{ImportOptions, Importer};
    use std::fs::File;
    use std::io::{Read, stdin};

    let importer = Importer::new(ledger);

    // Determine input reader
    let reader: Box<dyn Read> = match input {
        Some(path) => {
            let file = File::open(path)
                .with_context(|| format!("Failed to open input file: {}", path.display()))?;
            Box::new(file)
        }
        None => Box::new(stdin()),
    };

    let options = ImportOptions { dry_run };
    let result = match format {
        "csv" => importer.import_accounts_csv(reader, options).await?,
        "json" => importer.import_json(reader, options).await?,
        _ => bail!("Invalid import format '{}'. Valid formats: csv, json", format),
    };

    // Display results
    if dry_run {
        println!("Validation successful");
    } else {
        println!("Import complete");
    }
    println!("  Imported: {}", result.imported);
    println!("  Skipped:  {}", result.skipped);
    println!("  Errors:   {}", result.errors.len());

    if !result.errors.is_empty() {
        println!("\nErrors:");
        for error in result.errors.iter().take(10) {
            println!(
                "  Line {}: {}",
                error.line,
                error
                    .field
                    .as_ref()
                    .map(|f| format!("{}: ", f))
                    .unwrap_or_default()
                    + &error.error
            );
        }
        if result.errors.len() > 10 {
            println!("  ... and {} more errors", result.errors.len() - 10);
        }
    }

    Ok(())
}

async fn run_migrate_command(data_dir: &Path, to: &str, switch: bool) -> Result<()> {
    let mut config = EconomyConfig::load(data_dir)?;
    let target_kind: BackendKind = to.parse()?;
    if target_kind == config.storage.kind {
        bail!("Storage already uses {}", target_kind);
    }

    let source = Backend::open(&config.storage, data_dir).await?;
    let mut target_config = config.storage.clone();
    target_config.kind = target_kind;
    let target = Backend::open(&target_config, data_dir).await?;

    let report = crate::io::migrate(&source, &target).await;
    source.close().await?;
    target.close().await?;
    let report = report?;

    println!(
        "Migrated {} accounts from {} to {} ({} already up to date)",
        report.copied, config.storage.kind, target_kind, report.skipped
    );

    if switch {
        config.storage.kind = target_kind;
        config.save(data_dir)?;
        println!("config.json now uses {}", target_kind);
    }
    Ok(())
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
