use aconomy::cli::Cli;
use aconomy::logging;
use anyhow::Result;
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.json_logs);
    cli.run().await
}
