// graceful - daemon entry point

use anyhow::Result;
use clap::Parser;
use graceful::cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    cli::commands::execute(cli.command).await
}
