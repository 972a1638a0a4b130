mod bootstrap_helpers;
mod cli_args;
mod relay_server;

use anyhow::Result;
use clap::Parser;

use crate::bootstrap_helpers::init_tracing;
use crate::cli_args::Cli;
use crate::relay_server::run_relay_server;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_filter);
    run_relay_server(cli).await
}
