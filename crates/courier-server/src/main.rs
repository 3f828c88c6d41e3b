mod bootstrap_helpers;
mod cli_args;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use courier_gateway::{run_relay_server, RelayServerConfig, RelayServerState};
use courier_provider::ChatApiClient;

use crate::bootstrap_helpers::init_tracing;
use crate::cli_args::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let client = Arc::new(
        ChatApiClient::new(cli.provider_config()).context("failed to build provider client")?,
    );
    info!(api_base = %cli.api_base, "provider client ready");

    let state = Arc::new(RelayServerState::new(
        client.clone(),
        client,
        RelayServerConfig {
            bind: cli.bind.clone(),
            parallel_options: cli.parallel_options(),
            sequential_options: cli.sequential_options(),
        },
    ));
    run_relay_server(state).await
}
