//! `cell0` binary: parse the CLI surface (spec §6) and dispatch.

use clap::Parser;

#[tokio::main]
async fn main() {
    cell0::telemetry::init();
    let cli = cell0::cli::Cli::parse();
    let code = cell0::cli::run(cli).await;
    std::process::exit(code);
}
