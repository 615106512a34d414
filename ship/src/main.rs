//! Ship - Entry Point
//!
//! Operator-side CLI. Connects to the target over SSH, makes sure the matching
//! `ship-agent` is installed there and drives it.

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use colored::Colorize;

use ship::app::options::ClientCli;
use ship::app::run::run_client;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = ClientCli::parse();
    let command = cli.command.name();

    match run_client(cli).await.with_context(|| format!("ship {} failed", command)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {:#}", "[ERROR]".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}
