//! Ship Agent - Entry Point
//!
//! Remote executor. Runs on the target machine, invoked by the `ship` client.

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use colored::Colorize;

use ship::app::options::AgentCli;
use ship::app::run::run_agent;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = AgentCli::parse();
    let command = cli.command.name();

    match run_agent(cli).await.with_context(|| format!("ship-agent {} failed", command)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {:#}", "[ERROR]".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}
