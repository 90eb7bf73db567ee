//! netup command - single-interface network bring-up.

mod commands;

use std::io::IsTerminal;

use clap::{Parser, Subcommand};
use commands::OutputOptions;

#[derive(Parser)]
#[command(name = "netup", version, about = "Single-interface network bring-up")]
struct Cli {
    /// Output events and statistics as JSON.
    #[arg(short = 'j', long, global = true)]
    json: bool,

    /// Pretty print JSON.
    #[arg(short = 'p', long, global = true)]
    pretty: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Bring up a TAP device with DHCP and IPv6 link-local.
    Run(commands::run::RunCmd),

    /// Run the interface lifecycle against a simulated network.
    Sim(commands::sim::SimCmd),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so JSON output stays clean.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .init();

    let cli = Cli::parse();

    let opts = OutputOptions {
        json: cli.json,
        pretty: cli.pretty,
    };

    let result = match cli.command {
        Command::Run(cmd) => cmd.run(opts).await,
        Command::Sim(cmd) => cmd.run(opts).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}
