//! relm: mirror installed helm releases into a state directory.
//!
//! # Usage
//!
//! ```text
//! relm export [--dry-run] [--verbose] [--release <name>] [--state-dir <dir>]
//!             [--manifest <file>] [--daemon --interval <secs> [--socket <path>]]
//! relm daemon status|stop|pass|metrics --socket <path>
//! ```
//!
//! Every `export` flag also reads a `RELM_*` environment variable.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{daemon::DaemonCommand, export::ExportArgs};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "relm",
    version,
    about = "Mirror installed helm releases into a state store",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Reconcile the state store against installed releases, once or on an interval.
    Export(ExportArgs),

    /// Talk to a running `relm export --daemon` over its control socket.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Export(args) => args.run(),
        Commands::Daemon { command } => commands::daemon::run(command),
    }
}
