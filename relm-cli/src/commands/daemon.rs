//! `relm daemon`: control a running export daemon over its Unix socket.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use relm_daemon::{request_metrics, request_pass, request_status, request_stop, DaemonError};

#[derive(Subcommand, Debug)]
pub enum DaemonCommand {
    /// Query runtime status, last pass and counters.
    Status(SocketArgs),
    /// Request graceful daemon shutdown.
    Stop(SocketArgs),
    /// Run a reconciliation pass now and print its summary.
    Pass(SocketArgs),
    /// Print counters in Prometheus text format.
    Metrics(SocketArgs),
}

#[derive(Args, Debug)]
pub struct SocketArgs {
    /// Control socket the daemon was started with.
    #[arg(long, env = "RELM_SOCKET")]
    pub socket: PathBuf,
}

pub fn run(command: DaemonCommand) -> Result<()> {
    match command {
        DaemonCommand::Status(args) => match request_status(&args.socket) {
            Ok(status) => print_json(&status)?,
            Err(DaemonError::DaemonNotRunning { .. }) => {
                print_json(&not_running(&args.socket))?;
            }
            Err(err) => return Err(err).context("failed to query daemon status"),
        },
        DaemonCommand::Stop(args) => match request_stop(&args.socket) {
            Ok(()) => println!("daemon stop requested"),
            Err(DaemonError::DaemonNotRunning { .. }) => {
                println!("daemon is not running");
            }
            Err(err) => return Err(err).context("failed to stop daemon"),
        },
        DaemonCommand::Pass(args) => {
            let summary = request_pass(&args.socket).context("on-demand pass failed")?;
            print_json(&summary)?;
        }
        DaemonCommand::Metrics(args) => {
            let text = request_metrics(&args.socket).context("failed to read daemon metrics")?;
            print!("{text}");
        }
    }

    Ok(())
}

fn not_running(socket: &Path) -> serde_json::Value {
    serde_json::json!({
        "running": false,
        "socket": socket.display().to_string(),
    })
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("failed to render daemon response JSON")?
    );
    Ok(())
}
