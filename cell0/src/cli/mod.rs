//! CLI surface (spec §6): `start|stop|status|health|checkpoint
//! <create|restore>|config <init|validate|show>`, with the exact exit codes
//! the spec assigns.
//!
//! Grounded on the teacher's `ccos-gateway` binary's process-lifecycle
//! handling (PID file under the state dir, `clap` derive macros for
//! subcommands).

pub mod commands;

use clap::{Parser, Subcommand};

pub const EXIT_OK: i32 = 0;
pub const EXIT_MISUSE: i32 = 1;
pub const EXIT_CONFIG_INVALID: i32 = 2;
pub const EXIT_NOT_RUNNING: i32 = 3;
pub const EXIT_ALREADY_RUNNING: i32 = 4;
pub const EXIT_HEALTH_FAIL: i32 = 5;

#[derive(Parser)]
#[command(name = "cell0", about = "Cell 0 OS control plane")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the gateway, channel adapters, and the meta-agent loop.
    Start,
    /// Stop a running instance (signals the PID in the PID file).
    Stop,
    /// Report whether an instance is running and its bound port.
    Status,
    /// Hit the local `/api/system/health` endpoint.
    Health,
    /// Checkpoint subcommands.
    Checkpoint {
        #[command(subcommand)]
        action: commands::checkpoint::CheckpointAction,
    },
    /// Config subcommands.
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
}

/// Dispatch a parsed `Cli` to its handler, returning the process exit code.
pub async fn run(cli: Cli) -> i32 {
    match cli.command {
        Command::Start => commands::lifecycle::start().await,
        Command::Stop => commands::lifecycle::stop().await,
        Command::Status => commands::lifecycle::status().await,
        Command::Health => commands::lifecycle::health().await,
        Command::Checkpoint { action } => commands::checkpoint::run(action).await,
        Command::Config { action } => commands::config::run(action),
    }
}
