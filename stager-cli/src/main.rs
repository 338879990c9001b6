//! Stager: object lifecycle orchestrator CLI.
//!
//! # Usage
//!
//! ```text
//! stager daemon start|stop|status
//! stager object apply <file>
//! stager object list
//! stager object remove <kind> <uuid>
//! stager reconcile [--kind baseOs|cert] [--uuid <uuid>]
//! stager status [--json]
//! stager safename <url> [--sha256 <digest>]
//! ```

mod commands;

use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    daemon::DaemonCommand, object::ObjectCommand, reconcile::ReconcileArgs,
    safename::SafenameArgs, status::StatusArgs,
};
use stager_core::ObjectKind;

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "stager",
    version,
    about = "Drive base-OS images and certificates through download, verification and install",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Manage the background daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },

    /// Add, list or remove object configs.
    Object {
        #[command(subcommand)]
        command: ObjectCommand,
    },

    /// Reconcile objects against downloader and verifier results now.
    Reconcile(ReconcileArgs),

    /// Show published object status.
    Status(StatusArgs),

    /// Print the safe name and staged file name for a locator.
    Safename(SafenameArgs),
}

// ---------------------------------------------------------------------------
// Shared ObjectKind argument
// ---------------------------------------------------------------------------

/// Thin wrapper so clap can parse `ObjectKind` from CLI args.
#[derive(Debug, Clone, Copy)]
pub struct KindArg(pub ObjectKind);

impl FromStr for KindArg {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        s.parse::<ObjectKind>()
            .map(Self)
            .map_err(|_| format!("unknown object kind '{s}'; expected: baseOs, cert"))
    }
}

impl fmt::Display for KindArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<KindArg> for ObjectKind {
    fn from(k: KindArg) -> Self {
        k.0
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Daemon { command } => commands::daemon::run(command),
        Commands::Object { command } => commands::object::run(command),
        Commands::Reconcile(args) => args.run(),
        Commands::Status(args) => args.run(),
        Commands::Safename(args) => args.run(),
    }
}
