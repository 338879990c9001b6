//! `stager reconcile`: run a reconcile pass now.
//!
//! A running daemon owns the store, so the request goes over its socket;
//! otherwise the pass runs in this process.

use std::path::Path;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;

use stager_core::config;
use stager_daemon::{request_reconcile, DaemonError, JobSummary, ObjectSummary};
use stager_sync::pipeline::{self, Scope};

use crate::KindArg;

/// Arguments for `stager reconcile`.
#[derive(Args, Debug)]
pub struct ReconcileArgs {
    /// Only objects of this kind: baseOs | cert.
    #[arg(long)]
    pub kind: Option<KindArg>,

    /// Only this object (requires --kind).
    #[arg(long, requires = "kind")]
    pub uuid: Option<String>,
}

impl ReconcileArgs {
    pub fn run(self) -> Result<()> {
        let home = dirs::home_dir().context("could not determine home directory")?;
        let scope = match (self.kind, self.uuid) {
            (None, None) => Scope::All,
            (Some(kind), None) => Scope::Kind(kind.into()),
            (Some(kind), Some(uuid)) => Scope::Object(kind.into(), uuid),
            (None, Some(_)) => bail!("--uuid requires --kind"),
        };

        let summary = reconcile_scope(&home, scope)?;
        print_summary(&summary);
        Ok(())
    }
}

/// Reconcile `scope` through the daemon if one is running, else locally.
pub fn reconcile_scope(home: &Path, scope: Scope) -> Result<JobSummary> {
    let (kind, uuid) = match &scope {
        Scope::All => (None, None),
        Scope::Kind(kind) => (Some(kind.to_string()), None),
        Scope::Object(kind, uuid) => (Some(kind.to_string()), Some(uuid.clone())),
    };

    match request_reconcile(home, kind, uuid) {
        Ok(value) => {
            serde_json::from_value(value).context("daemon returned a malformed reconcile summary")
        }
        Err(DaemonError::DaemonNotRunning { .. }) => reconcile_locally(home, scope),
        Err(err) => Err(err).context("daemon reconcile failed"),
    }
}

fn reconcile_locally(home: &Path, scope: Scope) -> Result<JobSummary> {
    let config = config::load_at(home).context("failed to load stager config")?;
    let started = Instant::now();
    let trigger = format!("{scope:?}");
    let report = pipeline::run(&config, scope).context("reconcile failed")?;

    Ok(JobSummary {
        trigger,
        source: "cli".to_string(),
        applied: report.applied.iter().map(ObjectSummary::from).collect(),
        removed: report
            .removed
            .iter()
            .map(|(kind, uuid)| format!("{kind}/{uuid}"))
            .collect(),
        duration_ms: started.elapsed().as_millis() as u64,
    })
}

pub fn print_summary(summary: &JobSummary) {
    if summary.applied.is_empty() && summary.removed.is_empty() {
        println!("✓ nothing to reconcile");
        return;
    }
    for object in &summary.applied {
        let state = match object.state.as_str() {
            "INSTALLED" => object.state.green().to_string(),
            "INITIAL" if object.error.is_some() => object.state.red().to_string(),
            _ => object.state.yellow().to_string(),
        };
        println!("✓ {}/{} {state}", object.kind, object.uuid);
        if let Some(error) = &object.error {
            for line in error.lines().filter(|l| !l.is_empty()) {
                println!("    {}", line.red());
            }
        }
    }
    for removed in &summary.removed {
        println!("✓ {removed} removed");
    }
}
