//! `stager status`: published object state.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use stager_core::{config, ObjectKind, ObjectStatus, State};
use stager_sync::ObjectManager;

use crate::KindArg;

/// Arguments for `stager status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Only objects of this kind.
    #[arg(long)]
    pub kind: Option<KindArg>,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let home = dirs::home_dir().context("could not determine home directory")?;
        let config = config::load_at(&home).context("failed to load stager config")?;

        let manager = ObjectManager::new(config);
        let mut statuses = manager
            .all_statuses()
            .context("failed to read published object status")?;
        if let Some(kind) = self.kind {
            let kind: ObjectKind = kind.into();
            statuses.retain(|status| status.kind == kind);
        }

        if self.json {
            print_json(&statuses)?;
            return Ok(());
        }
        print_table(&statuses);
        Ok(())
    }
}

#[derive(Serialize)]
struct StatusReportJson<'a> {
    summary: StatusSummaryJson,
    objects: Vec<ObjectStatusJson<'a>>,
}

#[derive(Serialize)]
struct StatusSummaryJson {
    objects: usize,
    installed: usize,
    failed: usize,
}

#[derive(Serialize)]
struct ObjectStatusJson<'a> {
    kind: ObjectKind,
    uuid: &'a str,
    name: &'a str,
    state: String,
    installed: usize,
    artifacts: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
    updated_at: String,
}

#[derive(Tabled)]
struct StatusTableRow {
    #[tabled(rename = "kind")]
    kind: String,
    #[tabled(rename = "uuid")]
    uuid: String,
    #[tabled(rename = "name")]
    name: String,
    #[tabled(rename = "state")]
    state: String,
    #[tabled(rename = "installed")]
    installed: String,
    #[tabled(rename = "error")]
    error: String,
}

fn installed_count(status: &ObjectStatus) -> usize {
    status
        .storage
        .iter()
        .filter(|item| item.state == State::Installed)
        .count()
}

fn is_failed(status: &ObjectStatus) -> bool {
    status.state == State::Initial && status.error.is_some()
}

fn print_json(statuses: &[ObjectStatus]) -> Result<()> {
    let payload = StatusReportJson {
        summary: StatusSummaryJson {
            objects: statuses.len(),
            installed: statuses
                .iter()
                .filter(|s| s.state == State::Installed)
                .count(),
            failed: statuses.iter().filter(|s| is_failed(s)).count(),
        },
        objects: statuses
            .iter()
            .map(|status| ObjectStatusJson {
                kind: status.kind,
                uuid: &status.uuid,
                name: &status.name,
                state: status.state.to_string(),
                installed: installed_count(status),
                artifacts: status.storage.len(),
                error: status.error.as_deref(),
                updated_at: status.updated_at.to_rfc3339(),
            })
            .collect(),
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&payload).context("failed to serialize status JSON")?
    );
    Ok(())
}

fn print_table(statuses: &[ObjectStatus]) {
    println!(
        "Stager v{} | {} objects | {} installed",
        env!("CARGO_PKG_VERSION"),
        statuses.len(),
        statuses
            .iter()
            .filter(|s| s.state == State::Installed)
            .count(),
    );

    if statuses.is_empty() {
        println!("No object status published.");
        return;
    }

    let rows: Vec<StatusTableRow> = statuses
        .iter()
        .map(|status| StatusTableRow {
            kind: status.kind.to_string(),
            uuid: status.uuid.clone(),
            name: status.name.clone(),
            state: state_label(status),
            installed: format!("{}/{}", installed_count(status), status.storage.len()),
            error: status
                .error
                .as_deref()
                .map(first_line)
                .unwrap_or_default()
                .to_string(),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");

    if statuses.iter().any(is_failed) {
        println!("Run 'stager reconcile' to retry failed objects.");
    }
}

fn state_label(status: &ObjectStatus) -> String {
    let label = status.state.to_string();
    match status.state {
        State::Installed => label.green().bold().to_string(),
        State::Initial if status.error.is_some() => label.red().bold().to_string(),
        State::Initial => label.bright_black().to_string(),
        _ => label.yellow().to_string(),
    }
}

fn first_line(error: &str) -> &str {
    error.lines().find(|l| !l.is_empty()).unwrap_or(error)
}
