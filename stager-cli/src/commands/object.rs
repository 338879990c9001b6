//! `stager object apply|list|remove`

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Subcommand;
use tabled::{settings::Style, Table, Tabled};

use stager_core::{config, registry, ObjectConfig};
use stager_sync::{pipeline::Scope, ObjectManager};

use super::reconcile::{print_summary, reconcile_scope};
use crate::KindArg;

/// Manage object configs in the registry.
#[derive(Subcommand, Debug)]
pub enum ObjectCommand {
    /// Register (or replace) an object config from a YAML file and reconcile it.
    Apply {
        /// Path to the object YAML.
        file: PathBuf,
    },

    /// List registered objects with their published state.
    List,

    /// Remove an object config and release everything it holds.
    Remove {
        /// Object kind: baseOs | cert.
        kind: KindArg,
        /// Object uuid.
        uuid: String,
    },
}

#[derive(Tabled)]
struct ObjectRow {
    #[tabled(rename = "kind")]
    kind: String,
    #[tabled(rename = "uuid")]
    uuid: String,
    #[tabled(rename = "name")]
    name: String,
    #[tabled(rename = "artifacts")]
    artifacts: usize,
    #[tabled(rename = "state")]
    state: String,
}

pub fn run(command: ObjectCommand) -> Result<()> {
    match command {
        ObjectCommand::Apply { file } => apply(file),
        ObjectCommand::List => list(),
        ObjectCommand::Remove { kind, uuid } => remove(kind, uuid),
    }
}

fn apply(file: PathBuf) -> Result<()> {
    let home = dirs::home_dir().context("could not determine home directory")?;
    let config = config::load_at(&home).context("failed to load stager config")?;

    let contents = std::fs::read_to_string(&file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let object: ObjectConfig = serde_yaml::from_str(&contents)
        .with_context(|| format!("failed to parse object config {}", file.display()))?;
    anyhow::ensure!(!object.uuid.trim().is_empty(), "object uuid must not be empty");

    let path = registry::save_object(&config, &object).context("failed to save object config")?;
    println!("registered {}/{} at {}", object.kind, object.uuid, path.display());

    let summary = reconcile_scope(&home, Scope::Object(object.kind, object.uuid))?;
    print_summary(&summary);
    Ok(())
}

fn list() -> Result<()> {
    let home = dirs::home_dir().context("could not determine home directory")?;
    let config = config::load_at(&home).context("failed to load stager config")?;

    let objects = registry::list_all_objects(&config).context("failed to read object registry")?;
    if objects.is_empty() {
        println!("No objects registered.");
        println!("Run: stager object apply <file>");
        return Ok(());
    }

    let manager = ObjectManager::new(config);
    let mut rows = Vec::with_capacity(objects.len());
    for object in objects {
        let state = manager
            .status(object.kind, &object.uuid)
            .with_context(|| format!("failed to read status of {}/{}", object.kind, object.uuid))?
            .map(|status| status.state.to_string())
            .unwrap_or_else(|| "-".to_string());
        rows.push(ObjectRow {
            kind: object.kind.to_string(),
            uuid: object.uuid,
            name: object.name,
            artifacts: object.storage.len(),
            state,
        });
    }

    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
    Ok(())
}

fn remove(kind: KindArg, uuid: String) -> Result<()> {
    let home = dirs::home_dir().context("could not determine home directory")?;
    let config = config::load_at(&home).context("failed to load stager config")?;

    let removed = registry::remove_object(&config, kind.into(), &uuid)
        .context("failed to remove object config")?;
    if !removed {
        println!("{kind}/{uuid} is not registered");
    }

    let summary = reconcile_scope(&home, Scope::Object(kind.into(), uuid))?;
    print_summary(&summary);
    Ok(())
}
