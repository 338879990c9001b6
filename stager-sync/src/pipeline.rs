//! Shared reconcile entrypoint used by CLI and daemon.

use serde::Serialize;
use stager_core::{registry, ObjectKind, ObjectStatus, StagerConfig};

use crate::objects::ObjectManager;
use crate::SyncError;

/// Scope for a reconcile run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// Every registered object.
    All,
    /// Every object of one kind.
    Kind(ObjectKind),
    /// A single object.
    Object(ObjectKind, String),
}

/// Outcome of one reconcile run.
#[derive(Debug, Default, Serialize)]
pub struct RunReport {
    /// Statuses published for objects that are still configured.
    pub applied: Vec<ObjectStatus>,
    /// Objects whose config is gone and whose references were released.
    pub removed: Vec<(ObjectKind, String)>,
}

/// Run the reconcile pipeline for a scope.
///
/// This is the canonical entrypoint for both `stager reconcile` and the
/// daemon processor. Published statuses without a config in the registry are
/// torn down.
pub fn run(config: &StagerConfig, scope: Scope) -> Result<RunReport, SyncError> {
    let manager = ObjectManager::new(config.clone());
    let mut report = RunReport::default();

    let kinds: Vec<ObjectKind> = match &scope {
        Scope::All => ObjectKind::all().to_vec(),
        Scope::Kind(kind) | Scope::Object(kind, _) => vec![*kind],
    };

    for kind in kinds {
        let objects = match &scope {
            Scope::Object(_, uuid) => match registry::load_object(config, kind, uuid) {
                Ok(object) => vec![object],
                Err(stager_core::CoreError::ObjectNotFound { .. }) => vec![],
                Err(err) => return Err(err.into()),
            },
            _ => registry::list_objects(config, kind)?,
        };

        for object in &objects {
            report.applied.push(manager.apply_object(object)?);
        }

        let published = manager.channels().object_status(kind).get_all()?;
        for uuid in published.keys() {
            if let Scope::Object(_, only) = &scope {
                if only != uuid {
                    continue;
                }
            }
            if objects.iter().any(|o| &o.uuid == uuid) {
                continue;
            }
            tracing::info!("{kind}/{uuid} no longer configured; removing");
            if manager.remove_object(kind, uuid)? {
                report.removed.push((kind, uuid.clone()));
            }
        }
    }

    Ok(report)
}
