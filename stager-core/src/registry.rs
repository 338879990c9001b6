//! Object config registry.
//!
//! # Storage layout
//!
//! ```text
//! <objects_root>/
//!   <kind>/                 (mode 0700)
//!     <uuid>.yaml           (one file per object: mode 0600)
//! ```
//!
//! Saves go through a `.yaml.tmp` sibling and `rename`, so a reader never
//! sees a half-written object.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::config::StagerConfig;
use crate::error::{io_err, CoreError};
use crate::types::{ObjectConfig, ObjectKind};

// ---------------------------------------------------------------------------
// 1. Path helpers
// ---------------------------------------------------------------------------

/// `<objects_root>/<kind>/`
pub fn kind_dir(config: &StagerConfig, kind: ObjectKind) -> PathBuf {
    config.objects_root.join(kind.as_str())
}

/// `<objects_root>/<kind>/<uuid>.yaml`: pure, no I/O.
pub fn object_path(config: &StagerConfig, kind: ObjectKind, uuid: &str) -> PathBuf {
    kind_dir(config, kind).join(format!("{uuid}.yaml"))
}

/// Classify a path under `<objects_root>` as `(kind, uuid)`.
///
/// Returns `Ok(None)` for paths that are not object files (wrong depth,
/// non-YAML, temp files). A kind directory that names no known kind is
/// [`CoreError::UnsupportedKind`].
pub fn parse_object_path(
    config: &StagerConfig,
    path: &Path,
) -> Result<Option<(ObjectKind, String)>, CoreError> {
    let Ok(rel) = path.strip_prefix(&config.objects_root) else {
        return Ok(None);
    };
    let parts: Vec<_> = rel.components().collect();
    if parts.len() != 2 {
        return Ok(None);
    }
    let file = parts[1].as_os_str().to_string_lossy();
    let Some(uuid) = file.strip_suffix(".yaml") else {
        return Ok(None);
    };
    let kind: ObjectKind = parts[0].as_os_str().to_string_lossy().parse()?;
    Ok(Some((kind, uuid.to_string())))
}

// ---------------------------------------------------------------------------
// 2. Load
// ---------------------------------------------------------------------------

/// Load one object config.
///
/// Returns `CoreError::ObjectNotFound` if absent,
/// `CoreError::Parse` (with path + line context) if malformed YAML.
pub fn load_object(
    config: &StagerConfig,
    kind: ObjectKind,
    uuid: &str,
) -> Result<ObjectConfig, CoreError> {
    let path = object_path(config, kind, uuid);
    let contents = match std::fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            return Err(CoreError::ObjectNotFound { path })
        }
        Err(err) => return Err(io_err(&path, err)),
    };
    serde_yaml::from_str(&contents).map_err(|e| CoreError::Parse { path, source: e })
}

/// All objects of one kind, sorted by uuid.
pub fn list_objects(config: &StagerConfig, kind: ObjectKind) -> Result<Vec<ObjectConfig>, CoreError> {
    let dir = kind_dir(config, kind);
    let entries = match std::fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(vec![]),
        Err(err) => return Err(io_err(&dir, err)),
    };

    let mut files: Vec<_> = entries.filter_map(|e| e.ok()).collect();
    files.sort_by_key(|e| e.file_name());

    let mut objects = Vec::new();
    for entry in files {
        let fname = entry.file_name();
        let name = fname.to_string_lossy();
        let Some(uuid) = name.strip_suffix(".yaml") else {
            continue;
        };
        objects.push(load_object(config, kind, uuid)?);
    }
    Ok(objects)
}

/// All objects of every kind, grouped by kind order then uuid.
pub fn list_all_objects(config: &StagerConfig) -> Result<Vec<ObjectConfig>, CoreError> {
    let mut all = Vec::new();
    for kind in ObjectKind::all() {
        all.extend(list_objects(config, *kind)?);
    }
    Ok(all)
}

// ---------------------------------------------------------------------------
// 3. Save (atomic) / remove
// ---------------------------------------------------------------------------

/// Atomically save an object config under its own kind and uuid.
///
/// Write flow: serialize → `.yaml.tmp` sibling → `chmod 0600` → `rename`.
pub fn save_object(config: &StagerConfig, object: &ObjectConfig) -> Result<PathBuf, CoreError> {
    let dir = kind_dir(config, object.kind);
    if !dir.exists() {
        std::fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        set_dir_permissions(&dir)?;
    }
    let path = object_path(config, object.kind, &object.uuid);
    let tmp_path = dir.join(format!("{}.yaml.tmp", object.uuid));

    let yaml = serde_yaml::to_string(object)?;
    std::fs::write(&tmp_path, yaml).map_err(|e| io_err(&tmp_path, e))?;
    set_file_permissions(&tmp_path)?;
    std::fs::rename(&tmp_path, &path).map_err(|e| io_err(&path, e))?;
    Ok(path)
}

/// Delete an object config. Returns `false` if it was not registered.
pub fn remove_object(config: &StagerConfig, kind: ObjectKind, uuid: &str) -> Result<bool, CoreError> {
    let path = object_path(config, kind, uuid);
    match std::fs::remove_file(&path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(err) => Err(io_err(&path, err)),
    }
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), CoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), CoreError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), CoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), CoreError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
