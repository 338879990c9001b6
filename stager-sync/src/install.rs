//! Final placement of staged artifacts.
//!
//! | item state                    | source                                          |
//! |-------------------------------|-------------------------------------------------|
//! | `Installed`                   | nothing to do                                   |
//! | `Downloaded`, digest declared | nothing to do; waits for verification           |
//! | `Downloaded`, no digest       | `<staging>/<kind>/pending/<safename>`           |
//! | `Delivered`                   | `<staging>/<kind>/verified/<sha256>/<filename>` |
//!
//! A `Delivered` item's `<filename>` comes from the safe name its verify
//! reference is held on, which differs from its own after a digest match.
//!
//! A staged file that should exist but does not means the downloader or
//! verifier lied about its state: that is an [`InvariantViolation`].

use std::path::{Path, PathBuf};

use chrono::Utc;

use stager_core::{naming, ObjectKind, SafeName, State, StagerConfig, StorageItem};

use crate::error::{InstallError, InvariantViolation};
use crate::policy::{policy_for, ObjectPolicy};
use crate::staging;

/// Install every content-ready item of object `uuid` with its kind's policy.
///
/// Returns `true` only if every item ends up `Installed`.
pub fn install_downloaded_objects(
    config: &StagerConfig,
    kind: ObjectKind,
    uuid: &str,
    items: &mut [StorageItem],
) -> Result<bool, InvariantViolation> {
    install_downloaded_objects_with(policy_for(kind), &config.staging_root, kind, uuid, items)
}

/// [`install_downloaded_objects`] with an explicit policy.
pub fn install_downloaded_objects_with(
    policy: &dyn ObjectPolicy,
    staging_root: &Path,
    kind: ObjectKind,
    uuid: &str,
    items: &mut [StorageItem],
) -> Result<bool, InvariantViolation> {
    let mut all_installed = true;

    for item in items.iter_mut() {
        let safename = naming::safename(&item.download_url, digest(item));
        let Some(source) = staged_source(staging_root, kind, item, &safename) else {
            if item.state != State::Installed {
                all_installed = false;
            }
            continue;
        };

        if !source.exists() {
            return Err(InvariantViolation::MissingStagedArtifact {
                safename,
                path: source,
            });
        }

        match install_item(policy, &source, item, &safename) {
            Ok(()) => {
                tracing::info!("{kind}/{uuid}: {safename} installed");
                item.state = State::Installed;
                item.clear_error();
            }
            Err(err) => {
                tracing::warn!("{kind}/{uuid}: install of {safename} failed: {err}");
                item.state = State::Initial;
                item.set_error(err.to_string(), Utc::now());
                all_installed = false;
            }
        }
    }

    Ok(all_installed)
}

fn digest(item: &StorageItem) -> Option<&str> {
    item.image_sha256.as_deref().filter(|s| !s.is_empty())
}

/// Where the bytes for `item` are staged, or `None` when there is nothing to
/// install for it this pass.
fn staged_source(
    staging_root: &Path,
    kind: ObjectKind,
    item: &StorageItem,
    safename: &SafeName,
) -> Option<PathBuf> {
    match (item.state, digest(item)) {
        (State::Downloaded, None) => Some(staging::pending_path(staging_root, kind, safename)),
        (State::Delivered, Some(sha)) => {
            let verified_as = item.verifier_safename.as_ref().unwrap_or(safename);
            match staging::verified_path(staging_root, kind, sha, verified_as) {
                Ok(path) => Some(path),
                Err(err) => {
                    tracing::warn!("no verified path for {safename}: {err}");
                    None
                }
            }
        }
        _ => None,
    }
}

fn install_item(
    policy: &dyn ObjectPolicy,
    source: &Path,
    item: &StorageItem,
    safename: &SafeName,
) -> Result<(), InstallError> {
    let final_dir = item
        .final_obj_dir
        .as_deref()
        .ok_or_else(|| InstallError::FinalDirNotSet(safename.clone()))?;
    policy.install(source, final_dir, safename)
}

#[cfg(test)]
mod tests {
    use super::*;
    use stager_core::StorageConfig;
    use tempfile::TempDir;

    #[test]
    fn downloaded_with_digest_waits_for_verification() {
        let tmp = TempDir::new().unwrap();
        let sc = StorageConfig::new("https://h/os/rootfs.img", Some("ab12"));
        let mut items = vec![StorageItem::new(&sc, Some(tmp.path().join("images")))];
        items[0].state = State::Downloaded;

        let done = install_downloaded_objects_with(
            policy_for(ObjectKind::BaseOs),
            tmp.path(),
            ObjectKind::BaseOs,
            "u",
            &mut items,
        )
        .unwrap();
        assert!(!done);
        assert_eq!(items[0].state, State::Downloaded);
    }

    #[test]
    fn missing_final_dir_is_recorded() {
        let tmp = TempDir::new().unwrap();
        let sc = StorageConfig::new("https://h/certs/root.pem", None);
        let pending = staging::pending_path(tmp.path(), ObjectKind::Cert, &sc.safename());
        std::fs::create_dir_all(pending.parent().unwrap()).unwrap();
        std::fs::write(&pending, "pem").unwrap();

        let mut items = vec![StorageItem::new(&sc, None)];
        items[0].state = State::Downloaded;
        let done = install_downloaded_objects_with(
            policy_for(ObjectKind::Cert),
            tmp.path(),
            ObjectKind::Cert,
            "u",
            &mut items,
        )
        .unwrap();
        assert!(!done);
        assert_eq!(items[0].state, State::Initial);
        assert!(items[0].error.as_deref().unwrap().contains("final install directory"));
        assert!(items[0].error_time.is_some());
    }
}
