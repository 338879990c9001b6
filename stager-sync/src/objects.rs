//! Object-level lifecycle: the glue between the registry, the reconciler and
//! the installer.
//!
//! The published [`ObjectStatus`] is the only place storage items (and with
//! them the `has_*_ref` flags) persist between passes.

use chrono::Utc;

use stager_core::{
    registry, Channels, DownloaderStatus, ObjectConfig, ObjectKind, ObjectStatus, SafeName,
    State, StagerConfig, StorageConfig, StorageItem, VerifyImageStatus,
};

use crate::error::{InvariantViolation, SyncError};
use crate::install::install_downloaded_objects;
use crate::policy::policy_for;
use crate::reconcile::check_storage_download_status;
use crate::requests;

/// Drives objects of every kind through reconcile and install.
#[derive(Debug, Clone)]
pub struct ObjectManager {
    config: StagerConfig,
    channels: Channels,
}

impl ObjectManager {
    pub fn new(config: StagerConfig) -> Self {
        let channels = config.channels();
        Self { config, channels }
    }

    pub fn config(&self) -> &StagerConfig {
        &self.config
    }

    pub fn channels(&self) -> &Channels {
        &self.channels
    }

    /// Currently published status of one object.
    pub fn status(&self, kind: ObjectKind, uuid: &str) -> Result<Option<ObjectStatus>, SyncError> {
        Ok(self.channels.object_status(kind).get(uuid)?)
    }

    /// Every published object status, by kind then uuid.
    pub fn all_statuses(&self) -> Result<Vec<ObjectStatus>, SyncError> {
        let mut all = Vec::new();
        for kind in ObjectKind::all() {
            all.extend(self.channels.object_status(*kind).get_all()?.into_values());
        }
        Ok(all)
    }

    // -----------------------------------------------------------------------
    // apply / remove
    // -----------------------------------------------------------------------

    /// Bring one object's status in line with its config and the subsystems.
    pub fn apply_object(&self, object: &ObjectConfig) -> Result<ObjectStatus, SyncError> {
        let kind = object.kind;
        let uuid = object.uuid.as_str();
        tracing::info!("apply_object({kind}/{uuid}) {} artifact(s)", object.storage.len());

        let mut status = match self.status(kind, uuid)? {
            Some(existing) => existing,
            None => ObjectStatus::new(object),
        };
        status.name = object.name.clone();
        status.storage = self.align_items(kind, &object.storage, std::mem::take(&mut status.storage))?;

        let ret = check_storage_download_status(
            &self.channels,
            &self.config.cert_dir,
            kind,
            uuid,
            &object.storage,
            &mut status.storage,
        )?;
        if ret.waiting_for_certs {
            tracing::info!("apply_object({kind}/{uuid}) waiting for certificates");
        }

        let ready = !status.storage.is_empty()
            && status.storage.iter().all(StorageItem::is_content_ready);
        if ready {
            install_downloaded_objects(&self.config, kind, uuid, &mut status.storage)?;
            status.state = status
                .storage
                .iter()
                .map(|item| item.state)
                .min()
                .unwrap_or(State::Installed);
            let errors = install_errors(&status.storage);
            status.error = (!errors.is_empty()).then_some(errors);
            status.error_time = status.storage.iter().filter_map(|i| i.error_time).max();
        } else {
            status.state = ret.min_state;
            status.error = (!ret.all_errors.is_empty()).then_some(ret.all_errors);
            status.error_time = ret.error_time;
        }
        status.updated_at = Utc::now();

        self.channels.object_status(kind).publish(&status)?;
        tracing::info!("apply_object({kind}/{uuid}) state {}", status.state);
        Ok(status)
    }

    /// Release everything object `uuid` holds and drop its status.
    ///
    /// Returns `false` if no status was published.
    pub fn remove_object(&self, kind: ObjectKind, uuid: &str) -> Result<bool, SyncError> {
        let Some(status) = self.status(kind, uuid)? else {
            tracing::debug!("remove_object({kind}/{uuid}) no status");
            return Ok(false);
        };
        for item in &status.storage {
            release_item(&self.channels, kind, item)?;
        }
        self.channels.object_status(kind).unpublish(uuid)?;
        tracing::info!("remove_object({kind}/{uuid}) done");
        Ok(true)
    }

    /// Pair each config with its existing item; release items no longer named.
    fn align_items(
        &self,
        kind: ObjectKind,
        configs: &[StorageConfig],
        mut old: Vec<StorageItem>,
    ) -> Result<Vec<StorageItem>, SyncError> {
        let default_dir = policy_for(kind).final_dir(&self.config);
        let mut aligned = Vec::with_capacity(configs.len());
        for sc in configs {
            let item = match old.iter().position(|item| item.matches(sc)) {
                Some(pos) => old.remove(pos),
                None => {
                    let dir = sc.final_obj_dir.clone().unwrap_or_else(|| default_dir.clone());
                    StorageItem::new(sc, Some(dir))
                }
            };
            aligned.push(item);
        }
        for dropped in &old {
            tracing::info!("{kind}: artifact {} no longer configured", dropped.download_url);
            release_item(&self.channels, kind, dropped)?;
        }
        Ok(aligned)
    }

    // -----------------------------------------------------------------------
    // Subsystem status updates
    // -----------------------------------------------------------------------

    /// React to a new download result. Returns the objects re-applied.
    pub fn update_downloader_status(
        &self,
        status: &DownloaderStatus,
    ) -> Result<Vec<ObjectStatus>, SyncError> {
        if status.is_pending() {
            tracing::debug!("update_downloader_status({}) pending; ignored", status.safename);
            return Ok(vec![]);
        }
        let kind = parse_kind(&status.obj_type)?;
        self.handle_status_update_safename(kind, &status.safename, None)
    }

    /// React to a new verification result. Objects are matched by safe name
    /// or, since verified content is shared, by digest.
    pub fn update_verifier_status(
        &self,
        status: &VerifyImageStatus,
    ) -> Result<Vec<ObjectStatus>, SyncError> {
        if status.is_pending() {
            tracing::debug!("update_verifier_status({}) pending; ignored", status.safename);
            return Ok(vec![]);
        }
        let kind = parse_kind(&status.obj_type)?;
        self.handle_status_update_safename(kind, &status.safename, status.image_sha256.as_deref())
    }

    /// Re-apply every registered object of `kind` that uses `safename`.
    pub fn handle_status_update_safename(
        &self,
        kind: ObjectKind,
        safename: &SafeName,
        image_sha256: Option<&str>,
    ) -> Result<Vec<ObjectStatus>, SyncError> {
        let mut applied = Vec::new();
        for object in registry::list_objects(&self.config, kind)? {
            let uses = object.storage.iter().any(|sc| {
                sc.safename() == *safename
                    || image_sha256.is_some_and(|sha| sc.digest() == Some(sha))
            });
            if uses {
                applied.push(self.apply_object(&object)?);
            }
        }
        if applied.is_empty() {
            tracing::debug!("status update for {kind}/{safename} matched no object");
        }
        Ok(applied)
    }
}

fn parse_kind(obj_type: &str) -> Result<ObjectKind, InvariantViolation> {
    obj_type
        .parse()
        .map_err(|_| InvariantViolation::UnsupportedKind(obj_type.to_string()))
}

/// Give back whatever references `item` holds.
fn release_item(channels: &Channels, kind: ObjectKind, item: &StorageItem) -> Result<(), SyncError> {
    let digest = item.image_sha256.as_deref().filter(|s| !s.is_empty());
    let safename = stager_core::naming::safename(&item.download_url, digest);
    if item.has_downloader_ref {
        requests::remove_downloader_config(channels, kind, &safename)?;
    }
    if item.has_verifier_ref {
        let key = item.verifier_safename.as_ref().unwrap_or(&safename);
        requests::remove_verifier_config(channels, kind, key)?;
    }
    Ok(())
}

fn install_errors(items: &[StorageItem]) -> String {
    items
        .iter()
        .filter_map(|item| {
            item.error
                .as_ref()
                .map(|err| format!("{}: {err}\n\n", item.download_url))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manager(tmp: &TempDir) -> ObjectManager {
        ObjectManager::new(StagerConfig::rooted_at(tmp.path()))
    }

    fn cert(uuid: &str, urls: &[&str]) -> ObjectConfig {
        ObjectConfig {
            uuid: uuid.to_string(),
            kind: ObjectKind::Cert,
            name: "bundle".to_string(),
            storage: urls.iter().map(|u| StorageConfig::new(*u, None)).collect(),
        }
    }

    #[test]
    fn dropped_artifact_releases_its_request() {
        let tmp = TempDir::new().unwrap();
        let mgr = manager(&tmp);
        let object = cert("c-1", &["https://h/a.pem", "https://h/b.pem"]);
        mgr.apply_object(&object).unwrap();

        let b = StorageConfig::new("https://h/b.pem", None).safename();
        assert!(requests::lookup_downloader_config(mgr.channels(), ObjectKind::Cert, &b)
            .unwrap()
            .is_some());

        let trimmed = cert("c-1", &["https://h/a.pem"]);
        let status = mgr.apply_object(&trimmed).unwrap();
        assert_eq!(status.storage.len(), 1);
        assert!(requests::lookup_downloader_config(mgr.channels(), ObjectKind::Cert, &b)
            .unwrap()
            .is_none());
    }

    #[test]
    fn unknown_obj_type_is_fatal() {
        let tmp = TempDir::new().unwrap();
        let status = DownloaderStatus {
            safename: SafeName::from("x.img.ab"),
            obj_type: "appImg".to_string(),
            image_sha256: None,
            state: State::Downloaded,
            last_err: String::new(),
            last_err_time: None,
            pending_add: false,
            pending_modify: false,
            pending_delete: false,
        };
        let err = manager(&tmp).update_downloader_status(&status).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn remove_object_unpublishes_everything() {
        let tmp = TempDir::new().unwrap();
        let mgr = manager(&tmp);
        mgr.apply_object(&cert("c-1", &["https://h/a.pem"])).unwrap();
        assert!(mgr.remove_object(ObjectKind::Cert, "c-1").unwrap());

        let a = StorageConfig::new("https://h/a.pem", None).safename();
        assert!(requests::lookup_downloader_config(mgr.channels(), ObjectKind::Cert, &a)
            .unwrap()
            .is_none());
        assert!(mgr.status(ObjectKind::Cert, "c-1").unwrap().is_none());
        assert!(!mgr.remove_object(ObjectKind::Cert, "c-1").unwrap());
    }
}
