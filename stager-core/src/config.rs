//! Agent configuration.
//!
//! Read from `<home>/.stager/config.yaml`. Every field is optional; missing
//! fields default to a directory under `<home>/.stager/`, and relative paths
//! are resolved against that root.
//!
//! ```yaml
//! staging_root: /var/tmp/stager/downloads
//! cert_dir: certs            # → <home>/.stager/certs
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{io_err, CoreError};
use crate::pubsub::Channels;
use crate::types::ObjectKind;

pub const CONFIG_FILE: &str = "config.yaml";

/// Resolved, absolute agent configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StagerConfig {
    /// `<home>/.stager`
    pub root: PathBuf,
    /// Downloader/verifier staging area: `<staging_root>/<kind>/{pending,verified}`.
    pub staging_root: PathBuf,
    /// Root of the pub/sub record store.
    pub pubsub_root: PathBuf,
    /// Object config registry: `<objects_root>/<kind>/<uuid>.yaml`.
    pub objects_root: PathBuf,
    /// Installed certificates; also where verification looks for trust material.
    pub cert_dir: PathBuf,
    /// Default install directory for base-OS images.
    pub image_dir: PathBuf,
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    staging_root: Option<PathBuf>,
    pubsub_root: Option<PathBuf>,
    objects_root: Option<PathBuf>,
    cert_dir: Option<PathBuf>,
    image_dir: Option<PathBuf>,
}

impl StagerConfig {
    /// Defaults rooted at `root` (no I/O).
    pub fn rooted_at(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            staging_root: root.join("downloads"),
            pubsub_root: root.join("run"),
            objects_root: root.join("objects"),
            cert_dir: root.join("certs"),
            image_dir: root.join("images"),
        }
    }

    /// Pub/sub capability handle for this configuration.
    pub fn channels(&self) -> Channels {
        Channels::new(&self.pubsub_root)
    }

    /// Default install directory for an object kind.
    pub fn final_dir(&self, kind: ObjectKind) -> PathBuf {
        match kind {
            ObjectKind::BaseOs => self.image_dir.clone(),
            ObjectKind::Cert => self.cert_dir.clone(),
        }
    }

    fn apply(mut self, file: ConfigFile) -> Self {
        let root = self.root.clone();
        let resolve = |p: PathBuf| if p.is_absolute() { p } else { root.join(p) };
        if let Some(p) = file.staging_root {
            self.staging_root = resolve(p);
        }
        if let Some(p) = file.pubsub_root {
            self.pubsub_root = resolve(p);
        }
        if let Some(p) = file.objects_root {
            self.objects_root = resolve(p);
        }
        if let Some(p) = file.cert_dir {
            self.cert_dir = resolve(p);
        }
        if let Some(p) = file.image_dir {
            self.image_dir = resolve(p);
        }
        self
    }
}

/// `<home>/.stager`
pub fn root_at(home: &Path) -> PathBuf {
    home.join(".stager")
}

/// `<home>/.stager/config.yaml`
pub fn config_path_at(home: &Path) -> PathBuf {
    root_at(home).join(CONFIG_FILE)
}

/// Load configuration for `home`. A missing file yields the defaults.
pub fn load_at(home: &Path) -> Result<StagerConfig, CoreError> {
    let defaults = StagerConfig::rooted_at(&root_at(home));
    let path = config_path_at(home);
    if !path.exists() {
        return Ok(defaults);
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    if contents.trim().is_empty() {
        return Ok(defaults);
    }
    let file: ConfigFile =
        serde_yaml::from_str(&contents).map_err(|e| CoreError::Parse { path, source: e })?;
    Ok(defaults.apply(file))
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<StagerConfig, CoreError> {
    load_at(&home()?)
}

fn home() -> Result<PathBuf, CoreError> {
    dirs::home_dir().ok_or(CoreError::HomeNotFound)
}
