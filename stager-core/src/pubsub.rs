//! File-backed publish/subscribe record store.
//!
//! # Storage layout
//!
//! ```text
//! <pubsub_root>/
//!   <agent>/                 publisher ("stager", "downloader", "verifier")
//!     <kind>/                object kind scope ("baseOs", "cert")
//!       <TopicName>/
//!         <key>.json         one record per key: written via .tmp + rename
//! ```
//!
//! A publisher owns its topics; every other party only reads. Writes become
//! visible to readers on their own schedule (whenever they next look or their
//! watcher fires), never synchronously.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{io_err, CoreError};
use crate::records::{DownloaderConfig, DownloaderStatus, VerifyImageConfig, VerifyImageStatus};
use crate::types::{ObjectKind, ObjectStatus};

/// Publisher name for records written by the orchestrator.
pub const ORCHESTRATOR_AGENT: &str = "stager";
/// Publisher name for download results.
pub const DOWNLOADER_AGENT: &str = "downloader";
/// Publisher name for verification results.
pub const VERIFIER_AGENT: &str = "verifier";

/// A keyed record that can live on a [`Topic`].
pub trait Record: Serialize + DeserializeOwned {
    /// The record's own idea of its key. Readers compare it with the key they
    /// looked up.
    fn key(&self) -> String;
}

impl Record for ObjectStatus {
    fn key(&self) -> String {
        self.uuid.clone()
    }
}

/// One directory of records of type `T`.
#[derive(Debug, Clone)]
pub struct Topic<T> {
    dir: PathBuf,
    _record: PhantomData<fn() -> T>,
}

impl<T: Record> Topic<T> {
    /// `<root>/<agent>/<kind>/<name>/`
    pub fn at(root: &Path, agent: &str, kind: ObjectKind, name: &str) -> Self {
        Self {
            dir: root.join(agent).join(kind.as_str()).join(name),
            _record: PhantomData,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `<dir>/<key>.json`: pure, no I/O.
    pub fn record_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    /// Read the record stored under `key`, as stored.
    ///
    /// Returns `Ok(None)` when nothing is published. The caller is
    /// responsible for checking that the record's own key matches.
    pub fn get(&self, key: &str) -> Result<Option<T>, CoreError> {
        let path = self.record_path(key);
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(io_err(&path, err)),
        };
        serde_json::from_str(&contents)
            .map(Some)
            .map_err(|source| CoreError::Record { path, source })
    }

    /// Publish `record` under its own key, replacing any previous version.
    pub fn publish(&self, record: &T) -> Result<(), CoreError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| io_err(&self.dir, e))?;
        let key = record.key();
        let path = self.record_path(&key);
        let tmp = self.dir.join(format!("{key}.json.tmp"));

        let json = serde_json::to_string_pretty(record)?;
        std::fs::write(&tmp, json).map_err(|e| io_err(&tmp, e))?;
        if let Err(err) = std::fs::rename(&tmp, &path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(io_err(&path, err));
        }
        Ok(())
    }

    /// Remove the record under `key`. Returns `false` if nothing was published.
    pub fn unpublish(&self, key: &str) -> Result<bool, CoreError> {
        let path = self.record_path(key);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(io_err(&path, err)),
        }
    }

    /// Every published record, keyed by file key. Sorted for determinism.
    pub fn get_all(&self) -> Result<BTreeMap<String, T>, CoreError> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(err) => return Err(io_err(&self.dir, err)),
        };

        let mut all = BTreeMap::new();
        for entry in entries {
            let entry = entry.map_err(|e| io_err(&self.dir, e))?;
            let fname = entry.file_name();
            let name = fname.to_string_lossy();
            let Some(key) = name.strip_suffix(".json") else {
                continue;
            };
            if let Some(record) = self.get(key)? {
                all.insert(key.to_string(), record);
            }
        }
        Ok(all)
    }
}

// ---------------------------------------------------------------------------
// Channels
// ---------------------------------------------------------------------------

/// Capability handle over every topic the orchestrator touches.
///
/// Passed explicitly to the reconciler and installer; there is no ambient
/// context.
#[derive(Debug, Clone)]
pub struct Channels {
    root: PathBuf,
}

impl Channels {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Download requests (orchestrator → downloader).
    pub fn downloader_config(&self, kind: ObjectKind) -> Topic<DownloaderConfig> {
        Topic::at(&self.root, ORCHESTRATOR_AGENT, kind, "DownloaderConfig")
    }

    /// Download results (downloader → orchestrator).
    pub fn downloader_status(&self, kind: ObjectKind) -> Topic<DownloaderStatus> {
        Topic::at(&self.root, DOWNLOADER_AGENT, kind, "DownloaderStatus")
    }

    /// Verification requests (orchestrator → verifier).
    pub fn verifier_config(&self, kind: ObjectKind) -> Topic<VerifyImageConfig> {
        Topic::at(&self.root, ORCHESTRATOR_AGENT, kind, "VerifyImageConfig")
    }

    /// Verification results (verifier → orchestrator).
    pub fn verifier_status(&self, kind: ObjectKind) -> Topic<VerifyImageStatus> {
        Topic::at(&self.root, VERIFIER_AGENT, kind, "VerifyImageStatus")
    }

    /// Aggregate object status published by the orchestrator.
    pub fn object_status(&self, kind: ObjectKind) -> Topic<ObjectStatus> {
        Topic::at(&self.root, ORCHESTRATOR_AGENT, kind, "ObjectStatus")
    }
}
