//! Domain types for the object lifecycle.
//!
//! An *object* (one base-OS version, one certificate bundle) is an ordered
//! list of artifacts. Each artifact has a [`StorageConfig`] describing what
//! to fetch and a [`StorageItem`] mirroring how far it has progressed.
//! All path fields use `PathBuf`; all types round-trip through serde.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::naming;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Content-addressed key shared by requests, results and staging paths.
///
/// Always produced by [`naming::safename`]; never built by hand outside tests.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SafeName(pub String);

impl SafeName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SafeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for SafeName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SafeName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Lifecycle state of one artifact.
///
/// Ordering is pipeline progress: `Initial` is the least advanced. An object's
/// aggregate state is the minimum over its artifacts.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum State {
    #[default]
    Initial,
    DownloadStarted,
    Downloaded,
    /// Verified; bytes sit in the verified staging area.
    Delivered,
    Installed,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            State::Initial => write!(f, "INITIAL"),
            State::DownloadStarted => write!(f, "DOWNLOAD_STARTED"),
            State::Downloaded => write!(f, "DOWNLOADED"),
            State::Delivered => write!(f, "DELIVERED"),
            State::Installed => write!(f, "INSTALLED"),
        }
    }
}

/// The closed set of object kinds the orchestrator manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    #[serde(rename = "baseOs")]
    BaseOs,
    #[serde(rename = "cert")]
    Cert,
}

impl ObjectKind {
    /// Every supported kind, in a fixed order.
    pub fn all() -> &'static [ObjectKind] {
        &[ObjectKind::BaseOs, ObjectKind::Cert]
    }

    /// Directory component used for staging, pub/sub scopes and the registry.
    pub fn as_str(self) -> &'static str {
        match self {
            ObjectKind::BaseOs => "baseOs",
            ObjectKind::Cert => "cert",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "baseOs" => Ok(ObjectKind::BaseOs),
            "cert" => Ok(ObjectKind::Cert),
            other => Err(CoreError::UnsupportedKind(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Per-artifact config and status
// ---------------------------------------------------------------------------

/// What to fetch for one artifact of an object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    pub download_url: String,
    /// Expected SHA-256 of the content; `None` opts out of verification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_sha256: Option<String>,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub transport_method: String,
    #[serde(default)]
    pub dpath: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Overrides the object kind's default install directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_obj_dir: Option<PathBuf>,
    #[serde(default)]
    pub certificate_chain: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature_key: Option<String>,
}

impl StorageConfig {
    /// A config with only a locator and an optional digest.
    pub fn new(download_url: impl Into<String>, image_sha256: Option<&str>) -> Self {
        Self {
            download_url: download_url.into(),
            image_sha256: image_sha256.map(str::to_owned),
            size: 0,
            transport_method: String::new(),
            dpath: String::new(),
            api_key: None,
            password: None,
            final_obj_dir: None,
            certificate_chain: vec![],
            image_signature: None,
            signature_key: None,
        }
    }

    /// The declared digest, treating an empty string as absent.
    pub fn digest(&self) -> Option<&str> {
        self.image_sha256.as_deref().filter(|s| !s.is_empty())
    }

    pub fn safename(&self) -> SafeName {
        naming::safename(&self.download_url, self.digest())
    }
}

/// Orchestrator-owned mirror of one artifact's progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageItem {
    pub download_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_obj_dir: Option<PathBuf>,
    #[serde(default)]
    pub state: State,
    #[serde(default)]
    pub has_downloader_ref: bool,
    #[serde(default)]
    pub has_verifier_ref: bool,
    /// Key the verifier reference was taken on. A digest match may come from
    /// a result published under a different safe name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verifier_safename: Option<SafeName>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_time: Option<DateTime<Utc>>,
}

impl StorageItem {
    /// Fresh item for `config`, destined for `final_obj_dir`.
    pub fn new(config: &StorageConfig, final_obj_dir: Option<PathBuf>) -> Self {
        Self {
            download_url: config.download_url.clone(),
            image_sha256: config.digest().map(str::to_owned),
            final_obj_dir,
            state: State::Initial,
            has_downloader_ref: false,
            has_verifier_ref: false,
            verifier_safename: None,
            error: None,
            error_time: None,
        }
    }

    /// True when this item tracks the same content as `config`.
    pub fn matches(&self, config: &StorageConfig) -> bool {
        self.download_url == config.download_url
            && self.image_sha256.as_deref().filter(|s| !s.is_empty()) == config.digest()
    }

    /// Bytes are staged and nothing but placement is left.
    pub fn is_content_ready(&self) -> bool {
        match self.state {
            State::Installed | State::Delivered => true,
            State::Downloaded => self.image_sha256.as_deref().map_or(true, str::is_empty),
            State::Initial | State::DownloadStarted => false,
        }
    }

    pub fn set_error(&mut self, error: impl Into<String>, at: DateTime<Utc>) {
        self.error = Some(error.into());
        self.error_time = Some(at);
    }

    pub fn clear_error(&mut self) {
        self.error = None;
        self.error_time = None;
    }
}

/// Result of one reconciliation pass over an object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetStatus {
    pub changed: bool,
    pub min_state: State,
    /// Every subsystem error seen this pass, concatenated.
    pub all_errors: String,
    pub error_time: Option<DateTime<Utc>>,
    /// Verification could not start because trust material is missing.
    pub waiting_for_certs: bool,
}

// ---------------------------------------------------------------------------
// Objects
// ---------------------------------------------------------------------------

/// Desired configuration of one object, as found in the object registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectConfig {
    pub uuid: String,
    pub kind: ObjectKind,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub storage: Vec<StorageConfig>,
}

/// Published status of one object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectStatus {
    pub uuid: String,
    pub kind: ObjectKind,
    #[serde(default)]
    pub name: String,
    pub state: State,
    #[serde(default)]
    pub storage: Vec<StorageItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_time: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl ObjectStatus {
    /// Empty status for a newly seen object.
    pub fn new(config: &ObjectConfig) -> Self {
        Self {
            uuid: config.uuid.clone(),
            kind: config.kind,
            name: config.name.clone(),
            state: State::Initial,
            storage: vec![],
            error: None,
            error_time: None,
            updated_at: Utc::now(),
        }
    }

    /// Every artifact is installed.
    pub fn is_installed(&self) -> bool {
        self.storage.iter().all(|s| s.state == State::Installed)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
