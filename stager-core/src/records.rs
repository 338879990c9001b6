//! Records exchanged with the downloader and verifier subsystems.
//!
//! `*Config` records are written only by the orchestrator and carry a
//! reference count. `*Status` records are written only by the subsystem;
//! a status with any `pending_*` flag set is mid-transaction and must not be
//! acted on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::pubsub::Record;
use crate::types::{SafeName, State, StorageConfig};

/// A published request whose lifetime is governed by a reference count.
pub trait RefCounted: Record {
    fn ref_count(&self) -> u32;
    fn set_ref_count(&mut self, count: u32);
}

// ---------------------------------------------------------------------------
// Download
// ---------------------------------------------------------------------------

/// Download request, keyed by safe name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloaderConfig {
    pub safename: SafeName,
    pub download_url: String,
    #[serde(default)]
    pub use_free_uplinks: bool,
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
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_sha256: Option<String>,
    pub ref_count: u32,
}

impl DownloaderConfig {
    /// First reference to `safename`, built from the artifact's config.
    pub fn new(safename: SafeName, sc: &StorageConfig) -> Self {
        Self {
            safename,
            download_url: sc.download_url.clone(),
            use_free_uplinks: false,
            size: sc.size,
            transport_method: sc.transport_method.clone(),
            dpath: sc.dpath.clone(),
            api_key: sc.api_key.clone(),
            password: sc.password.clone(),
            image_sha256: sc.digest().map(str::to_owned),
            ref_count: 1,
        }
    }
}

impl Record for DownloaderConfig {
    fn key(&self) -> String {
        self.safename.0.clone()
    }
}

impl RefCounted for DownloaderConfig {
    fn ref_count(&self) -> u32 {
        self.ref_count
    }

    fn set_ref_count(&mut self, count: u32) {
        self.ref_count = count;
    }
}

/// Download result, written by the downloader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloaderStatus {
    pub safename: SafeName,
    /// Object kind as the downloader reports it; dispatch validates it.
    pub obj_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_sha256: Option<String>,
    pub state: State,
    #[serde(default)]
    pub last_err: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_err_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub pending_add: bool,
    #[serde(default)]
    pub pending_modify: bool,
    #[serde(default)]
    pub pending_delete: bool,
}

impl DownloaderStatus {
    pub fn is_pending(&self) -> bool {
        self.pending_add || self.pending_modify || self.pending_delete
    }
}

impl Record for DownloaderStatus {
    fn key(&self) -> String {
        self.safename.0.clone()
    }
}

// ---------------------------------------------------------------------------
// Verify
// ---------------------------------------------------------------------------

/// Verification request, keyed by safe name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyImageConfig {
    pub safename: SafeName,
    pub download_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_sha256: Option<String>,
    #[serde(default)]
    pub certificate_chain: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature_key: Option<String>,
    pub ref_count: u32,
}

impl VerifyImageConfig {
    pub fn new(safename: SafeName, sc: &StorageConfig) -> Self {
        Self {
            safename,
            download_url: sc.download_url.clone(),
            image_sha256: sc.digest().map(str::to_owned),
            certificate_chain: sc.certificate_chain.clone(),
            image_signature: sc.image_signature.clone(),
            signature_key: sc.signature_key.clone(),
            ref_count: 1,
        }
    }
}

impl Record for VerifyImageConfig {
    fn key(&self) -> String {
        self.safename.0.clone()
    }
}

impl RefCounted for VerifyImageConfig {
    fn ref_count(&self) -> u32 {
        self.ref_count
    }

    fn set_ref_count(&mut self, count: u32) {
        self.ref_count = count;
    }
}

/// Verification result, written by the verifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyImageStatus {
    pub safename: SafeName,
    pub obj_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_sha256: Option<String>,
    pub state: State,
    #[serde(default)]
    pub last_err: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_err_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub pending_add: bool,
    #[serde(default)]
    pub pending_modify: bool,
    #[serde(default)]
    pub pending_delete: bool,
}

impl VerifyImageStatus {
    pub fn is_pending(&self) -> bool {
        self.pending_add || self.pending_modify || self.pending_delete
    }
}

impl Record for VerifyImageStatus {
    fn key(&self) -> String {
        self.safename.0.clone()
    }
}
