//! Reference-counted download and verification requests.
//!
//! Every consumer of an artifact calls [`acquire`] once and [`release`] once.
//! N consumers of the same safe name share one published request whose
//! `ref_count` is N; the request is unpublished when the last one releases,
//! which tells the subsystem to drop the artifact.
//!
//! Nothing here waits for the subsystem: publishes and unpublishes are
//! observed by it asynchronously.

use std::fmt::Debug;
use std::path::Path;

use stager_core::{
    naming, Channels, DownloaderConfig, DownloaderStatus, ObjectKind, Record, RefCounted,
    SafeName, StorageConfig, Topic, VerifyImageConfig, VerifyImageStatus,
};

use crate::error::SyncError;

// ---------------------------------------------------------------------------
// Generic acquire / release
// ---------------------------------------------------------------------------

/// Read `key` from `topic`, rejecting a record whose own key disagrees.
pub(crate) fn lookup<T: Record + Debug>(
    topic: &Topic<T>,
    key: &SafeName,
    what: &str,
) -> Result<Option<T>, SyncError> {
    let Some(record) = topic.get(key.as_str())? else {
        tracing::debug!("lookup {what}({key}) not found");
        return Ok(None);
    };
    if record.key() != key.as_str() {
        tracing::warn!("lookup {what}({key}) got {}; ignored {record:?}", record.key());
        return Ok(None);
    }
    Ok(Some(record))
}

/// Take one reference on `key`, creating the request with count 1 if absent.
///
/// Returns the reference count after the call.
pub fn acquire<T, F>(topic: &Topic<T>, key: &SafeName, create: F) -> Result<u32, SyncError>
where
    T: RefCounted + Debug,
    F: FnOnce() -> T,
{
    match lookup(topic, key, "request")? {
        Some(mut existing) => {
            let count = existing.ref_count() + 1;
            existing.set_ref_count(count);
            topic.publish(&existing)?;
            tracing::info!("acquire({key}) refcount now {count}");
            Ok(count)
        }
        None => {
            let fresh = create();
            topic.publish(&fresh)?;
            tracing::info!("acquire({key}) added");
            Ok(fresh.ref_count())
        }
    }
}

/// Drop one reference on `key`; unpublish when it was the last one.
///
/// Releasing an unknown key is a no-op. Returns the remaining count, or
/// `None` if nothing was published.
pub fn release<T>(topic: &Topic<T>, key: &SafeName) -> Result<Option<u32>, SyncError>
where
    T: RefCounted + Debug,
{
    let Some(mut existing) = lookup(topic, key, "request")? else {
        tracing::info!("release({key}) no request");
        return Ok(None);
    };

    if existing.ref_count() > 1 {
        let count = existing.ref_count() - 1;
        tracing::info!("release({key}) decrementing refcount to {count}");
        existing.set_ref_count(count);
        topic.publish(&existing)?;
        return Ok(Some(count));
    }

    topic.unpublish(key.as_str())?;
    tracing::info!("release({key}) removed");
    Ok(Some(0))
}

// ---------------------------------------------------------------------------
// Download
// ---------------------------------------------------------------------------

pub fn lookup_downloader_config(
    channels: &Channels,
    kind: ObjectKind,
    safename: &SafeName,
) -> Result<Option<DownloaderConfig>, SyncError> {
    lookup(&channels.downloader_config(kind), safename, "DownloaderConfig")
}

/// Reference the download request for `safename`, creating it from `sc`.
pub fn create_downloader_config(
    channels: &Channels,
    kind: ObjectKind,
    safename: &SafeName,
    sc: &StorageConfig,
) -> Result<u32, SyncError> {
    tracing::info!("create_downloader_config({kind}/{safename})");
    acquire(&channels.downloader_config(kind), safename, || {
        DownloaderConfig::new(safename.clone(), sc)
    })
}

pub fn remove_downloader_config(
    channels: &Channels,
    kind: ObjectKind,
    safename: &SafeName,
) -> Result<Option<u32>, SyncError> {
    tracing::info!("remove_downloader_config({kind}/{safename})");
    release(&channels.downloader_config(kind), safename)
}

/// Current download result for `safename`, exactly as published.
///
/// Pending flags are left for the caller to interpret.
pub fn lookup_downloader_status(
    channels: &Channels,
    kind: ObjectKind,
    safename: &SafeName,
) -> Result<Option<DownloaderStatus>, SyncError> {
    lookup(&channels.downloader_status(kind), safename, "DownloaderStatus")
}

/// Download results across every object kind.
pub fn downloader_get_all(
    channels: &Channels,
) -> Result<Vec<(ObjectKind, DownloaderStatus)>, SyncError> {
    let mut all = Vec::new();
    for kind in ObjectKind::all() {
        for (_, status) in channels.downloader_status(*kind).get_all()? {
            all.push((*kind, status));
        }
    }
    Ok(all)
}

// ---------------------------------------------------------------------------
// Verify
// ---------------------------------------------------------------------------

/// Outcome of asking for a verification reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifierRef {
    Acquired,
    /// Trust material is not installed yet; retry on a later pass.
    CertsMissing,
}

pub fn lookup_verification_config(
    channels: &Channels,
    kind: ObjectKind,
    safename: &SafeName,
) -> Result<Option<VerifyImageConfig>, SyncError> {
    lookup(&channels.verifier_config(kind), safename, "VerifyImageConfig")
}

/// Reference the verification request for `safename`.
///
/// With `cert_dir` set, the signature key and every certificate in the chain
/// must already be installed there; otherwise nothing is published and
/// [`VerifierRef::CertsMissing`] is returned.
pub fn create_verifier_config(
    channels: &Channels,
    kind: ObjectKind,
    safename: &SafeName,
    sc: &StorageConfig,
    cert_dir: Option<&Path>,
) -> Result<VerifierRef, SyncError> {
    if let Some(dir) = cert_dir {
        if !check_certs_for_object(sc, dir) {
            tracing::info!("create_verifier_config({safename}) certs are still not installed");
            return Ok(VerifierRef::CertsMissing);
        }
    }
    tracing::info!("create_verifier_config({kind}/{safename})");
    acquire(&channels.verifier_config(kind), safename, || {
        VerifyImageConfig::new(safename.clone(), sc)
    })?;
    Ok(VerifierRef::Acquired)
}

pub fn remove_verifier_config(
    channels: &Channels,
    kind: ObjectKind,
    safename: &SafeName,
) -> Result<Option<u32>, SyncError> {
    tracing::info!("remove_verifier_config({kind}/{safename})");
    release(&channels.verifier_config(kind), safename)
}

pub fn lookup_verification_status(
    channels: &Channels,
    kind: ObjectKind,
    safename: &SafeName,
) -> Result<Option<VerifyImageStatus>, SyncError> {
    lookup(&channels.verifier_status(kind), safename, "VerifyImageStatus")
}

/// First settled verification result for `image_sha256`, under any safe name.
pub fn lookup_verification_status_sha256(
    channels: &Channels,
    kind: ObjectKind,
    image_sha256: &str,
) -> Result<Option<VerifyImageStatus>, SyncError> {
    let all = channels.verifier_status(kind).get_all()?;
    Ok(all.into_values().find(|vs| {
        !vs.is_pending() && vs.image_sha256.as_deref() == Some(image_sha256)
    }))
}

/// Verification result by safe name, falling back to a digest match.
///
/// Verified content is shared across locators that produce the same digest.
/// Download results are never looked up this way.
pub fn lookup_verification_status_any(
    channels: &Channels,
    kind: ObjectKind,
    safename: &SafeName,
    image_sha256: &str,
) -> Result<Option<VerifyImageStatus>, SyncError> {
    if let Some(vs) = lookup_verification_status(channels, kind, safename)? {
        return Ok(Some(vs));
    }
    lookup_verification_status_sha256(channels, kind, image_sha256)
}

/// True when every certificate `sc` needs is present in `cert_dir`.
pub fn check_certs_for_object(sc: &StorageConfig, cert_dir: &Path) -> bool {
    let urls = sc
        .signature_key
        .iter()
        .chain(sc.certificate_chain.iter())
        .filter(|url| !url.is_empty());

    for url in urls {
        let name = naming::safename(url, None);
        let Ok(filename) = naming::safename_to_filename(&name) else {
            return false;
        };
        let path = cert_dir.join(filename);
        if !path.exists() {
            tracing::debug!("check_certs_for_object: {} not installed", path.display());
            return false;
        }
    }
    true
}
