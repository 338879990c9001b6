//! Per-item reconciliation of subsystem results into storage items.
//!
//! ## `check_storage_download_status`, per artifact in declaration order
//!
//! 1. `Installed` locally → contributes to the minimum, no lookups.
//! 2. Digest declared and a `Delivered` verification result exists (by safe
//!    name, else by digest) → hold a verify reference, copy the state.
//!    A failed verification on the held reference resets the item to
//!    `Initial` with the verifier's error.
//! 3. Otherwise hold a download reference and mirror the download result:
//!    errors on `Initial`, verify request on `Downloaded`. A result behind
//!    the local state (other than `Initial`) is logged and not copied.
//!
//! A result with a pending flag is mid-transaction: the artifact is skipped
//! and its mirrored state still contributes to the minimum.

use std::path::Path;

use chrono::{DateTime, Utc};

use stager_core::{
    Channels, ObjectKind, RetStatus, SafeName, State, StorageConfig, StorageItem,
};

use crate::error::SyncError;
use crate::requests::{self, VerifierRef};

/// Contribution of an artifact whose download result has not been published.
///
/// The request was published this pass or earlier and the downloader simply
/// has not answered yet.
pub fn optimistic_state_without_result() -> State {
    State::DownloadStarted
}

/// Running aggregate for one pass.
struct Aggregate {
    min_state: Option<State>,
    changed: bool,
    all_errors: String,
    error_time: Option<DateTime<Utc>>,
    waiting_for_certs: bool,
}

impl Aggregate {
    fn new() -> Self {
        Self {
            min_state: None,
            changed: false,
            all_errors: String::new(),
            error_time: None,
            waiting_for_certs: false,
        }
    }

    fn contribute(&mut self, state: State) {
        self.min_state = Some(self.min_state.map_or(state, |m| m.min(state)));
    }

    fn append_error(&mut self, prefix: &str, err: &str, at: DateTime<Utc>) {
        self.all_errors.push_str(&format!("{prefix}: {err}\n\n"));
        self.error_time = Some(at);
    }

    fn finish(self) -> RetStatus {
        RetStatus {
            changed: self.changed,
            min_state: self.min_state.unwrap_or(State::Downloaded),
            all_errors: self.all_errors,
            error_time: self.error_time,
            waiting_for_certs: self.waiting_for_certs,
        }
    }
}

/// Reconcile every artifact of object `uuid` against published results.
///
/// `configs` and `items` are paired by index. Recoverable subsystem failures
/// are recorded on the items and in the returned [`RetStatus`]; only store
/// failures are returned as errors.
pub fn check_storage_download_status(
    channels: &Channels,
    cert_dir: &Path,
    kind: ObjectKind,
    uuid: &str,
    configs: &[StorageConfig],
    items: &mut [StorageItem],
) -> Result<RetStatus, SyncError> {
    tracing::debug!("check_storage_download_status({kind}/{uuid})");
    let mut agg = Aggregate::new();

    for (sc, item) in configs.iter().zip(items.iter_mut()) {
        reconcile_item(channels, cert_dir, kind, sc, item, &mut agg)?;
    }

    let ret = agg.finish();
    tracing::debug!(
        "check_storage_download_status({kind}/{uuid}) min {} changed {}",
        ret.min_state,
        ret.changed
    );
    Ok(ret)
}

fn reconcile_item(
    channels: &Channels,
    cert_dir: &Path,
    kind: ObjectKind,
    sc: &StorageConfig,
    item: &mut StorageItem,
    agg: &mut Aggregate,
) -> Result<(), SyncError> {
    if item.state == State::Installed {
        agg.contribute(item.state);
        return Ok(());
    }

    let safename = sc.safename();

    if let Some(sha) = sc.digest() {
        if let Some(vs) = requests::lookup_verification_status_any(channels, kind, &safename, sha)? {
            if vs.is_pending() {
                tracing::info!("verification of {} still pending; skipped", vs.safename);
                agg.contribute(item.state);
                return Ok(());
            }
            if vs.state == State::Delivered {
                if !item.has_verifier_ref {
                    requests::create_verifier_config(channels, kind, &vs.safename, sc, None)?;
                    item.has_verifier_ref = true;
                    item.verifier_safename = Some(vs.safename.clone());
                    agg.changed = true;
                }
                if item.state != vs.state {
                    tracing::info!("{safename}: {} -> {} (verified)", item.state, vs.state);
                    item.state = vs.state;
                    item.clear_error();
                    agg.changed = true;
                }
                agg.contribute(item.state);
                return Ok(());
            }
            if vs.state == State::Initial
                && !vs.last_err.is_empty()
                && holds_verifier_ref(item, &safename, &vs.safename)
            {
                let at = vs.last_err_time.unwrap_or_else(Utc::now);
                if item.state != State::Initial
                    || item.error.as_deref() != Some(vs.last_err.as_str())
                {
                    tracing::warn!("{safename}: verification failed: {}", vs.last_err);
                    agg.changed = true;
                }
                item.state = State::Initial;
                item.set_error(vs.last_err.clone(), at);
                agg.append_error(&format!("{}: verifier", sc.download_url), &vs.last_err, at);
                agg.contribute(item.state);
                return Ok(());
            }
        }
    }

    if !item.has_downloader_ref {
        requests::create_downloader_config(channels, kind, &safename, sc)?;
        item.has_downloader_ref = true;
        agg.changed = true;
    }

    let Some(ds) = requests::lookup_downloader_status(channels, kind, &safename)? else {
        tracing::debug!("{safename}: no download result yet");
        agg.contribute(optimistic_state_without_result());
        return Ok(());
    };
    if ds.is_pending() {
        tracing::info!("download of {safename} still pending; skipped");
        agg.contribute(item.state);
        return Ok(());
    }

    if ds.state < item.state && ds.state != State::Initial {
        tracing::warn!(
            "{safename}: download result {} behind local {}; keeping local",
            ds.state,
            item.state
        );
    } else if item.state != ds.state {
        tracing::info!("{safename}: {} -> {}", item.state, ds.state);
        item.state = ds.state;
        if ds.state != State::Initial {
            item.clear_error();
        }
        agg.changed = true;
    }

    match item.state {
        State::Initial => {
            if !ds.last_err.is_empty() {
                let at = ds.last_err_time.unwrap_or_else(Utc::now);
                if item.error.as_deref() != Some(ds.last_err.as_str()) {
                    agg.changed = true;
                }
                item.set_error(ds.last_err.clone(), at);
                agg.append_error(&sc.download_url, &ds.last_err, at);
            }
        }
        State::DownloadStarted => {}
        State::Downloaded => {
            if sc.digest().is_some() && !item.has_verifier_ref {
                match requests::create_verifier_config(
                    channels,
                    kind,
                    &safename,
                    sc,
                    Some(cert_dir),
                )? {
                    VerifierRef::Acquired => {
                        item.has_verifier_ref = true;
                        item.verifier_safename = Some(safename.clone());
                        agg.changed = true;
                    }
                    VerifierRef::CertsMissing => {
                        tracing::info!("{safename}: waiting for certificates");
                        agg.waiting_for_certs = true;
                    }
                }
            }
        }
        State::Delivered | State::Installed => {}
    }

    agg.contribute(item.state);
    Ok(())
}

/// The verify reference `item` holds, if any, is on `verified_as`.
fn holds_verifier_ref(item: &StorageItem, safename: &SafeName, verified_as: &SafeName) -> bool {
    item.has_verifier_ref && item.verifier_safename.as_ref().unwrap_or(safename) == verified_as
}
