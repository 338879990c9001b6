//! Per-kind installation policies.
//!
//! Each [`ObjectKind`] maps to one [`ObjectPolicy`] that knows where the
//! kind's consumers read from and how to place a staged file there.

use std::fs;
use std::path::{Path, PathBuf};

use stager_core::{naming, ObjectKind, SafeName, StagerConfig};

use crate::error::{io_err, InstallError};

/// Placement rules for one object kind.
pub trait ObjectPolicy {
    /// Default install directory for the kind.
    fn final_dir(&self, config: &StagerConfig) -> PathBuf;

    /// Place the staged bytes at `source` into `final_dir`.
    fn install(&self, source: &Path, final_dir: &Path, safename: &SafeName)
        -> Result<(), InstallError>;
}

/// Policy for `kind`. The set of kinds is closed, so this never fails.
pub fn policy_for(kind: ObjectKind) -> &'static dyn ObjectPolicy {
    match kind {
        ObjectKind::BaseOs => &BaseOsInstaller,
        ObjectKind::Cert => &CertInstaller,
    }
}

// ---------------------------------------------------------------------------
// Certificates
// ---------------------------------------------------------------------------

/// Copies a certificate bundle into the certificate directory, replacing any
/// older copy under the same file name.
#[derive(Debug, Clone, Copy)]
pub struct CertInstaller;

impl ObjectPolicy for CertInstaller {
    fn final_dir(&self, config: &StagerConfig) -> PathBuf {
        config.cert_dir.clone()
    }

    fn install(
        &self,
        source: &Path,
        final_dir: &Path,
        safename: &SafeName,
    ) -> Result<(), InstallError> {
        let dst = copy_into(source, final_dir, safename)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&dst, fs::Permissions::from_mode(0o644))
                .map_err(|e| io_err(&dst, e))?;
        }
        tracing::info!("installed certificate {}", dst.display());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Base-OS images
// ---------------------------------------------------------------------------

/// Copies a base-OS image into the image directory and checks the copy is
/// complete.
#[derive(Debug, Clone, Copy)]
pub struct BaseOsInstaller;

impl ObjectPolicy for BaseOsInstaller {
    fn final_dir(&self, config: &StagerConfig) -> PathBuf {
        config.image_dir.clone()
    }

    fn install(
        &self,
        source: &Path,
        final_dir: &Path,
        safename: &SafeName,
    ) -> Result<(), InstallError> {
        let expected = fs::metadata(source)
            .map_err(|e| io_err(source, e))?
            .len();
        let dst = copy_into(source, final_dir, safename)?;
        let actual = fs::metadata(&dst).map_err(|e| io_err(&dst, e))?.len();
        if actual != expected {
            return Err(InstallError::SizeMismatch {
                path: dst,
                expected,
                actual,
            });
        }
        tracing::info!("installed image {} ({actual} bytes)", dst.display());
        Ok(())
    }
}

/// Copy `source` to `<final_dir>/<filename>` through a `.tmp` sibling.
fn copy_into(source: &Path, final_dir: &Path, safename: &SafeName) -> Result<PathBuf, InstallError> {
    let filename = naming::safename_to_filename(safename)?;
    fs::create_dir_all(final_dir).map_err(|e| io_err(final_dir, e))?;

    let dst = final_dir.join(&filename);
    let tmp = final_dir.join(format!("{filename}.tmp"));
    fs::copy(source, &tmp).map_err(|e| io_err(source, e))?;
    if let Err(err) = fs::rename(&tmp, &dst) {
        let _ = fs::remove_file(&tmp);
        return Err(io_err(&dst, err));
    }
    Ok(dst)
}
