//! Staging-area paths shared with the downloader and verifier.
//!
//! ```text
//! <staging_root>/<kind>/pending/<safename>                  downloaded, unverified
//! <staging_root>/<kind>/verified/<sha256>/<filename>         verified
//! ```

use std::path::{Path, PathBuf};

use stager_core::{naming, CoreError, ObjectKind, SafeName};

/// `<staging_root>/<kind>/`
pub fn kind_dir(staging_root: &Path, kind: ObjectKind) -> PathBuf {
    staging_root.join(kind.as_str())
}

/// Where the downloader leaves bytes before verification.
pub fn pending_path(staging_root: &Path, kind: ObjectKind, safename: &SafeName) -> PathBuf {
    kind_dir(staging_root, kind)
        .join("pending")
        .join(safename.as_str())
}

/// Where the verifier leaves bytes after verification.
pub fn verified_path(
    staging_root: &Path,
    kind: ObjectKind,
    image_sha256: &str,
    safename: &SafeName,
) -> Result<PathBuf, CoreError> {
    let filename = naming::safename_to_filename(safename)?;
    Ok(kind_dir(staging_root, kind)
        .join("verified")
        .join(image_sha256)
        .join(filename))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_and_verified_layout() {
        let root = Path::new("/var/tmp/stager/downloads");
        let name = naming::safename("https://h/os/rootfs.img", Some("ab12"));

        let pending = pending_path(root, ObjectKind::BaseOs, &name);
        assert_eq!(
            pending,
            root.join("baseOs").join("pending").join(name.as_str())
        );

        let verified = verified_path(root, ObjectKind::BaseOs, "ab12", &name).unwrap();
        assert_eq!(
            verified,
            PathBuf::from("/var/tmp/stager/downloads/baseOs/verified/ab12/rootfs.img")
        );
    }
}
