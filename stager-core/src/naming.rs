//! Safe names: the content-addressed key used everywhere downstream.
//!
//! ```text
//! with digest:     "https: host dir image.img.<sha256>"   ('/' → ' ')
//! without digest:  "image.img.<sha256(locator)>"
//! ```
//!
//! The filename recovered by [`safename_to_filename`] is the last
//! space-separated component with the `.<digest>` tail dropped.

use sha2::{Digest, Sha256};

use crate::error::CoreError;
use crate::types::SafeName;

/// Map `(locator, digest)` to its safe name.
///
/// Pure and deterministic: identical inputs always collapse onto the same
/// request. An empty digest is treated as no digest.
pub fn safename(download_url: &str, image_sha256: Option<&str>) -> SafeName {
    match image_sha256.filter(|s| !s.is_empty()) {
        Some(sha) => SafeName(format!("{}.{}", download_url.replace('/', " "), sha)),
        None => {
            let last = download_url.rsplit('/').next().unwrap_or(download_url);
            let digest = hex::encode(Sha256::digest(download_url.as_bytes()));
            SafeName(format!("{last}.{digest}"))
        }
    }
}

/// Recover the on-disk filename encoded in a safe name.
pub fn safename_to_filename(name: &SafeName) -> Result<String, CoreError> {
    let last = name.0.rsplit(' ').next().unwrap_or(&name.0);
    match last.rfind('.') {
        Some(idx) => Ok(last[..idx].to_string()),
        None => Err(CoreError::MalformedSafename(name.0.clone())),
    }
}
