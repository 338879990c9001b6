use std::path::{Path, PathBuf};
use std::time::Duration;

use stager_core::config::root_at;
use stager_core::pubsub::{DOWNLOADER_AGENT, VERIFIER_AGENT};
use stager_core::StagerConfig;

pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(500);
/// Full reconcile cadence; catches status writes that fell inside a debounce window.
pub const RESYNC_INTERVAL: Duration = Duration::from_secs(60);

pub const DAEMON_SOCKET: &str = "stager.sock";

pub fn socket_path(home: &Path) -> PathBuf {
    root_at(home).join(DAEMON_SOCKET)
}

/// `<pubsub_root>/downloader`
pub fn downloader_status_root(config: &StagerConfig) -> PathBuf {
    config.pubsub_root.join(DOWNLOADER_AGENT)
}

/// `<pubsub_root>/verifier`
pub fn verifier_status_root(config: &StagerConfig) -> PathBuf {
    config.pubsub_root.join(VERIFIER_AGENT)
}
