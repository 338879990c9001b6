//! stager core library: domain types, safe naming, configuration, the
//! object registry and the file-backed pub/sub store.
//!
//! - [`types`]: states, object kinds, per-artifact config/status
//! - [`records`]: download/verify requests and results
//! - [`naming`]: safe names
//! - [`pubsub`]: [`Topic`] and the [`Channels`] capability handle
//! - [`registry`]: object config YAML load / save / list
//! - [`config`]: [`StagerConfig`]

pub mod config;
pub mod error;
pub mod naming;
pub mod pubsub;
pub mod records;
pub mod registry;
pub mod types;

pub use config::StagerConfig;
pub use error::CoreError;
pub use pubsub::{Channels, Record, Topic};
pub use records::{DownloaderConfig, DownloaderStatus, RefCounted, VerifyImageConfig, VerifyImageStatus};
pub use types::{
    ObjectConfig, ObjectKind, ObjectStatus, RetStatus, SafeName, State, StorageConfig, StorageItem,
};
