//! # stager-sync
//!
//! Reference counting, reconciliation and installation.
//!
//! Call [`ObjectManager::apply_object`] whenever an object's config or one of
//! its subsystem results changes, or [`pipeline::run`] to reconcile a whole
//! scope at once.

pub mod error;
pub mod install;
pub mod objects;
pub mod pipeline;
pub mod policy;
pub mod reconcile;
pub mod requests;
pub mod staging;

pub use error::{InstallError, InvariantViolation, SyncError};
pub use install::{install_downloaded_objects, install_downloaded_objects_with};
pub use objects::ObjectManager;
pub use pipeline::{RunReport, Scope};
pub use policy::{policy_for, BaseOsInstaller, CertInstaller, ObjectPolicy};
pub use reconcile::{check_storage_download_status, optimistic_state_without_result};
pub use requests::VerifierRef;
