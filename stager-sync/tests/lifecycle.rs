//! End-to-end lifecycle tests: reference counting, reconciliation and
//! installation against a file-backed store in a temp directory.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use stager_core::{
    naming, Channels, DownloaderStatus, ObjectConfig, ObjectKind, SafeName, StagerConfig, State,
    StorageConfig, StorageItem, VerifyImageStatus,
};
use stager_sync::{
    check_storage_download_status, install_downloaded_objects, install_downloaded_objects_with,
    requests, staging, InstallError, InvariantViolation, ObjectManager, ObjectPolicy, SyncError,
};
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn setup() -> (TempDir, StagerConfig) {
    init_logging();
    let tmp = TempDir::new().expect("tempdir");
    let cfg = StagerConfig::rooted_at(tmp.path());
    (tmp, cfg)
}

fn dl_status(name: &SafeName, kind: ObjectKind, state: State) -> DownloaderStatus {
    DownloaderStatus {
        safename: name.clone(),
        obj_type: kind.to_string(),
        image_sha256: None,
        state,
        last_err: String::new(),
        last_err_time: None,
        pending_add: false,
        pending_modify: false,
        pending_delete: false,
    }
}

fn vf_status(name: &SafeName, sha: &str, state: State) -> VerifyImageStatus {
    VerifyImageStatus {
        safename: name.clone(),
        obj_type: "baseOs".to_string(),
        image_sha256: Some(sha.to_string()),
        state,
        last_err: String::new(),
        last_err_time: None,
        pending_add: false,
        pending_modify: false,
        pending_delete: false,
    }
}

fn item_at(sc: &StorageConfig, dir: &Path, state: State) -> StorageItem {
    let mut item = StorageItem::new(sc, Some(dir.to_path_buf()));
    item.state = state;
    item
}

fn reconcile(
    cfg: &StagerConfig,
    kind: ObjectKind,
    configs: &[StorageConfig],
    items: &mut [StorageItem],
) -> stager_core::RetStatus {
    check_storage_download_status(&cfg.channels(), &cfg.cert_dir, kind, "u-1", configs, items)
        .expect("reconcile")
}

fn stage_pending(cfg: &StagerConfig, kind: ObjectKind, sc: &StorageConfig, body: &str) -> PathBuf {
    let path = staging::pending_path(&cfg.staging_root, kind, &sc.safename());
    fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    fs::write(&path, body).expect("write staged");
    path
}

// ---------------------------------------------------------------------------
// 1. Naming and reference counting
// ---------------------------------------------------------------------------

#[test]
fn identical_inputs_share_one_request() {
    let (_tmp, cfg) = setup();
    let channels = cfg.channels();
    let a = StorageConfig::new("https://cdn.example/os/rootfs.img", Some("d1"));
    let b = StorageConfig::new("https://cdn.example/os/rootfs.img", Some("d1"));
    assert_eq!(a.safename(), b.safename());

    requests::create_downloader_config(&channels, ObjectKind::BaseOs, &a.safename(), &a).unwrap();
    requests::create_downloader_config(&channels, ObjectKind::BaseOs, &b.safename(), &b).unwrap();

    let all = channels.downloader_config(ObjectKind::BaseOs).get_all().unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all.values().next().unwrap().ref_count, 2);
}

#[test]
fn n_acquires_and_n_releases_leave_nothing_published() {
    let (_tmp, cfg) = setup();
    let channels = cfg.channels();
    let sc = StorageConfig::new("https://cdn.example/os/rootfs.img", Some("d1"));
    let name = sc.safename();
    const N: u32 = 4;

    for _ in 0..N {
        requests::create_verifier_config(&channels, ObjectKind::BaseOs, &name, &sc, None).unwrap();
    }
    for _ in 0..N - 1 {
        requests::remove_verifier_config(&channels, ObjectKind::BaseOs, &name).unwrap();
    }
    let left = requests::lookup_verification_config(&channels, ObjectKind::BaseOs, &name)
        .unwrap()
        .expect("one reference left");
    assert_eq!(left.ref_count, 1);

    requests::remove_verifier_config(&channels, ObjectKind::BaseOs, &name).unwrap();
    assert!(channels.verifier_config(ObjectKind::BaseOs).get_all().unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// 2. Reconciler
// ---------------------------------------------------------------------------

#[test]
fn all_installed_performs_no_lookups() {
    init_logging();
    let tmp = TempDir::new().unwrap();
    // Any store access below a regular file fails with an I/O error.
    let blocker = tmp.path().join("not-a-dir");
    fs::write(&blocker, "").unwrap();
    let channels = Channels::new(blocker.join("run"));

    let configs = vec![
        StorageConfig::new("https://h/a.pem", None),
        StorageConfig::new("https://h/b.pem", Some("d2")),
    ];
    let mut items: Vec<_> = configs
        .iter()
        .map(|sc| item_at(sc, tmp.path(), State::Installed))
        .collect();
    let before = items.clone();

    let ret = check_storage_download_status(
        &channels,
        tmp.path(),
        ObjectKind::Cert,
        "u-1",
        &configs,
        &mut items,
    )
    .expect("no store access");
    assert!(!ret.changed);
    assert_eq!(ret.min_state, State::Installed);
    assert_eq!(items, before);
}

#[test]
fn empty_artifact_list_is_downloaded() {
    let (_tmp, cfg) = setup();
    let ret = reconcile(&cfg, ObjectKind::BaseOs, &[], &mut []);
    assert_eq!(ret.min_state, State::Downloaded);
}

#[test]
fn pending_result_never_mutates_the_item() {
    let (_tmp, cfg) = setup();
    let channels = cfg.channels();
    let sc = StorageConfig::new("https://h/os/rootfs.img", Some("d1"));
    let mut items = vec![item_at(&sc, &cfg.image_dir, State::DownloadStarted)];
    items[0].has_downloader_ref = true;

    let mut status = dl_status(&sc.safename(), ObjectKind::BaseOs, State::Downloaded);
    status.pending_modify = true;
    channels.downloader_status(ObjectKind::BaseOs).publish(&status).unwrap();

    let before = items.clone();
    let ret = reconcile(&cfg, ObjectKind::BaseOs, std::slice::from_ref(&sc), &mut items);
    assert_eq!(items, before);
    assert!(!ret.changed);
    assert_eq!(ret.min_state, State::DownloadStarted);

    // The object manager ignores the update outright.
    let mgr = ObjectManager::new(cfg.clone());
    assert!(mgr.update_downloader_status(&status).unwrap().is_empty());
}

#[test]
fn aggregate_is_the_minimum_state() {
    let (_tmp, cfg) = setup();
    let channels = cfg.channels();
    let a = StorageConfig::new("https://h/a.img", None);
    let b = StorageConfig::new("https://h/b.img", Some("d2"));
    let c = StorageConfig::new("https://h/c.img", Some("d3"));

    channels
        .downloader_status(ObjectKind::BaseOs)
        .publish(&dl_status(&a.safename(), ObjectKind::BaseOs, State::Downloaded))
        .unwrap();
    channels
        .verifier_status(ObjectKind::BaseOs)
        .publish(&vf_status(&b.safename(), "d2", State::Delivered))
        .unwrap();

    let configs = vec![a.clone(), b.clone(), c.clone()];
    let mut items = vec![
        item_at(&a, &cfg.image_dir, State::Initial),
        item_at(&b, &cfg.image_dir, State::Initial),
        item_at(&c, &cfg.image_dir, State::Installed),
    ];
    let ret = reconcile(&cfg, ObjectKind::BaseOs, &configs, &mut items);

    let states: Vec<_> = items.iter().map(|i| i.state).collect();
    assert_eq!(states, vec![State::Downloaded, State::Delivered, State::Installed]);
    assert_eq!(ret.min_state, State::Downloaded);
}

#[test]
fn delivered_verification_shortcuts_the_download() {
    let (_tmp, cfg) = setup();
    let channels = cfg.channels();
    let sc = StorageConfig::new("https://h/os/rootfs.img", Some("d1"));
    channels
        .verifier_status(ObjectKind::BaseOs)
        .publish(&vf_status(&sc.safename(), "d1", State::Delivered))
        .unwrap();

    let mut items = vec![StorageItem::new(&sc, Some(cfg.image_dir.clone()))];
    let ret = reconcile(&cfg, ObjectKind::BaseOs, std::slice::from_ref(&sc), &mut items);

    assert!(ret.changed);
    assert!(items[0].has_verifier_ref);
    assert!(!items[0].has_downloader_ref);
    assert_eq!(items[0].state, State::Delivered);
    assert!(channels.downloader_config(ObjectKind::BaseOs).get_all().unwrap().is_empty());
    assert_eq!(
        requests::lookup_verification_config(&channels, ObjectKind::BaseOs, &sc.safename())
            .unwrap()
            .expect("verify request")
            .ref_count,
        1
    );
}

#[test]
fn delivered_under_another_name_is_found_by_digest_and_released_there() {
    let (_tmp, cfg) = setup();
    let channels = cfg.channels();
    let mirror = StorageConfig::new("https://mirror.example/rootfs.img", Some("d1"));
    channels
        .verifier_status(ObjectKind::BaseOs)
        .publish(&vf_status(&mirror.safename(), "d1", State::Delivered))
        .unwrap();

    let object = ObjectConfig {
        uuid: "os-1".to_string(),
        kind: ObjectKind::BaseOs,
        name: "os".to_string(),
        storage: vec![StorageConfig::new("https://cdn.example/rootfs.img", Some("d1"))],
    };
    let mgr = ObjectManager::new(cfg.clone());
    let verified =
        staging::verified_path(&cfg.staging_root, ObjectKind::BaseOs, "d1", &mirror.safename())
            .unwrap();
    fs::create_dir_all(verified.parent().unwrap()).unwrap();
    fs::write(&verified, "image").unwrap();

    let status = mgr.apply_object(&object).unwrap();
    assert_eq!(status.storage[0].verifier_safename, Some(mirror.safename()));
    assert_eq!(status.state, State::Installed);

    mgr.remove_object(ObjectKind::BaseOs, "os-1").unwrap();
    assert!(channels.verifier_config(ObjectKind::BaseOs).get_all().unwrap().is_empty());
}

#[test]
fn digest_match_installs_bytes_staged_under_the_other_filename() {
    let (_tmp, cfg) = setup();
    let channels = cfg.channels();
    let mirror = StorageConfig::new("https://mirror.example/os-v2.img", Some("d1"));
    channels
        .verifier_status(ObjectKind::BaseOs)
        .publish(&vf_status(&mirror.safename(), "d1", State::Delivered))
        .unwrap();
    let verified =
        staging::verified_path(&cfg.staging_root, ObjectKind::BaseOs, "d1", &mirror.safename())
            .unwrap();
    assert!(verified.ends_with("os-v2.img"));
    fs::create_dir_all(verified.parent().unwrap()).unwrap();
    fs::write(&verified, "image").unwrap();

    let object = ObjectConfig {
        uuid: "os-2".to_string(),
        kind: ObjectKind::BaseOs,
        name: "os".to_string(),
        storage: vec![StorageConfig::new("https://cdn.example/rootfs.img", Some("d1"))],
    };
    let status = ObjectManager::new(cfg.clone())
        .apply_object(&object)
        .expect("digest match under another filename installs");
    assert_eq!(status.state, State::Installed);
    assert_eq!(fs::read_to_string(cfg.image_dir.join("rootfs.img")).unwrap(), "image");
}

#[test]
fn verifier_failure_is_recorded_and_resets_the_item() {
    let (_tmp, cfg) = setup();
    let channels = cfg.channels();
    let sc = StorageConfig::new("https://h/os/rootfs.img", Some("d1"));
    let object = ObjectConfig {
        uuid: "os-3".to_string(),
        kind: ObjectKind::BaseOs,
        name: "os".to_string(),
        storage: vec![sc.clone()],
    };
    let mgr = ObjectManager::new(cfg.clone());
    channels
        .downloader_status(ObjectKind::BaseOs)
        .publish(&dl_status(&sc.safename(), ObjectKind::BaseOs, State::Downloaded))
        .unwrap();
    let status = mgr.apply_object(&object).unwrap();
    assert!(status.storage[0].has_verifier_ref);
    assert_eq!(status.state, State::Downloaded);

    let at = Utc::now();
    let mut failed = vf_status(&sc.safename(), "d1", State::Initial);
    failed.last_err = "hash mismatch".to_string();
    failed.last_err_time = Some(at);
    channels.verifier_status(ObjectKind::BaseOs).publish(&failed).unwrap();

    let status = mgr.apply_object(&object).unwrap();
    assert_eq!(status.state, State::Initial);
    assert_eq!(status.storage[0].state, State::Initial);
    assert_eq!(status.storage[0].error.as_deref(), Some("hash mismatch"));
    assert_eq!(status.storage[0].error_time, Some(at));
    assert!(status.error.as_deref().is_some_and(|e| e.contains("hash mismatch")));
    assert_eq!(
        requests::lookup_verification_config(&channels, ObjectKind::BaseOs, &sc.safename())
            .unwrap()
            .expect("verify request kept on failure")
            .ref_count,
        1
    );

    // The verifier retries and delivers.
    let verified =
        staging::verified_path(&cfg.staging_root, ObjectKind::BaseOs, "d1", &sc.safename()).unwrap();
    fs::create_dir_all(verified.parent().unwrap()).unwrap();
    fs::write(&verified, "image").unwrap();
    channels
        .verifier_status(ObjectKind::BaseOs)
        .publish(&vf_status(&sc.safename(), "d1", State::Delivered))
        .unwrap();
    let status = mgr.apply_object(&object).unwrap();
    assert_eq!(status.state, State::Installed);
    assert!(status.error.is_none());
}

#[test]
fn initial_failure_is_copied_and_aggregated() {
    let (_tmp, cfg) = setup();
    let channels = cfg.channels();
    let sc = StorageConfig::new("https://h/os/rootfs.img", Some("d1"));
    let mut items = vec![item_at(&sc, &cfg.image_dir, State::DownloadStarted)];
    items[0].has_downloader_ref = true;

    let at = Utc::now();
    let mut status = dl_status(&sc.safename(), ObjectKind::BaseOs, State::Initial);
    status.last_err = "connection reset".to_string();
    status.last_err_time = Some(at);
    channels.downloader_status(ObjectKind::BaseOs).publish(&status).unwrap();

    let ret = reconcile(&cfg, ObjectKind::BaseOs, std::slice::from_ref(&sc), &mut items);
    assert!(ret.changed);
    assert_eq!(ret.min_state, State::Initial);
    assert!(ret.all_errors.contains("connection reset"));
    assert_eq!(ret.error_time, Some(at));
    assert_eq!(items[0].error.as_deref(), Some("connection reset"));
    assert_eq!(items[0].error_time, Some(at));
}

#[test]
fn verification_waits_for_certificates() {
    let (_tmp, cfg) = setup();
    let channels = cfg.channels();
    let mut sc = StorageConfig::new("https://h/os/rootfs.img", Some("d1"));
    sc.signature_key = Some("https://h/keys/signer.pem".to_string());
    channels
        .downloader_status(ObjectKind::BaseOs)
        .publish(&dl_status(&sc.safename(), ObjectKind::BaseOs, State::Downloaded))
        .unwrap();

    let mut items = vec![StorageItem::new(&sc, Some(cfg.image_dir.clone()))];
    let ret = reconcile(&cfg, ObjectKind::BaseOs, std::slice::from_ref(&sc), &mut items);
    assert!(ret.waiting_for_certs);
    assert!(!items[0].has_verifier_ref);
    assert!(channels.verifier_config(ObjectKind::BaseOs).get_all().unwrap().is_empty());

    fs::create_dir_all(&cfg.cert_dir).unwrap();
    fs::write(cfg.cert_dir.join("signer.pem"), "key").unwrap();
    let ret = reconcile(&cfg, ObjectKind::BaseOs, std::slice::from_ref(&sc), &mut items);
    assert!(!ret.waiting_for_certs);
    assert!(items[0].has_verifier_ref);
    assert_eq!(ret.min_state, State::Downloaded);
}

#[test]
fn repeated_passes_do_not_double_count() {
    let (_tmp, cfg) = setup();
    let channels = cfg.channels();
    let sc = StorageConfig::new("https://h/os/rootfs.img", Some("d1"));
    let mut items = vec![StorageItem::new(&sc, Some(cfg.image_dir.clone()))];
    for _ in 0..3 {
        reconcile(&cfg, ObjectKind::BaseOs, std::slice::from_ref(&sc), &mut items);
    }
    let req = requests::lookup_downloader_config(&channels, ObjectKind::BaseOs, &sc.safename())
        .unwrap()
        .unwrap();
    assert_eq!(req.ref_count, 1);
}

// ---------------------------------------------------------------------------
// 3. Installer
// ---------------------------------------------------------------------------

#[test]
fn unverified_download_is_installed_once() {
    let (_tmp, cfg) = setup();
    let sc = StorageConfig::new("https://h/certs/root.pem", None);
    stage_pending(&cfg, ObjectKind::Cert, &sc, "PEM");
    let mut items = vec![item_at(&sc, &cfg.cert_dir, State::Downloaded)];

    assert!(install_downloaded_objects(&cfg, ObjectKind::Cert, "u-1", &mut items).unwrap());
    assert_eq!(items[0].state, State::Installed);
    assert_eq!(fs::read_to_string(cfg.cert_dir.join("root.pem")).unwrap(), "PEM");

    assert!(install_downloaded_objects(&cfg, ObjectKind::Cert, "u-1", &mut items).unwrap());
    assert_eq!(items[0].state, State::Installed);
}

#[test]
fn missing_staged_file_is_fatal() {
    let (_tmp, cfg) = setup();
    let sc = StorageConfig::new("https://h/os/rootfs.img", Some("d1"));
    let mut items = vec![item_at(&sc, &cfg.image_dir, State::Delivered)];

    let err = install_downloaded_objects(&cfg, ObjectKind::BaseOs, "u-1", &mut items).unwrap_err();
    assert!(matches!(err, InvariantViolation::MissingStagedArtifact { .. }));
    assert!(SyncError::from(err).is_fatal());
}

struct FailingPolicy;

impl ObjectPolicy for FailingPolicy {
    fn final_dir(&self, config: &StagerConfig) -> PathBuf {
        config.image_dir.clone()
    }

    fn install(&self, source: &Path, _: &Path, _: &SafeName) -> Result<(), InstallError> {
        Err(InstallError::SizeMismatch {
            path: source.to_path_buf(),
            expected: 1,
            actual: 0,
        })
    }
}

#[test]
fn policy_failure_resets_and_next_pass_keeps_the_download() {
    let (_tmp, cfg) = setup();
    let channels = cfg.channels();
    let sc = StorageConfig::new("https://h/os/rootfs.img", None);
    let mut items = vec![StorageItem::new(&sc, Some(cfg.image_dir.clone()))];

    // Pass 1: request the download; the downloader finishes.
    reconcile(&cfg, ObjectKind::BaseOs, std::slice::from_ref(&sc), &mut items);
    channels
        .downloader_status(ObjectKind::BaseOs)
        .publish(&dl_status(&sc.safename(), ObjectKind::BaseOs, State::Downloaded))
        .unwrap();
    reconcile(&cfg, ObjectKind::BaseOs, std::slice::from_ref(&sc), &mut items);
    assert_eq!(items[0].state, State::Downloaded);
    stage_pending(&cfg, ObjectKind::BaseOs, &sc, "image");

    let done = install_downloaded_objects_with(
        &FailingPolicy,
        &cfg.staging_root,
        ObjectKind::BaseOs,
        "u-1",
        &mut items,
    )
    .unwrap();
    assert!(!done);
    assert_eq!(items[0].state, State::Initial);
    assert!(items[0].error.as_deref().is_some_and(|e| !e.is_empty()));
    assert!(items[0].error_time.is_some());

    // Pass 2: the download reference for the same safe name is held.
    let ret = reconcile(&cfg, ObjectKind::BaseOs, std::slice::from_ref(&sc), &mut items);
    assert!(items[0].has_downloader_ref);
    assert_eq!(items[0].state, State::Downloaded);
    assert_eq!(ret.min_state, State::Downloaded);
    let req = requests::lookup_downloader_config(&channels, ObjectKind::BaseOs, &sc.safename())
        .unwrap()
        .expect("download request still published");
    assert_eq!(req.ref_count, 1);
}

// ---------------------------------------------------------------------------
// 4. Whole objects
// ---------------------------------------------------------------------------

#[test]
fn cert_object_runs_to_installed_and_tears_down() {
    let (_tmp, cfg) = setup();
    let channels = cfg.channels();
    let object = ObjectConfig {
        uuid: "c-1".to_string(),
        kind: ObjectKind::Cert,
        name: "root-ca".to_string(),
        storage: vec![StorageConfig::new("https://h/certs/root.pem", None)],
    };
    stager_core::registry::save_object(&cfg, &object).unwrap();
    let mgr = ObjectManager::new(cfg.clone());

    let status = mgr.apply_object(&object).unwrap();
    assert_eq!(status.state, State::DownloadStarted);

    let name = naming::safename("https://h/certs/root.pem", None);
    stage_pending(&cfg, ObjectKind::Cert, &object.storage[0], "PEM");
    let done = dl_status(&name, ObjectKind::Cert, State::Downloaded);
    channels.downloader_status(ObjectKind::Cert).publish(&done).unwrap();

    let applied = mgr.update_downloader_status(&done).unwrap();
    assert_eq!(applied.len(), 1);
    assert_eq!(applied[0].state, State::Installed);
    assert!(cfg.cert_dir.join("root.pem").exists());

    assert!(mgr.remove_object(ObjectKind::Cert, "c-1").unwrap());
    assert!(channels.downloader_config(ObjectKind::Cert).get_all().unwrap().is_empty());
}
