use std::path::Path;
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::prelude::*;
use stager_core::{config, ObjectKind, StorageConfig};
use tempfile::TempDir;

const CERT_URL: &str = "https://cdn.example/certs/root.pem";

fn stager(home: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_stager"));
    cmd.env("HOME", home).env("USERPROFILE", home);
    cmd
}

fn write_cert_object(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("root-cert.yaml");
    std::fs::write(
        &path,
        format!("uuid: c-1\nkind: cert\nname: root\nstorage:\n  - download_url: {CERT_URL}\n"),
    )
    .expect("write object yaml");
    path
}

fn status_json(home: &Path) -> serde_json::Value {
    let output = stager(home)
        .args(["status", "--json"])
        .output()
        .expect("run status");
    assert!(output.status.success(), "status failed: {output:?}");
    serde_json::from_slice(&output.stdout).expect("status JSON")
}

#[test]
fn safename_prints_name_and_filename() {
    let home = TempDir::new().expect("home");
    stager(home.path())
        .args(["safename", "https://cdn.example/os/rootfs.img", "--sha256", "ab12"])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "safename: https:  cdn.example os rootfs.img.ab12",
        ))
        .stdout(predicate::str::contains("filename: rootfs.img"));
}

#[test]
fn apply_registers_and_requests_download() {
    let home = TempDir::new().expect("home");
    let file = write_cert_object(home.path());

    stager(home.path())
        .args(["object", "apply"])
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::contains("registered cert/c-1"))
        .stdout(predicate::str::contains("DOWNLOAD_STARTED"));

    stager(home.path())
        .args(["object", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("c-1"))
        .stdout(predicate::str::contains("root"));

    let status = status_json(home.path());
    assert_eq!(status["summary"]["objects"], 1);
    assert_eq!(status["objects"][0]["uuid"], "c-1");
    assert_eq!(status["objects"][0]["state"], "DOWNLOAD_STARTED");

    let cfg = config::load_at(home.path()).expect("config");
    let name = StorageConfig::new(CERT_URL, None).safename();
    let request = cfg
        .channels()
        .downloader_config(ObjectKind::Cert)
        .get(name.as_str())
        .expect("read downloader config")
        .expect("download requested");
    assert_eq!(request.ref_count, 1);
}

#[test]
fn remove_tears_down_requests_and_status() {
    let home = TempDir::new().expect("home");
    let file = write_cert_object(home.path());
    stager(home.path())
        .args(["object", "apply"])
        .arg(&file)
        .assert()
        .success();

    stager(home.path())
        .args(["object", "remove", "cert", "c-1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("cert/c-1 removed"));

    let cfg = config::load_at(home.path()).expect("config");
    let requests = cfg
        .channels()
        .downloader_config(ObjectKind::Cert)
        .get_all()
        .expect("list downloader configs");
    assert!(requests.is_empty(), "download request left behind: {requests:?}");
    assert_eq!(status_json(home.path())["summary"]["objects"], 0);
}

#[test]
fn reconcile_uuid_without_kind_is_rejected() {
    let home = TempDir::new().expect("home");
    stager(home.path())
        .args(["reconcile", "--uuid", "c-1"])
        .assert()
        .failure();
}

#[test]
fn reconcile_with_nothing_registered() {
    let home = TempDir::new().expect("home");
    stager(home.path())
        .arg("reconcile")
        .assert()
        .success()
        .stdout(predicate::str::contains("nothing to reconcile"));
}

#[test]
fn daemon_status_reports_not_running() {
    let home = TempDir::new().expect("home");
    let output = stager(home.path())
        .args(["daemon", "status"])
        .output()
        .expect("run daemon status");
    assert!(output.status.success());
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).expect("JSON");
    assert_eq!(value["running"], false);
}

#[test]
fn apply_rejects_invalid_yaml() {
    let home = TempDir::new().expect("home");
    let file = home.path().join("broken.yaml");
    std::fs::write(&file, "uuid: [unterminated\n").expect("write");

    stager(home.path())
        .args(["object", "apply"])
        .arg(&file)
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to parse object config"));
}

#[test]
fn unknown_kind_is_rejected() {
    let home = TempDir::new().expect("home");
    stager(home.path())
        .args(["object", "remove", "firmware", "x"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown object kind"));
}
