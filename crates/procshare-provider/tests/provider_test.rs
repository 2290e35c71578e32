//! Provider behavior against real process ids and two store handles.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use pretty_assertions::assert_eq;
use procshare_provider::provider::keys;
use procshare_provider::{
    LegacySources, PersistentDataProvider, ProcessProbe, ProcessRole, SystemProcessProbe,
};

#[test]
fn registry_forgets_exited_processes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let provider = PersistentDataProvider::open(dir.path()).expect("open");

    let mut child = std::process::Command::new(env!("CARGO_BIN_EXE_procshare"))
        .arg("--version")
        .stdout(std::process::Stdio::null())
        .spawn()
        .expect("spawn");
    let dead_pid = i32::try_from(child.id()).expect("pid");
    child.wait().expect("wait");

    provider
        .sharer()
        .put_int_array(keys::ALIVE_PID, &[dead_pid])
        .expect("seed registry");

    let role = provider
        .register_process(&SystemProcessProbe)
        .expect("register");
    assert_eq!(role, ProcessRole::First);
    assert_eq!(provider.alive_pids(), vec![SystemProcessProbe.current_pid()]);
}

#[test]
fn two_handles_share_identifiers_and_counters() {
    let dir = tempfile::tempdir().expect("tempdir");
    let a = PersistentDataProvider::open(dir.path()).expect("open a");
    let b = PersistentDataProvider::open(dir.path()).expect("open b");

    a.set_device_id("dev-a").expect("set device");
    a.set_login_user("user-1", "phone").expect("set user");
    assert_eq!(b.device_id(), "dev-a");
    assert_eq!(b.login_user_id(), "user-1");
    assert_eq!(b.login_user_key(), "phone");

    let first = a.get_and_increment("VISIT").expect("seq");
    let second = b.get_and_increment("VISIT").expect("seq");
    assert_eq!(second.global_id, first.global_id + 1);
    assert_eq!(second.event_type_id, first.event_type_id + 1);

    assert_eq!(a.add_activity().expect("add"), 0);
    assert_eq!(b.add_activity().expect("add"), 1);
    assert_eq!(a.activity_count(), 2);
}

#[test]
fn legacy_import_applies_once_across_handles() {
    let dir = tempfile::tempdir().expect("tempdir");
    let a = PersistentDataProvider::open(dir.path()).expect("open a");
    let b = PersistentDataProvider::open(dir.path()).expect("open b");

    let sources = LegacySources::in_dir(dir.path()).with_device_id("legacy");
    assert!(a.import_legacy(&sources).expect("import"));
    assert!(!b.import_legacy(&sources).expect("import again"));
    assert_eq!(b.device_id(), "legacy");
}
