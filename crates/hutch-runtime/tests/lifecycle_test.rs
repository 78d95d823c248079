//! Lifecycle integration tests for the hutch engine.
//!
//! Containers here are stand-in host processes (`sleep`) recorded in a
//! scratch state directory, so the stop/rm/ps/logs paths run without root,
//! images, or namespaces.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::path::Path;
use std::process::{Child, Command};

use hutch_common::config::HutchConfig;
use hutch_common::error::HutchError;
use hutch_common::types::{ContainerId, ContainerStatus};
use hutch_runtime::container::ContainerInfo;
use hutch_runtime::engine::{Engine, RunOptions};
use hutch_runtime::state::StateStore;

struct Fixture {
    _dir: tempfile::TempDir,
    config: HutchConfig,
    engine: Engine,
    children: Vec<Child>,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = HutchConfig::with_root(dir.path()).with_cgroup_root(dir.path().join("cgroup"));
        Self {
            engine: Engine::new(config.clone()),
            config,
            _dir: dir,
            children: Vec::new(),
        }
    }

    fn store(&self) -> StateStore {
        StateStore::new(&self.config)
    }

    /// Records a running container backed by a real `sleep` process.
    fn running(&mut self, name: &str) -> u32 {
        let child = Command::new("sleep").arg("60").spawn().expect("spawn sleep");
        let pid = child.id();
        self.children.push(child);
        let mut info = ContainerInfo::new(ContainerId::generate(), name.into(), pid, &["sleep".into(), "60".into()]);
        info.image = "busybox".into();
        self.store().save(&info).expect("save");
        pid
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        for child in &mut self.children {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

#[test]
fn stop_transitions_running_to_stopped_and_clears_pid() {
    let mut fx = Fixture::new();
    let _pid = fx.running("web");

    fx.engine.stop("web").expect("stop");

    let info = fx.store().load("web").unwrap();
    assert_eq!(info.status, ContainerStatus::Stopped);
    assert!(info.pid.is_none());
}

#[test]
fn stop_of_stopped_container_is_rejected() {
    let mut fx = Fixture::new();
    let _pid = fx.running("web");
    fx.engine.stop("web").unwrap();

    let err = fx.engine.stop("web").expect_err("already stopped");
    assert!(matches!(err, HutchError::InvalidState { .. }));
}

#[test]
fn rm_on_running_container_fails_and_keeps_metadata() {
    let mut fx = Fixture::new();
    let _pid = fx.running("web");

    let err = fx.engine.remove("web").expect_err("running");
    assert!(err.to_string().contains("running"));
    assert!(fx.config.container_config("web").exists());
}

#[test]
fn rm_on_stopped_container_deletes_metadata_dir() {
    let mut fx = Fixture::new();
    let _pid = fx.running("web");
    fx.engine.stop("web").unwrap();

    fx.engine.remove("web").expect("rm");

    assert!(!fx.config.container_dir("web").exists());
    assert!(fx.engine.list().unwrap().is_empty());
}

#[test]
fn ps_marks_dead_containers_exited() {
    let mut fx = Fixture::new();
    let pid = fx.running("web");
    let _alive = fx.running("db");

    let child = fx.children.iter_mut().find(|c| c.id() == pid).unwrap();
    child.kill().unwrap();
    let _ = child.wait().unwrap();

    let list = fx.engine.list().expect("ps");
    let web = list.iter().find(|c| c.name == "web").unwrap();
    let db = list.iter().find(|c| c.name == "db").unwrap();
    assert_eq!(web.status, ContainerStatus::Exited);
    assert!(web.pid.is_none());
    assert_eq!(db.status, ContainerStatus::Running);

    let persisted = fx.store().load("web").unwrap();
    assert_eq!(persisted.status, ContainerStatus::Exited);
}

#[test]
fn exited_container_can_be_removed() {
    let mut fx = Fixture::new();
    let pid = fx.running("job");
    let child = fx.children.iter_mut().find(|c| c.id() == pid).unwrap();
    child.kill().unwrap();
    let _ = child.wait().unwrap();

    fx.engine.remove("job").expect("rm exited");
    assert!(!fx.config.container_dir("job").exists());
}

#[test]
fn run_rejects_a_taken_name() {
    let mut fx = Fixture::new();
    let _pid = fx.running("web");

    let err = fx
        .engine
        .run(RunOptions {
            detach: true,
            name: Some("web".into()),
            image: "busybox".into(),
            command: vec!["top".into()],
            ..RunOptions::default()
        })
        .expect_err("duplicate name");
    assert!(matches!(err, HutchError::AlreadyExists { .. }));
}

#[test]
fn run_on_unknown_network_fails_before_launch() {
    let fx = Fixture::new();
    let err = fx
        .engine
        .run(RunOptions {
            detach: true,
            name: Some("web".into()),
            network: Some("ghost".into()),
            image: "busybox".into(),
            command: vec!["top".into()],
            ..RunOptions::default()
        })
        .expect_err("unknown network");
    assert_eq!(err.to_string(), "no such network: ghost");
    assert!(!fx.config.container_dir("web").exists());
    assert!(!fx.config.mount_point("web").exists());
}

#[test]
fn logs_read_the_detached_log_file() {
    let mut fx = Fixture::new();
    let _pid = fx.running("web");
    std::fs::write(fx.config.container_log("web"), "hello\n").unwrap();

    assert_eq!(fx.engine.logs("web").unwrap(), "hello\n");
    assert!(matches!(
        fx.engine.logs("ghost").expect_err("missing"),
        HutchError::NotFound { .. }
    ));
}

#[test]
fn unknown_container_operations_report_no_such_container() {
    let fx = Fixture::new();
    for err in [
        fx.engine.stop("ghost").unwrap_err(),
        fx.engine.remove("ghost").unwrap_err(),
        fx.engine.exec("ghost", &["ls".into()]).unwrap_err(),
    ] {
        assert_eq!(err.to_string(), "no such container: ghost");
    }
}

#[test]
fn removing_unknown_network_reports_no_such_network() {
    let fx = Fixture::new();
    let err = fx.engine.remove_network("ghost").expect_err("unknown");
    assert_eq!(err.to_string(), "no such network: ghost");
    assert!(!fx.config.ipam_file().exists());
    assert!(fx.engine.list_networks().unwrap().is_empty());
}

#[test]
fn commit_requires_a_mounted_root() {
    let mut fx = Fixture::new();
    let _pid = fx.running("web");
    let err = fx.engine.commit("web", "snapshot").expect_err("not mounted");
    assert!(matches!(err, HutchError::InvalidState { .. }));
    assert!(!fx.config.image_archive("snapshot").exists());
}

fn write_image(config: &HutchConfig, image: &str) {
    let archive = config.image_archive(image);
    std::fs::create_dir_all(archive.parent().unwrap()).unwrap();
    let mut builder = tar::Builder::new(std::fs::File::create(&archive).unwrap());
    let data = b"#!/bin/sh\n";
    let mut header = tar::Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o755);
    header.set_cksum();
    builder.append_data(&mut header, "bin/sh", &data[..]).unwrap();
    builder.finish().unwrap();
}

fn has_entries(dir: &Path) -> bool {
    std::fs::read_dir(dir).is_ok_and(|mut entries| entries.next().is_some())
}

#[test]
fn run_rejects_path_like_names_and_leaves_the_image_store_alone() {
    let fx = Fixture::new();
    std::fs::create_dir_all(fx.config.image_layer("busybox").join("bin")).unwrap();
    std::fs::write(fx.config.image_archive("other"), "archive").unwrap();

    for name in ["..", "../..", "a/b", "."] {
        let err = fx
            .engine
            .run(RunOptions {
                detach: true,
                name: Some(name.into()),
                image: "busybox".into(),
                command: vec!["top".into()],
                ..RunOptions::default()
            })
            .expect_err("path-like name");
        assert!(matches!(err, HutchError::Config { .. }), "{name}: {err}");
    }

    assert!(fx.config.image_layer("busybox").join("bin").is_dir());
    assert!(fx.config.image_archive("other").exists());
    assert!(!has_entries(&fx.config.containers_dir()));
}

#[test]
fn run_and_commit_reject_path_like_image_names() {
    let mut fx = Fixture::new();
    let err = fx
        .engine
        .run(RunOptions {
            detach: true,
            name: Some("web".into()),
            image: "../lib".into(),
            command: vec!["top".into()],
            ..RunOptions::default()
        })
        .expect_err("path-like image");
    assert!(matches!(err, HutchError::Config { .. }));

    let _pid = fx.running("db");
    let err = fx.engine.commit("db", "..").expect_err("path-like image");
    assert!(matches!(err, HutchError::Config { .. }));
}

#[test]
fn container_commands_reject_path_like_names() {
    let fx = Fixture::new();
    for err in [
        fx.engine.stop("..").unwrap_err(),
        fx.engine.remove("../..").unwrap_err(),
        fx.engine.logs("a/b").unwrap_err(),
    ] {
        assert!(matches!(err, HutchError::Config { .. }), "{err}");
    }
}

#[test]
fn failed_detached_run_rolls_back_workspace_cgroups_and_record() {
    let fx = Fixture::new();
    write_image(&fx.config, "busybox");
    // A stale file where the write layer goes, and a file where the
    // container's state directory goes so its log cannot be created.
    std::fs::create_dir_all(fx.config.write_layer("web").parent().unwrap()).unwrap();
    std::fs::write(fx.config.write_layer("web"), "stale").unwrap();
    std::fs::create_dir_all(fx.config.containers_dir()).unwrap();
    std::fs::write(fx.config.container_dir("web"), "not a directory").unwrap();

    let result = fx.engine.run(RunOptions {
        detach: true,
        name: Some("web".into()),
        image: "busybox".into(),
        command: vec!["top".into()],
        ..RunOptions::default()
    });

    assert!(result.is_err());
    assert!(!fx.config.write_layer("web").exists());
    assert!(!fx.config.work_dir("web").exists());
    assert!(!fx.config.mount_point("web").exists());
    assert!(!fx.config.container_config("web").exists());
    for subsystem in ["cpu", "cpuset", "memory"] {
        assert!(!has_entries(&fx.config.cgroup_root.clone().unwrap().join(subsystem)));
    }
    assert!(fx.config.image_archive("busybox").exists());
    assert!(fx.config.image_layer("busybox").join("bin/sh").exists());
}
