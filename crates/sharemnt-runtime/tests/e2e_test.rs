//! End-to-end integration tests for share-mnt.
//!
//! These tests drive both stages without privileges:
//! 1. Locate a container state from a fake state root
//! 2. Build the stage 1 helper command line
//! 3. Assemble a nested container with recorded share marking
//! 4. Run it through a fake engine that spawns host processes
//! 5. Verify teardown happens exactly once on every path

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::cell::RefCell;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use sharemnt_common::config::IdentityStrategy;
use sharemnt_common::error::{Result, ShareMntError};
use sharemnt_common::state::{ContainerConfig, ContainerState};
use sharemnt_common::types::{ContainerId, IdGenerator};
use sharemnt_core::filesystem::mount::SharedMarker;
use sharemnt_core::locator::Locator;
use sharemnt_runtime::backend::{Container, ContainerFactory};
use sharemnt_runtime::launcher::entry_args;
use sharemnt_runtime::nested::{self, NestedContainer, shared_bind};
use sharemnt_runtime::process::Process;
use sharemnt_runtime::runner::{Runner, TerminalMode};

const STATE: &str = r#"{
    "init_process_pid": 4242,
    "config": {
        "rootfs": "/hostfs",
        "devices": [
            {"type": 99, "path": "/dev/null", "major": 1, "minor": 3, "file_mode": 438, "uid": 0, "gid": 0}
        ],
        "mounts": [
            {"source": "proc", "destination": "/proc", "device": "proc", "flags": 14, "propagation_flags": null, "data": ""},
            {"source": "tmpfs", "destination": "/dev", "device": "tmpfs", "flags": 16777218, "data": "mode=755"}
        ],
        "capabilities": ["CAP_CHOWN", "CAP_NET_BIND_SERVICE"]
    }
}"#;

fn state_root(dir: &Path, entry: &str) -> PathBuf {
    let root = dir.join("runc");
    fs::create_dir_all(root.join(entry)).unwrap();
    fs::write(root.join(entry).join("state.json"), STATE).unwrap();
    root
}

fn cgroup_file(dir: &Path, id: &str) -> PathBuf {
    let path = dir.join("cgroup");
    fs::write(
        &path,
        format!("5:cpu:/docker/{id}\n4:devices:/docker/{id}\n1:name=systemd:/docker/{id}\n"),
    )
    .unwrap();
    path
}

#[derive(Default)]
struct RecordingMarker {
    marked: RefCell<Vec<PathBuf>>,
}

impl SharedMarker for RecordingMarker {
    fn make_shared(&self, path: &Path) -> Result<()> {
        self.marked.borrow_mut().push(path.to_path_buf());
        Ok(())
    }
}

// ── Locate and assemble ──────────────────────────────────────────────

#[test]
fn pipeline_stage2_shares_paths_and_keeps_command() {
    let dir = tempfile::tempdir().unwrap();
    let id = "3f4e5d6c7b8a";
    let roots = vec![
        dir.path().join("missing-root"),
        state_root(dir.path(), &format!("{id}0123456789abcdef")),
    ];
    let locator = Locator::new(IdentityStrategy::Cgroup)
        .unwrap()
        .with_cgroup_file(cgroup_file(dir.path(), id));
    let base = locator.locate(&roots).expect("state should be located");
    assert_eq!(base.init_process_pid, 4242);
    assert_eq!(base.config.rootfs, PathBuf::from("/hostfs"));

    let data = dir.path().join("data");
    let sockets = dir.path().join("sockets");
    let marker = RecordingMarker::default();
    let nested = nested::assemble(
        &base,
        &[data.clone(), sockets.clone()],
        vec!["echo".into(), "hi".into()],
        &marker,
        &mut IdGenerator::with_seed(42),
    )
    .expect("assembly should succeed");

    let mut expected = base.config.mounts.clone();
    expected.push(shared_bind(&data));
    expected.push(shared_bind(&sockets));
    assert_eq!(nested.config.mounts, expected);
    assert_eq!(nested.config.devices, base.config.devices);
    assert_eq!(nested.config.rootfs, PathBuf::from("/hostfs"));
    assert_eq!(nested.args, vec!["echo", "hi"]);
    assert!(data.is_dir());
    assert!(sockets.is_dir());
    assert_eq!(*marker.marked.borrow(), vec![data, sockets]);

    let id = nested.id.as_str();
    assert_eq!(id.len(), 12);
    assert!(id.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
}

#[test]
fn pipeline_unknown_container_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let roots = vec![state_root(dir.path(), "ffffffffffff")];
    let locator = Locator::new(IdentityStrategy::Cgroup)
        .unwrap()
        .with_cgroup_file(cgroup_file(dir.path(), "000000000000"));
    assert!(matches!(
        locator.locate(&roots),
        Err(ShareMntError::NotFound { .. })
    ));
}

#[test]
fn pipeline_stage1_forwards_original_arguments() {
    let dir = tempfile::tempdir().unwrap();
    let root = state_root(dir.path(), "abc");
    let base = sharemnt_core::locator::find_state("abc", &[root]).unwrap();

    let original = ["/data", "/sockets", "--", "echo", "hi"].map(OsString::from);
    let args = entry_args(
        Path::new("/proc/999/ns/mnt"),
        base.config.rootfs(),
        Path::new("/usr/bin/share-mnt"),
        original.clone(),
    );
    assert_eq!(args[0], OsString::from("--mount=/proc/999/ns/mnt"));
    assert_eq!(args[3], OsString::from("/hostfs/usr/bin/share-mnt"));
    assert_eq!(args[4], OsString::from("--stage2"));
    assert_eq!(&args[5..], &original);
}

// ── Lifecycle ────────────────────────────────────────────────────────

#[derive(Clone, Copy, PartialEq, Eq)]
enum StartBehavior {
    Spawn,
    Fail,
    SkipSpawn,
}

#[derive(Clone)]
struct FakeFactory {
    events: Rc<RefCell<Vec<String>>>,
    start: StartBehavior,
}

impl FakeFactory {
    fn new(start: StartBehavior) -> Self {
        Self {
            events: Rc::default(),
            start,
        }
    }

    fn events(&self) -> Vec<String> {
        self.events.borrow().clone()
    }
}

impl ContainerFactory for FakeFactory {
    fn create(&self, id: &ContainerId, _config: &ContainerConfig) -> Result<Box<dyn Container>> {
        self.events.borrow_mut().push("create".into());
        Ok(Box::new(FakeContainer {
            id: id.clone(),
            events: Rc::clone(&self.events),
            start: self.start,
        }))
    }
}

struct FakeContainer {
    id: ContainerId,
    events: Rc<RefCell<Vec<String>>>,
    start: StartBehavior,
}

impl Container for FakeContainer {
    fn id(&self) -> &ContainerId {
        &self.id
    }

    fn start(&mut self, process: &mut Process) -> Result<()> {
        self.events.borrow_mut().push("start".into());
        match self.start {
            StartBehavior::Spawn => {
                let mut cmd = process.command(&["/bin/sh".to_string()])?;
                let child = cmd.spawn().map_err(|e| ShareMntError::io("/bin/sh", e))?;
                process.attach(child);
                Ok(())
            }
            StartBehavior::Fail => Err(ShareMntError::ConfigValidation {
                message: "refused".into(),
            }),
            StartBehavior::SkipSpawn => Ok(()),
        }
    }

    fn destroy(&mut self) -> Result<()> {
        self.events.borrow_mut().push("destroy".into());
        Ok(())
    }
}

fn nested_with(rootfs: &Path, args: &[&str]) -> NestedContainer {
    NestedContainer {
        id: IdGenerator::with_seed(3).generate(),
        config: ContainerConfig {
            rootfs: rootfs.to_path_buf(),
            ..ContainerConfig::default()
        },
        args: args.iter().map(ToString::to_string).collect(),
    }
}

#[test]
fn pipeline_run_returns_exit_code_and_destroys_once() {
    let dir = tempfile::tempdir().unwrap();
    let factory = FakeFactory::new(StartBehavior::Spawn);
    let runner = Runner::new(factory.clone()).with_terminal(TerminalMode::Never);

    let code = runner
        .run(nested_with(dir.path(), &["sh", "-c", "exit 5"]))
        .expect("run should succeed");
    assert_eq!(code, 5);
    assert_eq!(factory.events(), vec!["create", "start", "destroy"]);
}

#[test]
fn pipeline_environment_reaches_the_process() {
    let dir = tempfile::tempdir().unwrap();
    let factory = FakeFactory::new(StartBehavior::Spawn);
    let runner = Runner::new(factory).with_terminal(TerminalMode::Never);

    let path = std::env::var("PATH").unwrap_or_default();
    let script = format!("test \"$PATH\" = '{path}'");
    let code = runner
        .run(nested_with(dir.path(), &["sh", "-c", &script]))
        .unwrap();
    assert_eq!(code, 0);
}

#[test]
fn pipeline_start_failure_still_destroys() {
    let dir = tempfile::tempdir().unwrap();
    let factory = FakeFactory::new(StartBehavior::Fail);
    let runner = Runner::new(factory.clone()).with_terminal(TerminalMode::Never);

    let err = runner.run(nested_with(dir.path(), &["true"])).unwrap_err();
    assert!(matches!(err, ShareMntError::EngineStart { .. }));
    assert!(err.is_reported());
    assert_eq!(factory.events(), vec!["create", "start", "destroy"]);
}

#[test]
fn pipeline_failure_after_start_still_destroys() {
    let dir = tempfile::tempdir().unwrap();
    let factory = FakeFactory::new(StartBehavior::SkipSpawn);
    let runner = Runner::new(factory.clone()).with_terminal(TerminalMode::Never);

    let err = runner.run(nested_with(dir.path(), &["true"])).unwrap_err();
    assert!(matches!(err, ShareMntError::Relay { .. }));
    assert_eq!(factory.events(), vec!["create", "start", "destroy"]);
}

#[test]
fn pipeline_missing_rootfs_creates_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let factory = FakeFactory::new(StartBehavior::Spawn);
    let runner = Runner::new(factory.clone()).with_terminal(TerminalMode::Never);

    let err = runner
        .run(nested_with(&dir.path().join("absent"), &["true"]))
        .unwrap_err();
    assert!(matches!(err, ShareMntError::ConfigValidation { .. }));
    assert!(factory.events().is_empty());
}

#[test]
fn pipeline_base_state_parses_runc_layout() {
    let state: ContainerState = serde_json::from_str(STATE).unwrap();
    assert_eq!(state.config.mounts.len(), 2);
    assert!(state.config.mounts[0].propagation_flags.is_empty());
    assert_eq!(
        state.config.capability_names(),
        ["CAP_CHOWN", "CAP_NET_BIND_SERVICE"]
    );
}
