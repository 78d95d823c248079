//! Runtime engine that orchestrates container lifecycle.
//!
//! The engine is a context object built once per CLI command. It holds the
//! configuration and reaches every registry (container records, networks,
//! cgroups, workspaces) through it.

use std::path::PathBuf;

use hutch_common::config::HutchConfig;
use hutch_common::constants::STOP_GRACE_PERIOD;
use hutch_common::error::{HutchError, Result};
use hutch_common::types::{ContainerId, ContainerStatus, ResourceConfig, validate_name};
use hutch_core::cgroup::{CgroupManager, Hierarchy};
use hutch_core::filesystem::layer::pack_layer;
use hutch_core::filesystem::mountinfo;
use hutch_core::filesystem::workspace::Workspace;
use hutch_net::controller::NetworkController;
use hutch_net::network::Network;

use crate::container::ContainerInfo;
use crate::process::{self, ContainerProcess, LaunchOptions, Stdio};
use crate::state::StateStore;
use crate::{exec, logs};

/// Everything `run` needs to start a container.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Return right after start and send output to the log file.
    pub detach: bool,
    /// Cgroup limits.
    pub resources: ResourceConfig,
    /// `hostPath:containerPath` volume.
    pub volume: Option<String>,
    /// Container name; defaults to the generated ID.
    pub name: Option<String>,
    /// Network to attach to.
    pub network: Option<String>,
    /// Published ports as `hostPort:containerPort`.
    pub port_mapping: Vec<String>,
    /// Extra `KEY=VALUE` environment variables.
    pub env: Vec<String>,
    /// Image name under the images directory.
    pub image: String,
    /// Command and arguments.
    pub command: Vec<String>,
}

/// Result of a successful `run`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The container keeps running in the background.
    Detached {
        /// Container ID.
        id: ContainerId,
        /// Container name.
        name: String,
        /// Host pid of the container init.
        pid: u32,
    },
    /// The attached container exited and was cleaned up.
    Exited {
        /// Container ID.
        id: ContainerId,
        /// Exit code of the container init.
        code: i32,
    },
}

/// The runtime engine that coordinates all container operations.
#[derive(Debug, Clone)]
pub struct Engine {
    config: HutchConfig,
    state: StateStore,
}

impl Engine {
    /// Creates an engine over the given configuration.
    #[must_use]
    pub fn new(config: HutchConfig) -> Self {
        Self {
            state: StateStore::new(&config),
            config,
        }
    }

    /// The configuration this engine works on.
    #[must_use]
    pub const fn config(&self) -> &HutchConfig {
        &self.config
    }

    fn hierarchy(&self) -> Hierarchy {
        Hierarchy::from_root(self.config.cgroup_root.as_deref())
    }

    fn workspace(&self, info: &ContainerInfo) -> Workspace {
        Workspace::new(&self.config, &info.name, &info.image, info.volume())
    }

    /// Creates and starts a container.
    ///
    /// In attached mode this blocks until the container exits and then
    /// removes everything it created, metadata included.
    ///
    /// # Errors
    ///
    /// Returns an error if the arguments are invalid, the name is taken, or
    /// workspace, launch, or network setup fails. Cgroup failures are only
    /// logged. Whatever was set up before a failure is rolled back.
    pub fn run(&self, options: RunOptions) -> Result<RunOutcome> {
        if options.command.is_empty() {
            return Err(HutchError::Config {
                message: "missing container command".into(),
            });
        }
        validate_name("image", &options.image)?;

        let id = ContainerId::generate();
        let name = options
            .name
            .clone()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| id.to_string());
        validate_name("container", &name)?;
        if self.state.exists(&name) {
            return Err(HutchError::AlreadyExists {
                kind: "container",
                id: name,
            });
        }
        let controller = match &options.network {
            Some(network) => {
                let controller = NetworkController::load(&self.config)?;
                let _ = controller.network(network)?;
                Some(controller)
            }
            None => None,
        };

        let workspace = Workspace::new(
            &self.config,
            &name,
            &options.image,
            options.volume.as_deref(),
        );
        if let Err(e) = workspace.build() {
            if let Err(cleanup) = workspace.teardown() {
                tracing::warn!(error = %cleanup, "failed to clean up partial workspace");
            }
            return Err(e);
        }
        let mut cgroup = CgroupManager::new(id.as_str(), self.hierarchy());

        let stdio = if options.detach {
            match logs::create_log(&self.config, &name) {
                Ok(file) => Stdio::Log(file),
                Err(e) => {
                    self.rollback(&name, &workspace, &cgroup, None);
                    return Err(e);
                }
            }
        } else {
            Stdio::Inherit
        };
        let mut child = match process::launch(LaunchOptions {
            mount_point: workspace.mount_point().to_path_buf(),
            stdio,
            env: options.env.clone(),
        }) {
            Ok(child) => child,
            Err(e) => {
                self.rollback(&name, &workspace, &cgroup, None);
                return Err(e);
            }
        };
        let pid = child.pid();

        let mut info = ContainerInfo::new(id.clone(), name.clone(), pid, &options.command);
        info.volume = options.volume.clone().unwrap_or_default();
        info.port_mapping.clone_from(&options.port_mapping);
        info.image.clone_from(&options.image);
        info.network.clone_from(&options.network);

        if let Err(e) = self.start(&info, &mut cgroup, &mut child, controller.as_ref(), &options) {
            tracing::error!(name = %name, error = %e, "container start failed, rolling back");
            if let (Some(controller), Some(network)) = (&controller, &options.network) {
                if let Err(e) = controller.disconnect(network, id.as_str()) {
                    tracing::warn!(error = %e, "failed to release network endpoint");
                }
            }
            self.rollback(&name, &workspace, &cgroup, Some(&mut child));
            return Err(e);
        }
        tracing::info!(id = %id, name = %name, pid, detach = options.detach, "container started");

        if options.detach {
            return Ok(RunOutcome::Detached { id, name, pid });
        }

        let waited = child.wait();
        match &waited {
            Ok(code) => tracing::info!(name = %name, code, "container exited"),
            Err(e) => tracing::error!(name = %name, error = %e, "lost track of container"),
        }
        let released = self.release(&info, &workspace, &cgroup, controller.as_ref());
        let code = waited?;
        released?;
        Ok(RunOutcome::Exited { id, code })
    }

    /// Frees everything an attached container held once it has exited.
    ///
    /// Every step runs even when an earlier one fails; the first workspace
    /// or record error is returned.
    fn release(
        &self,
        info: &ContainerInfo,
        workspace: &Workspace,
        cgroup: &CgroupManager,
        controller: Option<&NetworkController>,
    ) -> Result<()> {
        if let (Some(controller), Some(network)) = (controller, &info.network) {
            if let Err(e) = controller.disconnect(network, info.id.as_str()) {
                tracing::warn!(error = %e, "failed to detach network endpoint");
            }
        }
        let torn_down = workspace.teardown();
        if let Err(e) = &torn_down {
            tracing::warn!(name = %info.name, error = %e, "failed to tear down workspace");
        }
        cgroup.destroy();
        let removed = self.state.remove(&info.name);
        torn_down.and(removed)
    }

    /// Writes cgroup limits and moves `pid` into the cgroup. Failures are
    /// logged and skipped.
    fn limit(cgroup: &mut CgroupManager, resources: &ResourceConfig, pid: u32) {
        if let Err(e) = cgroup.set(resources) {
            tracing::warn!(error = %e, "resource limits partially applied");
        }
        if let Err(e) = cgroup.apply(pid) {
            tracing::warn!(pid, error = %e, "process could not join every cgroup");
        }
    }

    /// Persists the record, applies limits, attaches the network, and
    /// releases the init with the user command.
    fn start(
        &self,
        info: &ContainerInfo,
        cgroup: &mut CgroupManager,
        child: &mut ContainerProcess,
        controller: Option<&NetworkController>,
        options: &RunOptions,
    ) -> Result<()> {
        let pid = child.pid();
        self.state.save(info)?;
        Self::limit(cgroup, &options.resources, pid);
        if let (Some(controller), Some(network)) = (controller, &options.network) {
            let _ = controller.connect(network, info.id.as_str(), pid, &options.port_mapping)?;
        }
        child.send_command(&options.command)
    }

    /// Undoes a partially started container.
    fn rollback(
        &self,
        name: &str,
        workspace: &Workspace,
        cgroup: &CgroupManager,
        child: Option<&mut ContainerProcess>,
    ) {
        if let Some(child) = child {
            child.kill();
        }
        cgroup.destroy();
        if let Err(e) = workspace.teardown() {
            tracing::warn!(name, error = %e, "failed to tear down workspace");
        }
        if let Err(e) = self.state.remove(name) {
            tracing::warn!(name, error = %e, "failed to remove container record");
        }
        tracing::debug!(name, "rollback complete");
    }

    /// Lists every container, marking running records whose process has
    /// died as exited.
    ///
    /// # Errors
    ///
    /// Returns an error if the containers directory cannot be read.
    pub fn list(&self) -> Result<Vec<ContainerInfo>> {
        let mut containers = self.state.list()?;
        for info in &mut containers {
            if info.status != ContainerStatus::Running {
                continue;
            }
            if info.pid.is_some_and(process::is_alive) {
                continue;
            }
            info.finish(ContainerStatus::Exited);
            if let Err(e) = self.state.save(info) {
                tracing::warn!(name = %info.name, error = %e, "failed to refresh container record");
            }
        }
        Ok(containers)
    }

    /// Returns the output captured for a detached container.
    ///
    /// # Errors
    ///
    /// Returns an error if the container does not exist or its log cannot
    /// be read.
    pub fn logs(&self, name: &str) -> Result<String> {
        let _ = self.state.load(name)?;
        logs::read_logs(&self.config, name)
    }

    /// Runs `command` inside a running container and returns its exit code.
    ///
    /// # Errors
    ///
    /// Returns an error if the container does not exist or is not running,
    /// or the helper cannot be spawned.
    pub fn exec(&self, name: &str, command: &[String]) -> Result<i32> {
        let info = self.state.load(name)?;
        let pid = running_pid(&info)?;
        exec::exec_in_container(pid, command)
    }

    /// Stops a running container and records it as stopped.
    ///
    /// # Errors
    ///
    /// Returns an error if the container does not exist, is not running, or
    /// cannot be terminated.
    pub fn stop(&self, name: &str) -> Result<()> {
        let mut info = self.state.load(name)?;
        let pid = running_pid(&info)?;
        process::terminate(pid, STOP_GRACE_PERIOD)?;
        info.finish(ContainerStatus::Stopped);
        self.state.save(&info)?;
        tracing::info!(name, pid, "container stopped");
        Ok(())
    }

    /// Removes a stopped or exited container with its endpoint, workspace,
    /// cgroups, and metadata.
    ///
    /// # Errors
    ///
    /// Returns an error if the container does not exist, is still running,
    /// or its workspace cannot be torn down. The record is kept on failure.
    pub fn remove(&self, name: &str) -> Result<()> {
        let info = self.state.load(name)?;
        if !info.status.is_terminal() && info.pid.is_some_and(process::is_alive) {
            return Err(HutchError::InvalidState {
                message: format!("cannot remove running container {name}, stop it first"),
            });
        }

        if let Some(network) = &info.network {
            let detached = NetworkController::load(&self.config)
                .and_then(|controller| controller.disconnect(network, info.id.as_str()));
            if let Err(e) = detached {
                tracing::warn!(name, network = %network, error = %e, "failed to detach network endpoint");
            }
        }
        self.workspace(&info).teardown()?;
        CgroupManager::new(info.id.as_str(), self.hierarchy()).destroy();
        self.state.remove(name)?;
        tracing::info!(name, "container removed");
        Ok(())
    }

    /// Packs a container's root filesystem into image `image`.
    ///
    /// # Errors
    ///
    /// Returns an error if the container does not exist, its root
    /// filesystem is not mounted, or the archive cannot be written.
    pub fn commit(&self, name: &str, image: &str) -> Result<PathBuf> {
        validate_name("image", image)?;
        let info = self.state.load(name)?;
        let workspace = self.workspace(&info);
        let mount_point = workspace.mount_point();
        if !mountinfo::is_mounted(mount_point)? {
            return Err(HutchError::InvalidState {
                message: format!("root filesystem of {name} is not mounted"),
            });
        }
        let archive = self.config.image_archive(image);
        pack_layer(mount_point, &archive)?;
        tracing::info!(name, image, archive = %archive.display(), "container committed");
        Ok(archive)
    }

    /// Creates a network.
    ///
    /// # Errors
    ///
    /// See [`NetworkController::create_network`].
    pub fn create_network(&self, driver: &str, subnet: &str, name: &str) -> Result<Network> {
        NetworkController::load(&self.config)?.create_network(driver, subnet, name)
    }

    /// Lists every network, ordered by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the network registry cannot be read.
    pub fn list_networks(&self) -> Result<Vec<Network>> {
        let controller = NetworkController::load(&self.config)?;
        Ok(controller.list_networks().into_iter().cloned().collect())
    }

    /// Removes a network.
    ///
    /// # Errors
    ///
    /// See [`NetworkController::remove_network`].
    pub fn remove_network(&self, name: &str) -> Result<()> {
        NetworkController::load(&self.config)?.remove_network(name)
    }
}

fn running_pid(info: &ContainerInfo) -> Result<u32> {
    match (info.status, info.pid) {
        (ContainerStatus::Running, Some(pid)) => Ok(pid),
        _ => Err(HutchError::InvalidState {
            message: format!("container {} is not running", info.name),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    fn scratch() -> (tempfile::TempDir, Engine) {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = HutchConfig::with_root(dir.path()).with_cgroup_root(dir.path().join("cgroup"));
        (dir, Engine::new(config))
    }

    /// A recorded container whose cgroups and workspace directories exist
    /// but whose root was never mounted.
    fn half_started(engine: &Engine, volume: &str) -> (ContainerInfo, Workspace, CgroupManager) {
        let mut info = ContainerInfo::new(ContainerId::new("abc123"), "web".into(), 1, &["sh".into()]);
        info.image = "busybox".into();
        info.volume = volume.into();
        engine.state.save(&info).expect("save");

        let config = engine.config();
        for dir in [config.write_layer("web"), config.work_dir("web"), config.mount_point("web")] {
            std::fs::create_dir_all(dir).unwrap();
        }
        let mut cgroup = CgroupManager::new("abc123", engine.hierarchy());
        cgroup.set(&ResourceConfig::default()).expect("cgroup dirs");
        (info.clone(), engine.workspace(&info), cgroup)
    }

    fn assert_cleaned_up(root: &Path, engine: &Engine) {
        let config = engine.config();
        assert!(!config.container_dir("web").exists());
        assert!(!config.write_layer("web").exists());
        assert!(!config.work_dir("web").exists());
        assert!(!config.mount_point("web").exists());
        for subsystem in ["cpu", "cpuset", "memory"] {
            assert!(!root.join("cgroup").join(subsystem).join("abc123").exists());
        }
    }

    #[test]
    fn rollback_removes_record_cgroups_and_workspace() {
        let (dir, engine) = scratch();
        let (_info, workspace, cgroup) = half_started(&engine, "");
        assert!(dir.path().join("cgroup/memory/abc123").is_dir());

        engine.rollback("web", &workspace, &cgroup, None);

        assert_cleaned_up(dir.path(), &engine);
    }

    #[test]
    fn rollback_continues_past_a_failing_teardown_step() {
        let (dir, engine) = scratch();
        let (_info, workspace, cgroup) = half_started(&engine, "/data:/../etc");

        engine.rollback("web", &workspace, &cgroup, None);

        assert_cleaned_up(dir.path(), &engine);
    }

    #[test]
    fn release_cleans_up_and_reports_the_teardown_failure() {
        let (dir, engine) = scratch();
        let (info, workspace, cgroup) = half_started(&engine, "/data:/../etc");

        let err = engine
            .release(&info, &workspace, &cgroup, None)
            .expect_err("escaping volume");

        assert!(matches!(err, HutchError::Config { .. }));
        assert_cleaned_up(dir.path(), &engine);
        assert!(engine.list().unwrap().is_empty());
    }

    #[test]
    fn release_of_attached_container_removes_everything() {
        let (dir, engine) = scratch();
        let (info, workspace, cgroup) = half_started(&engine, "");

        engine.release(&info, &workspace, &cgroup, None).expect("release");

        assert_cleaned_up(dir.path(), &engine);
    }

    #[test]
    fn running_pid_requires_running_status() {
        let mut info = ContainerInfo::new(ContainerId::new("abc"), "web".into(), 7, &["sh".into()]);
        assert_eq!(running_pid(&info).unwrap(), 7);
        info.finish(ContainerStatus::Stopped);
        assert!(running_pid(&info).is_err());
    }

    #[test]
    fn run_requires_a_command() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = Engine::new(HutchConfig::with_root(dir.path()));
        let err = engine
            .run(RunOptions {
                image: "busybox".into(),
                ..RunOptions::default()
            })
            .expect_err("no command");
        assert!(err.to_string().contains("command"));
    }
}
