//! Container runtime collaborator.
//!
//! `DockerRuntime` drives the docker CLI through the [`Executor`], so the same
//! code path runs against a real daemon or the recording mock.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use fg_types::{ContainerRole, ContainerState, ErrorKind, FabricGridError, Result};
use tracing::{debug, info, warn};

use crate::context::OpContext;
use crate::executor::{Executor, ProcessStream};

/// Lines of history replayed before following a container's log.
pub const LOG_TAIL_LINES: u32 = 100;

/// Label carrying the owning network id.
pub const NETWORK_LABEL: &str = "fabricgrid.network";

/// A bind mount from the host into a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindMount {
    pub host_path: PathBuf,
    pub container_path: String,
    pub read_only: bool,
}

impl BindMount {
    pub fn to_docker_arg(&self) -> String {
        let mode = if self.read_only { "ro" } else { "rw" };
        format!(
            "{}:{}:{mode}",
            self.host_path.display(),
            self.container_path
        )
    }
}

/// Everything needed to `docker run` one node of a network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub role: ContainerRole,
    pub image: String,
    pub network: String,
    /// `(host, container)` port pairs.
    pub ports: Vec<(u16, u16)>,
    pub env: Vec<(String, String)>,
    pub mounts: Vec<BindMount>,
    /// `(volume name, container path)` pairs.
    pub volumes: Vec<(String, String)>,
    pub labels: Vec<(String, String)>,
    pub working_dir: Option<String>,
    pub command: Vec<String>,
}

impl ContainerSpec {
    pub fn new(
        name: impl Into<String>,
        role: ContainerRole,
        image: impl Into<String>,
        network: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            role,
            image: image.into(),
            network: network.into(),
            ports: Vec::new(),
            env: Vec::new(),
            mounts: Vec::new(),
            volumes: Vec::new(),
            labels: Vec::new(),
            working_dir: None,
            command: Vec::new(),
        }
    }

    /// Build docker run arguments (without the docker binary itself).
    pub fn to_run_args(&self) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            self.name.clone(),
            "--hostname".to_string(),
            self.name.clone(),
            "--network".to_string(),
            self.network.clone(),
        ];

        for (key, value) in &self.labels {
            args.push("--label".to_string());
            args.push(format!("{key}={value}"));
        }
        for (host, container) in &self.ports {
            args.push("-p".to_string());
            args.push(format!("{host}:{container}"));
        }
        for mount in &self.mounts {
            args.push("-v".to_string());
            args.push(mount.to_docker_arg());
        }
        for (volume, path) in &self.volumes {
            args.push("-v".to_string());
            args.push(format!("{volume}:{path}"));
        }
        for (key, value) in &self.env {
            args.push("-e".to_string());
            args.push(format!("{key}={value}"));
        }
        if let Some(dir) = &self.working_dir {
            args.push("-w".to_string());
            args.push(dir.clone());
        }

        args.push(self.image.clone());
        args.extend(self.command.iter().cloned());
        args
    }
}

/// Start/stop/status/log-follow for named containers.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Fails with `DockerUnavailable` when the runtime cannot be reached.
    async fn check_available(&self, ctx: &OpContext) -> Result<()>;

    async fn ensure_network(&self, ctx: &OpContext, name: &str) -> Result<()>;

    /// Missing networks are not an error.
    async fn remove_network(&self, ctx: &OpContext, name: &str) -> Result<()>;

    async fn start(&self, ctx: &OpContext, spec: &ContainerSpec) -> Result<()>;

    /// Force-remove a container. Missing containers are not an error.
    async fn stop(&self, ctx: &OpContext, name: &str) -> Result<()>;

    /// `NotFound` for containers the runtime does not know.
    async fn status(&self, ctx: &OpContext, name: &str) -> Result<ContainerState>;

    /// Follow a container's log until it exits or `ctx` is done.
    async fn logs(&self, ctx: &OpContext, name: &str) -> Result<ProcessStream>;

    async fn remove_volumes(&self, ctx: &OpContext, names: &[String]) -> Result<()>;
}

pub struct DockerRuntime {
    executor: Arc<dyn Executor>,
    docker_bin: String,
}

impl DockerRuntime {
    pub fn new(executor: Arc<dyn Executor>, docker_bin: impl Into<String>) -> Self {
        Self {
            executor,
            docker_bin: docker_bin.into(),
        }
    }

    async fn docker(&self, ctx: &OpContext, args: Vec<String>) -> Result<Vec<u8>> {
        self.executor.execute(ctx, &self.docker_bin, &args).await
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn check_available(&self, ctx: &OpContext) -> Result<()> {
        let args = strings(&["version", "--format", "{{.Server.Version}}"]);
        match self.docker(ctx, args).await {
            Ok(out) => {
                debug!(version = %String::from_utf8_lossy(&out).trim(), "Docker is available");
                Ok(())
            }
            Err(e) if matches!(e.kind(), ErrorKind::Cancelled | ErrorKind::Timeout) => Err(e),
            Err(e) => Err(FabricGridError::DockerUnavailable(e.to_string())),
        }
    }

    async fn ensure_network(&self, ctx: &OpContext, name: &str) -> Result<()> {
        let args = strings(&["network", "create", name]);
        match self.docker(ctx, args).await {
            Ok(_) => {
                info!(network = name, "Created docker network");
                Ok(())
            }
            Err(e) if output_contains(&e, "already exists") => Ok(()),
            Err(e) => Err(container_failure(name, e)),
        }
    }

    async fn remove_network(&self, ctx: &OpContext, name: &str) -> Result<()> {
        let args = strings(&["network", "rm", name]);
        match self.docker(ctx, args).await {
            Ok(_) => Ok(()),
            Err(e) if output_contains(&e, "not found") || output_contains(&e, "No such network") => {
                Ok(())
            }
            Err(e) => Err(container_failure(name, e)),
        }
    }

    async fn start(&self, ctx: &OpContext, spec: &ContainerSpec) -> Result<()> {
        debug!(container = %spec.name, role = %spec.role, image = %spec.image, "Starting container");
        self.docker(ctx, spec.to_run_args())
            .await
            .map_err(|e| container_failure(&spec.name, e))?;
        Ok(())
    }

    async fn stop(&self, ctx: &OpContext, name: &str) -> Result<()> {
        let args = strings(&["rm", "-f", name]);
        match self.docker(ctx, args).await {
            Ok(_) => Ok(()),
            Err(e) if output_contains(&e, "No such container") => {
                debug!(container = name, "Container already gone");
                Ok(())
            }
            Err(e) => {
                warn!(container = name, error = %e, "Container removal failed");
                Err(container_failure(name, e))
            }
        }
    }

    async fn status(&self, ctx: &OpContext, name: &str) -> Result<ContainerState> {
        let args = strings(&["inspect", "--format", "{{.State.Status}}", name]);
        match self.docker(ctx, args).await {
            Ok(out) => Ok(ContainerState::parse(&String::from_utf8_lossy(&out))),
            Err(e) if output_contains(&e, "No such object") || output_contains(&e, "No such container") => {
                Ok(ContainerState::NotFound)
            }
            Err(e) => Err(container_failure(name, e)),
        }
    }

    async fn logs(&self, ctx: &OpContext, name: &str) -> Result<ProcessStream> {
        let tail = LOG_TAIL_LINES.to_string();
        let args = strings(&["logs", "-f", "--tail", &tail, name]);
        self.executor
            .execute_stream(ctx, &self.docker_bin, &args)
            .await
            .map_err(|e| container_failure(name, e))
    }

    async fn remove_volumes(&self, ctx: &OpContext, names: &[String]) -> Result<()> {
        if names.is_empty() {
            return Ok(());
        }
        let mut args = strings(&["volume", "rm", "-f"]);
        args.extend(names.iter().cloned());
        self.docker(ctx, args)
            .await
            .map_err(|e| container_failure("volumes", e))?;
        Ok(())
    }
}

fn strings(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn output_contains(err: &FabricGridError, needle: &str) -> bool {
    match err.root() {
        FabricGridError::ProcessFailed { output, .. } => output.contains(needle),
        _ => false,
    }
}

/// Runtime failures become `ContainerFailed`; interruption and a missing
/// docker binary keep their own kind.
fn container_failure(container: &str, err: FabricGridError) -> FabricGridError {
    match err.kind() {
        ErrorKind::Cancelled | ErrorKind::Timeout | ErrorKind::BinaryMissing => err,
        _ => FabricGridError::ContainerFailed {
            container: container.to_string(),
            message: err.to_string(),
        },
    }
}
