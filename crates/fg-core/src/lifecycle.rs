//! Network lifecycle manager.
//!
//! Stateless with respect to any one network: every operation receives the
//! topology it acts on and keeps nothing after returning. State tracking lives
//! with the service registry.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use fg_config::Config;
use fg_types::rpc::NodeStatus;
use fg_types::{
    ContainerRole, ContainerState, ErrorKind, FabricGridError, Network, NetworkConfig, Result,
};
use tracing::{debug, info, warn};

use crate::artifacts::{channel_artifacts_dir, organizations_dir, ArtifactGenerator};
use crate::command::{
    channel_block_path, orderer_tls_dir, ControlCommand, CHANNEL_ARTIFACTS_ROOT, FABRIC_CFG_PATH,
    ORGANIZATIONS_ROOT,
};
use crate::context::OpContext;
use crate::executor::{Executor, ProcessStream};
use crate::runtime::{BindMount, ContainerRuntime, ContainerSpec, NETWORK_LABEL};
use crate::topology::{self, TopologyDefaults};

/// MSP id of the ordering organization written by the artifact generator.
pub const ORDERER_MSP_ID: &str = "OrdererMSP";

const DOCKER_SOCKET: &str = "/var/run/docker.sock";
const CLI_WORKDIR: &str = "/opt/fabricgrid";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSet {
    pub peer: String,
    pub orderer: String,
    pub tools: String,
}

/// Knobs the lifecycle manager needs from the service configuration.
#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    pub docker_bin: String,
    pub networks_dir: PathBuf,
    pub images: ImageSet,
    pub defaults: TopologyDefaults,
    pub ready_poll_interval: Duration,
    /// Bound for each container start and channel join.
    pub command_timeout: Duration,
    /// Bound for teardown work that must run even when the caller gave up.
    pub cleanup_timeout: Duration,
}

impl LifecycleSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            docker_bin: config.docker_bin.clone(),
            networks_dir: config.networks_dir(),
            images: ImageSet {
                peer: config.peer_image.clone(),
                orderer: config.orderer_image.clone(),
                tools: config.tools_image.clone(),
            },
            defaults: TopologyDefaults::from_config(config),
            ready_poll_interval: config.ready_poll_interval(),
            command_timeout: config.command_timeout(),
            cleanup_timeout: config.command_timeout(),
        }
    }
}

/// Summary of a network's containers.
#[derive(Debug, Clone)]
pub struct NetworkStatus {
    /// True only if every expected container is running.
    pub running: bool,
    pub status_text: String,
    pub nodes: Vec<NodeStatus>,
}

pub struct LifecycleManager {
    runtime: Arc<dyn ContainerRuntime>,
    artifacts: Arc<dyn ArtifactGenerator>,
    executor: Arc<dyn Executor>,
    settings: LifecycleSettings,
}

impl LifecycleManager {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        artifacts: Arc<dyn ArtifactGenerator>,
        executor: Arc<dyn Executor>,
        settings: LifecycleSettings,
    ) -> Self {
        Self {
            runtime,
            artifacts,
            executor,
            settings,
        }
    }

    pub fn settings(&self) -> &LifecycleSettings {
        &self.settings
    }

    /// Validate, synthesize the topology and generate its artifacts.
    pub async fn bootstrap(&self, ctx: &OpContext, config: &NetworkConfig) -> Result<Network> {
        topology::validate_config(config)?;
        ctx.check("bootstrap")?;

        let id = uuid::Uuid::new_v4().to_string();
        let dir = self.settings.networks_dir.join(&id);
        let network = topology::synthesize(&id, config, &self.settings.defaults, dir)?;

        info!(
            network = %network.id,
            name = %network.name,
            orgs = network.organizations.len(),
            channel = %network.channel.name,
            "Bootstrapping network"
        );

        if let Err(e) = self.artifacts.generate(ctx, &network).await {
            if let Err(cleanup) = self.artifacts.remove(&network).await {
                warn!(network = %network.id, error = %cleanup, "Failed to remove partial artifacts");
            }
            return Err(e);
        }
        Ok(network)
    }

    /// Bring up orderers, peers and the control container, in that order.
    ///
    /// On any failure everything already started is removed before the error
    /// is returned.
    pub async fn start_network(&self, ctx: &OpContext, network: &Network) -> Result<()> {
        ctx.check("start_network")?;
        self.runtime
            .ensure_network(&self.step(ctx), &network.docker_network)
            .await?;

        let mut started: Vec<String> = Vec::new();
        for spec in self.container_specs(network) {
            if let Err(e) = self.runtime.start(&self.step(ctx), &spec).await {
                warn!(
                    network = %network.id,
                    container = %spec.name,
                    error = %e,
                    started = started.len(),
                    "Container start failed, rolling back"
                );
                // the failed container may exist in created state
                started.push(spec.name.clone());
                self.rollback(network, &started).await;
                return Err(e);
            }
            started.push(spec.name);
        }

        info!(network = %network.id, containers = started.len(), "Network containers started");
        Ok(())
    }

    fn step(&self, ctx: &OpContext) -> OpContext {
        ctx.with_timeout(self.settings.command_timeout)
    }

    async fn rollback(&self, network: &Network, started: &[String]) {
        let ctx = OpContext::background().with_timeout(self.settings.cleanup_timeout);
        for name in started.iter().rev() {
            if let Err(e) = self.runtime.stop(&ctx, name).await {
                warn!(network = %network.id, container = %name, error = %e, "Rollback stop failed");
            }
        }
    }

    /// Poll container state until every container runs, or `ctx` is done.
    pub async fn wait_for_ready(&self, ctx: &OpContext, network: &Network) -> Result<()> {
        let mut attempt: u32 = 0;
        loop {
            ctx.check(&format!("network {} readiness", network.id))?;
            attempt += 1;

            match self.get_network_status(ctx, network).await {
                Ok(status) if status.running => {
                    info!(network = %network.id, attempt, "Network is ready");
                    return Ok(());
                }
                Ok(status) => {
                    if let Some(dead) = status.nodes.iter().find(|n| is_terminal_state(&n.status)) {
                        return Err(FabricGridError::ContainerFailed {
                            container: dead.name.clone(),
                            message: format!("container {} while waiting for readiness", dead.status),
                        });
                    }
                    debug!(network = %network.id, attempt, status = %status.status_text, "Network not ready yet");
                }
                Err(e) if matches!(e.kind(), ErrorKind::Cancelled | ErrorKind::Timeout) => {
                    return Err(e);
                }
                Err(e) => {
                    debug!(network = %network.id, attempt, error = %e, "Status poll failed");
                }
            }

            tokio::select! {
                reason = ctx.done() => {
                    return Err(reason.into_error(format!("network {} readiness", network.id)));
                }
                _ = tokio::time::sleep(self.settings.ready_poll_interval) => {}
            }
        }
    }

    /// Join every orderer and peer to the network's channel.
    pub async fn join_channel(&self, ctx: &OpContext, network: &Network) -> Result<()> {
        let channel = network.channel.name.as_str();
        let block = channel_block_path(channel);

        for orderer in &network.orderers {
            let tls = orderer_tls_dir(network, orderer);
            let cmd = ControlCommand::new(network.control_container.clone(), "osnadmin")
                .args(["channel", "join", "--channelID", channel, "--config-block"])
                .arg(block.as_str())
                .arg("-o")
                .arg(orderer.admin_address())
                .arg("--ca-file")
                .arg(format!("{tls}/ca.crt"))
                .arg("--client-cert")
                .arg(format!("{tls}/server.crt"))
                .arg("--client-key")
                .arg(format!("{tls}/server.key"));
            self.join(ctx, &orderer.name, &cmd).await?;
        }

        for (org, peer) in network.peers() {
            let cmd = ControlCommand::peer(network, org, peer)
                .args(["channel", "join", "-b"])
                .arg(block.as_str());
            self.join(ctx, &peer.name, &cmd).await?;
        }

        info!(network = %network.id, channel, "Channel joined");
        Ok(())
    }

    async fn join(&self, ctx: &OpContext, node: &str, cmd: &ControlCommand) -> Result<()> {
        let args = cmd.to_docker_args();
        match self
            .executor
            .execute_combined(&self.step(ctx), &self.settings.docker_bin, &args)
            .await
        {
            Ok(_) => {
                debug!(node, "Joined channel");
                Ok(())
            }
            Err(e) if already_joined(&e) => {
                debug!(node, "Already joined channel");
                Ok(())
            }
            Err(e) if matches!(e.kind(), ErrorKind::Cancelled | ErrorKind::Timeout) => Err(e),
            Err(e) => Err(FabricGridError::ContainerFailed {
                container: node.to_string(),
                message: format!("channel join failed: {e}"),
            }),
        }
    }

    /// Running only if every expected container reports running.
    ///
    /// Runtime query failures are errors, never silently "not running".
    pub async fn get_network_status(&self, ctx: &OpContext, network: &Network) -> Result<NetworkStatus> {
        let mut nodes = Vec::new();
        for orderer in &network.orderers {
            let state = self.runtime.status(ctx, &orderer.name).await?;
            nodes.push(node_status(&orderer.name, ContainerRole::Orderer, orderer.address(), &state));
        }
        for (_, peer) in network.peers() {
            let state = self.runtime.status(ctx, &peer.name).await?;
            nodes.push(node_status(&peer.name, ContainerRole::Peer, peer.address(), &state));
        }
        let state = self.runtime.status(ctx, &network.control_container).await?;
        nodes.push(node_status(
            &network.control_container,
            ContainerRole::Cli,
            String::new(),
            &state,
        ));

        let total = nodes.len();
        let up = nodes.iter().filter(|n| n.status == "running").count();
        let running = up == total;
        let status_text = if running {
            format!("running ({up}/{total} containers)")
        } else {
            let down: Vec<String> = nodes
                .iter()
                .filter(|n| n.status != "running")
                .map(|n| format!("{}={}", n.name, n.status))
                .collect();
            format!("degraded ({up}/{total} running): {}", down.join(", "))
        };

        Ok(NetworkStatus {
            running,
            status_text,
            nodes,
        })
    }

    /// Remove every container; with `cleanup` also volumes, the docker
    /// network and the artifacts directory.
    ///
    /// Idempotent: stopping a stopped network succeeds. Every step is tried;
    /// the first failure is returned.
    pub async fn stop_network(&self, ctx: &OpContext, network: &Network, cleanup: bool) -> Result<()> {
        info!(network = %network.id, cleanup, "Stopping network");
        let mut failures: Vec<FabricGridError> = Vec::new();

        for name in network.container_names().iter().rev() {
            if let Err(e) = self.runtime.stop(ctx, name).await {
                failures.push(e);
            }
        }

        if cleanup {
            if let Err(e) = self.runtime.remove_volumes(ctx, &volume_names(network)).await {
                failures.push(e);
            }
            if let Err(e) = self.runtime.remove_network(ctx, &network.docker_network).await {
                failures.push(e);
            }
            if let Err(e) = self.artifacts.remove(network).await {
                failures.push(e);
            }
        }

        for e in &failures {
            warn!(network = %network.id, error = %e, "Teardown step failed");
        }
        match failures.into_iter().next() {
            Some(e) => Err(e),
            None => {
                info!(network = %network.id, "Network stopped");
                Ok(())
            }
        }
    }

    /// Follow one container's log. The container must belong to `network`.
    pub async fn stream_logs(&self, ctx: &OpContext, network: &Network, container: &str) -> Result<ProcessStream> {
        if !network.owns_container(container) {
            return Err(FabricGridError::ContainerFailed {
                container: container.to_string(),
                message: format!("not part of network {}", network.id),
            });
        }
        self.runtime.logs(ctx, container).await
    }

    /// Container definitions, orderers first, control container last.
    pub fn container_specs(&self, network: &Network) -> Vec<ContainerSpec> {
        let images = &self.settings.images;
        let orgs_dir = organizations_dir(&network.artifacts_dir);
        let label = (NETWORK_LABEL.to_string(), network.id.clone());
        let mut specs = Vec::new();

        for orderer in &network.orderers {
            let node_dir = orgs_dir
                .join("ordererOrganizations")
                .join(&network.domain)
                .join("orderers")
                .join(&orderer.name);
            let mut spec = ContainerSpec::new(
                orderer.name.clone(),
                ContainerRole::Orderer,
                images.orderer.clone(),
                network.docker_network.clone(),
            );
            spec.labels.push(label.clone());
            spec.ports = vec![(orderer.port, orderer.port), (orderer.admin_port, orderer.admin_port)];
            spec.mounts = vec![
                read_only(node_dir.join("msp"), "/var/hyperledger/orderer/msp"),
                read_only(node_dir.join("tls"), "/var/hyperledger/orderer/tls"),
            ];
            spec.volumes = vec![(volume_name(&orderer.name), "/var/hyperledger/production/orderer".to_string())];
            spec.env = env(&[
                ("FABRIC_LOGGING_SPEC", "INFO"),
                ("ORDERER_GENERAL_LISTENADDRESS", "0.0.0.0"),
                ("ORDERER_GENERAL_LISTENPORT", orderer.port.to_string().as_str()),
                ("ORDERER_GENERAL_LOCALMSPID", ORDERER_MSP_ID),
                ("ORDERER_GENERAL_LOCALMSPDIR", "/var/hyperledger/orderer/msp"),
                ("ORDERER_GENERAL_TLS_ENABLED", "true"),
                ("ORDERER_GENERAL_TLS_PRIVATEKEY", "/var/hyperledger/orderer/tls/server.key"),
                ("ORDERER_GENERAL_TLS_CERTIFICATE", "/var/hyperledger/orderer/tls/server.crt"),
                ("ORDERER_GENERAL_TLS_ROOTCAS", "[/var/hyperledger/orderer/tls/ca.crt]"),
                ("ORDERER_GENERAL_BOOTSTRAPMETHOD", "none"),
                ("ORDERER_CHANNELPARTICIPATION_ENABLED", "true"),
                ("ORDERER_ADMIN_LISTENADDRESS", format!("0.0.0.0:{}", orderer.admin_port).as_str()),
                ("ORDERER_ADMIN_TLS_ENABLED", "true"),
                ("ORDERER_ADMIN_TLS_CERTIFICATE", "/var/hyperledger/orderer/tls/server.crt"),
                ("ORDERER_ADMIN_TLS_PRIVATEKEY", "/var/hyperledger/orderer/tls/server.key"),
                ("ORDERER_ADMIN_TLS_ROOTCAS", "[/var/hyperledger/orderer/tls/ca.crt]"),
                ("ORDERER_ADMIN_TLS_CLIENTROOTCAS", "[/var/hyperledger/orderer/tls/ca.crt]"),
            ]);
            specs.push(spec);
        }

        for (org, peer) in network.peers() {
            let node_dir = orgs_dir
                .join("peerOrganizations")
                .join(&org.domain)
                .join("peers")
                .join(&peer.name);
            let chaincode_port = u32::from(peer.port) + 1;
            let mut spec = ContainerSpec::new(
                peer.name.clone(),
                ContainerRole::Peer,
                images.peer.clone(),
                network.docker_network.clone(),
            );
            spec.labels.push(label.clone());
            spec.ports = vec![(peer.port, peer.port)];
            spec.mounts = vec![
                read_only(node_dir.join("msp"), "/etc/hyperledger/fabric/msp"),
                read_only(node_dir.join("tls"), "/etc/hyperledger/fabric/tls"),
                BindMount {
                    host_path: PathBuf::from(DOCKER_SOCKET),
                    container_path: format!("/host{DOCKER_SOCKET}"),
                    read_only: false,
                },
            ];
            spec.volumes = vec![(volume_name(&peer.name), "/var/hyperledger/production".to_string())];
            spec.env = env(&[
                ("FABRIC_LOGGING_SPEC", "INFO"),
                ("CORE_PEER_ID", peer.name.as_str()),
                ("CORE_PEER_ADDRESS", peer.address().as_str()),
                ("CORE_PEER_LISTENADDRESS", format!("0.0.0.0:{}", peer.port).as_str()),
                ("CORE_PEER_CHAINCODEADDRESS", format!("{}:{chaincode_port}", peer.name).as_str()),
                ("CORE_PEER_CHAINCODELISTENADDRESS", format!("0.0.0.0:{chaincode_port}").as_str()),
                ("CORE_PEER_GOSSIP_BOOTSTRAP", peer.address().as_str()),
                ("CORE_PEER_GOSSIP_EXTERNALENDPOINT", peer.address().as_str()),
                ("CORE_PEER_LOCALMSPID", org.msp_id.as_str()),
                ("CORE_PEER_MSPCONFIGPATH", "/etc/hyperledger/fabric/msp"),
                ("CORE_PEER_TLS_ENABLED", "true"),
                ("CORE_PEER_TLS_CERT_FILE", "/etc/hyperledger/fabric/tls/server.crt"),
                ("CORE_PEER_TLS_KEY_FILE", "/etc/hyperledger/fabric/tls/server.key"),
                ("CORE_PEER_TLS_ROOTCERT_FILE", "/etc/hyperledger/fabric/tls/ca.crt"),
                ("CORE_VM_ENDPOINT", format!("unix:///host{DOCKER_SOCKET}").as_str()),
                ("CORE_VM_DOCKER_HOSTCONFIG_NETWORKMODE", network.docker_network.as_str()),
            ]);
            spec.command = vec!["peer".to_string(), "node".to_string(), "start".to_string()];
            specs.push(spec);
        }

        let mut cli = ContainerSpec::new(
            network.control_container.clone(),
            ContainerRole::Cli,
            images.tools.clone(),
            network.docker_network.clone(),
        );
        cli.labels.push(label);
        cli.mounts = vec![
            read_only(orgs_dir, ORGANIZATIONS_ROOT),
            BindMount {
                host_path: channel_artifacts_dir(&network.artifacts_dir),
                container_path: CHANNEL_ARTIFACTS_ROOT.to_string(),
                read_only: false,
            },
        ];
        cli.env = env(&[("FABRIC_CFG_PATH", FABRIC_CFG_PATH)]);
        cli.working_dir = Some(CLI_WORKDIR.to_string());
        cli.command = vec!["sleep".to_string(), "infinity".to_string()];
        specs.push(cli);

        specs
    }
}

fn read_only(host_path: PathBuf, container_path: &str) -> BindMount {
    BindMount {
        host_path,
        container_path: container_path.to_string(),
        read_only: true,
    }
}

fn env(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Ledger data volume of a peer or orderer.
pub fn volume_name(node: &str) -> String {
    format!("{node}-data")
}

pub fn volume_names(network: &Network) -> Vec<String> {
    network
        .orderers
        .iter()
        .map(|o| volume_name(&o.name))
        .chain(network.peers().map(|(_, p)| volume_name(&p.name)))
        .collect()
}

fn node_status(name: &str, role: ContainerRole, endpoint: String, state: &ContainerState) -> NodeStatus {
    NodeStatus {
        name: name.to_string(),
        role,
        endpoint,
        status: state.to_string(),
    }
}

fn is_terminal_state(status: &str) -> bool {
    matches!(
        ContainerState::parse(status),
        ContainerState::Exited | ContainerState::Dead
    )
}

fn already_joined(err: &FabricGridError) -> bool {
    match err.root() {
        FabricGridError::ProcessFailed { output, .. } => {
            output.to_lowercase().contains("already exists")
        }
        _ => false,
    }
}
