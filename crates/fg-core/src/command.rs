//! Commands run inside a network's control container.
//!
//! Identity material lives under fixed paths in every container (the host
//! artifacts directory is mounted there), so the environment that selects a
//! peer identity can be derived from topology alone.

use fg_types::{Network, Orderer, Organization, Peer};
use serde_json::json;

/// Fabric core config inside the tools image.
pub const FABRIC_CFG_PATH: &str = "/etc/hyperledger/fabric";
/// Mount point of `<artifacts>/organizations`.
pub const ORGANIZATIONS_ROOT: &str = "/etc/hyperledger/organizations";
/// Mount point of `<artifacts>/channel-artifacts`.
pub const CHANNEL_ARTIFACTS_ROOT: &str = "/etc/hyperledger/channel-artifacts";

/// `{"Args":[function, args...]}`
pub fn build_args_json(function: &str, args: &[String]) -> String {
    let mut all = Vec::with_capacity(args.len() + 1);
    all.push(function);
    all.extend(args.iter().map(String::as_str));
    json!({ "Args": all }).to_string()
}

pub fn admin_msp_path(org: &Organization) -> String {
    format!(
        "{ORGANIZATIONS_ROOT}/peerOrganizations/{d}/users/Admin@{d}/msp",
        d = org.domain
    )
}

pub fn peer_tls_root_cert(org: &Organization, peer: &Peer) -> String {
    format!(
        "{ORGANIZATIONS_ROOT}/peerOrganizations/{}/peers/{}/tls/ca.crt",
        org.domain, peer.name
    )
}

pub fn orderer_ca_file(network: &Network, orderer: &Orderer) -> String {
    format!(
        "{ORGANIZATIONS_ROOT}/ordererOrganizations/{d}/orderers/{}/msp/tlscacerts/tlsca.{d}-cert.pem",
        orderer.name,
        d = network.domain
    )
}

/// TLS directory of an orderer (holds `ca.crt`, `server.crt`, `server.key`).
pub fn orderer_tls_dir(network: &Network, orderer: &Orderer) -> String {
    format!(
        "{ORGANIZATIONS_ROOT}/ordererOrganizations/{}/orderers/{}/tls",
        network.domain, orderer.name
    )
}

pub fn channel_block_path(channel: &str) -> String {
    format!("{CHANNEL_ARTIFACTS_ROOT}/{channel}.block")
}

/// Environment that makes the peer CLI act as `org`'s admin against `peer`.
pub fn peer_env(org: &Organization, peer: &Peer) -> Vec<(String, String)> {
    vec![
        ("CORE_PEER_LOCALMSPID".to_string(), org.msp_id.clone()),
        ("CORE_PEER_ADDRESS".to_string(), peer.address()),
        ("CORE_PEER_MSPCONFIGPATH".to_string(), admin_msp_path(org)),
        ("CORE_PEER_TLS_ENABLED".to_string(), "true".to_string()),
        (
            "CORE_PEER_TLS_ROOTCERT_FILE".to_string(),
            peer_tls_root_cert(org, peer),
        ),
        ("FABRIC_CFG_PATH".to_string(), FABRIC_CFG_PATH.to_string()),
    ]
}

/// Orderer target flags shared by invoke, approve and commit.
pub fn orderer_args(network: &Network, orderer: &Orderer) -> Vec<String> {
    vec![
        "-o".to_string(),
        orderer.address(),
        "--ordererTLSHostnameOverride".to_string(),
        orderer.name.clone(),
        "--tls".to_string(),
        "--cafile".to_string(),
        orderer_ca_file(network, orderer),
    ]
}

/// `--peerAddresses`/`--tlsRootCertFiles` pairs for each given peer.
pub fn endorsement_args<'a>(
    peers: impl IntoIterator<Item = (&'a Organization, &'a Peer)>,
) -> Vec<String> {
    let mut args = Vec::new();
    for (org, peer) in peers {
        args.push("--peerAddresses".to_string());
        args.push(peer.address());
        args.push("--tlsRootCertFiles".to_string());
        args.push(peer_tls_root_cert(org, peer));
    }
    args
}

/// A native tool invocation executed with `docker exec` in a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlCommand {
    pub container: String,
    pub env: Vec<(String, String)>,
    pub program: String,
    pub args: Vec<String>,
}

impl ControlCommand {
    pub fn new(container: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            env: Vec::new(),
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// `peer` CLI bound to `org`'s admin identity on `peer`.
    pub fn peer(network: &Network, org: &Organization, peer: &Peer) -> Self {
        Self::new(network.control_container.clone(), "peer").envs(peer_env(org, peer))
    }

    pub fn envs(mut self, env: Vec<(String, String)>) -> Self {
        self.env.extend(env);
        self
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Arguments for the docker binary.
    pub fn to_docker_args(&self) -> Vec<String> {
        let mut out = vec!["exec".to_string()];
        for (key, value) in &self.env {
            out.push("-e".to_string());
            out.push(format!("{key}={value}"));
        }
        out.push(self.container.clone());
        out.push(self.program.clone());
        out.extend(self.args.iter().cloned());
        out
    }
}
