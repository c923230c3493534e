use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Bootstrap input for a new network.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub name: String,
    pub org_count: u32,
    pub channel_name: String,
    /// Free-form overrides (`domain`, `peers_per_org`, `orderer_count`,
    /// `peer_port_base`, `orderer_port_base`).
    #[serde(default)]
    pub options: HashMap<String, String>,
}

/// A peer; its name doubles as container name and network hostname.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    pub name: String,
    pub port: u16,
}

impl Peer {
    pub fn address(&self) -> String {
        format!("{}:{}", self.name, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Orderer {
    pub name: String,
    pub port: u16,
    /// Channel participation admin endpoint.
    pub admin_port: u16,
}

impl Orderer {
    pub fn address(&self) -> String {
        format!("{}:{}", self.name, self.port)
    }

    pub fn admin_address(&self) -> String {
        format!("{}:{}", self.name, self.admin_port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub name: String,
    /// Used to derive certificate and identity paths.
    pub domain: String,
    pub msp_id: String,
    pub peers: Vec<Peer>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub name: String,
}

/// One provisioned multi-organization ledger network.
///
/// Topology is fixed once bootstrap returns; everything that varies over the
/// network's lifetime (its state) is tracked by the service registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    pub id: String,
    pub name: String,
    pub domain: String,
    pub channel: Channel,
    pub organizations: Vec<Organization>,
    pub orderers: Vec<Orderer>,
    /// Container that runs native tool invocations.
    pub control_container: String,
    /// Container-runtime network the containers attach to.
    pub docker_network: String,
    /// Host directory holding generated identity material and channel artifacts.
    pub artifacts_dir: PathBuf,
}

impl Network {
    /// First organization and its first peer, the sole submitting identity.
    pub fn acting_peer(&self) -> Option<(&Organization, &Peer)> {
        let org = self.organizations.first()?;
        let peer = org.peers.first()?;
        Some((org, peer))
    }

    pub fn primary_orderer(&self) -> Option<&Orderer> {
        self.orderers.first()
    }

    pub fn find_organization(&self, name: &str) -> Option<&Organization> {
        self.organizations
            .iter()
            .find(|o| o.name == name || o.msp_id == name)
    }

    pub fn peers(&self) -> impl Iterator<Item = (&Organization, &Peer)> {
        self.organizations
            .iter()
            .flat_map(|org| org.peers.iter().map(move |p| (org, p)))
    }

    /// All container names, orderers first, control container last.
    pub fn container_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.orderers.iter().map(|o| o.name.clone()).collect();
        names.extend(self.peers().map(|(_, p)| p.name.clone()));
        names.push(self.control_container.clone());
        names
    }

    pub fn owns_container(&self, name: &str) -> bool {
        self.control_container == name
            || self.orderers.iter().any(|o| o.name == name)
            || self.peers().any(|(_, p)| p.name == name)
    }

    /// Externally reachable endpoints (`host:port`).
    pub fn endpoints(&self) -> Vec<String> {
        let mut endpoints: Vec<String> = self.orderers.iter().map(Orderer::address).collect();
        endpoints.extend(self.peers().map(|(_, p)| p.address()));
        endpoints
    }
}
